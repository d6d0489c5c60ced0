//! HTTP handler modules, one per concern, mirroring the teacher's
//! `handlers::*` split.

pub mod ai_status;
pub mod runs;
