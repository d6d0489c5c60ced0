//! The Four-Plane Chapter Contract: data model plus structural validator.

pub mod models;
pub mod validator;

pub use models::{
    ChapterPlaneComposition, ChartSpec, DataPoint, Diagnostics, FactualKPI, GenerationStatus,
    PersonaScore, PlaneA, PlaneA2, PlaneB, PlaneC, PlaneD, PlaneStatus, Provenance, VisualConcept,
};
pub use validator::{validate_chapter, validate_plane_a, validate_plane_b, validate_plane_c, validate_plane_d};
