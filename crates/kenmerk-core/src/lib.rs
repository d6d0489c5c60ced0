//! kenmerk-core: the domain library implementing the Registry, Enrichment
//! Adapter, Four-Plane Chapter Contract, AI Authority, Chapter Generator,
//! and Pipeline Spine. The gateway crate is a thin HTTP/persistence
//! collaborator around this library; every governing decision (phase
//! order, validation, provider selection) lives here.

pub mod ai;
pub mod chapter_generator;
pub mod chapters;
pub mod core_summary;
pub mod enrichment;
pub mod error;
pub mod four_plane;
pub mod governance;
pub mod registry;
pub mod registry_proxy;
pub mod spine;

pub use chapter_generator::{build_chapter_prompt, generate_all_chapters, generate_chapter};
pub use core_summary::CoreSummary;
pub use enrichment::{enrich, PersonaPreferences, PreferenceConfig, RawListingInput};
pub use error::{PipelineError, PipelineResult};
pub use governance::{DeploymentEnvironment, Enforcement, GovernanceConfig, TruthPolicy};
pub use registry::{EntryKind, Registry, RegistryEntry, RegistryValue};
pub use registry_proxy::RegistryProxy;
pub use spine::{execute_report_pipeline, PipelineFailure, PipelinePhase, ProgressEvent};
