//! The AI Authority subsystem: provider clients, capability tracking,
//! provider selection/cascade, output validation, and Ollama hygiene.

pub mod authority;
pub mod capability;
pub mod client;
pub mod ollama_guard;
pub mod output_validator;

pub use authority::AiAuthority;
pub use capability::{Capability, CapabilityManager, CapabilityState, StatusCategory};
pub use client::{AiProviderClient, AnthropicClient, GeminiClient, GenerateRequest, OllamaClient, OpenAiClient, ProviderName, PROVIDER_HIERARCHY};
pub use ollama_guard::OllamaGuard;
pub use output_validator::{validate_ai_output, OutputValidationResult, ALLOWED_META_KEYS};
