pub mod client;
pub mod error;
pub mod export;
pub mod ingest;
pub mod orchestrator;
#[cfg(test)]
mod test_http;
pub mod transcode;

pub use client::{client_for_provider, DryrunClient, GeminiClient, GeminiConfig, GenerationClient};
pub use error::{GenerationError, OrchestratorError};
pub use orchestrator::{CategoryState, CategoryUpdate, Orchestrator, Progress, RunReport};
pub use transcode::{InlineImage, MediaType, SourceImage};

/// Fresh session identifier for event logs and run summaries.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
