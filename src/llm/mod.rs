//! Client side of the locally hosted generative model.

use async_trait::async_trait;

use crate::error::Result;

pub mod ollama;
pub mod stream;

pub use ollama::OllamaGenerator;
pub use stream::{StreamAccumulator, DEFAULT_MAX_RESPONSE_CHARS};

/// Something that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}
