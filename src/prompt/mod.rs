// Declare submodules
mod analysis;
mod chat;
mod common;
mod summarization;

pub use analysis::therapeutic_significance_prompt;
pub use chat::chat_prompt;
pub use common::*;
pub use summarization::{batch_summary_prompt, consolidated_summary_prompt, synthesis_prompt};
