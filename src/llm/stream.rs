use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::TARGET_LLM_REQUEST;

/// Upper bound on the accumulated response text, in bytes.
pub const DEFAULT_MAX_RESPONSE_CHARS: usize = 256 * 1024;

/// Collects the partial texts of a streamed generation into the final answer.
///
/// The stream only counts as complete once a response flagged `done` has
/// been pushed. More text than the configured capacity ends it as a failure,
/// and anything pushed after completion is ignored.
#[derive(Debug)]
pub struct StreamAccumulator {
    text: String,
    max_chars: usize,
    chunks: usize,
    done: bool,
}

impl StreamAccumulator {
    pub fn new(max_chars: usize) -> Self {
        Self {
            text: String::new(),
            max_chars,
            chunks: 0,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Appends one partial response. Returns `true` once the completion
    /// marker has been seen.
    pub fn push(&mut self, response: &str, done: bool) -> Result<bool> {
        if self.done {
            debug!(target: TARGET_LLM_REQUEST, "Ignoring data after completion marker");
            return Ok(true);
        }
        self.chunks += 1;

        if self.text.len() + response.len() > self.max_chars {
            return Err(PipelineError::StreamTerminated(format!(
                "response exceeded {} characters",
                self.max_chars
            )));
        }
        self.text.push_str(response);

        if done {
            debug!(target: TARGET_LLM_REQUEST,
                "Stream complete after {} chunks ({} chars)", self.chunks, self.text.len());
            self.done = true;
        }
        Ok(self.done)
    }

    /// Ends the stream. Without a completion marker the partial text is
    /// discarded and the stream is reported as terminated.
    pub fn finish(self) -> Result<String> {
        if !self.done {
            return Err(PipelineError::StreamTerminated(format!(
                "stream ended without completion marker after {} chunks",
                self.chunks
            )));
        }
        Ok(self.text)
    }
}
