//! Text-generation engine boundary.

use st_types::{GenerationSettings, StResult};

/// A batched completion engine.
///
/// The orchestrator always submits exactly `batch_size` prompts per call, a
/// fixed ceiling tied to accelerator memory; engines that cannot hold that
/// many sequences should fail at load time rather than per call.
pub trait TextGenerator {
    /// Drop any streaming / sequence state left over from the previous call.
    fn reset(&mut self);

    /// One completion per prompt, in prompt order.
    fn generate(
        &mut self,
        prompts: &[String],
        settings: &GenerationSettings,
        max_new_tokens: usize,
    ) -> StResult<Vec<String>>;
}
