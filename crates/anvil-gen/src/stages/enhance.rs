//! Prompt enhancement driver

use crate::provider::{EnhanceContext, PromptEnhancer};
use anvil_core::{ClassifiedError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhanceInput {
    pub prompt: String,
    pub context: EnhanceContext,
}

pub struct EnhanceDriver<'a> {
    enhancer: &'a dyn PromptEnhancer,
}

impl<'a> EnhanceDriver<'a> {
    pub fn new(enhancer: &'a dyn PromptEnhancer) -> Self {
        Self { enhancer }
    }

    /// Returns the enhanced prompt.
    ///
    /// A declined enhancement or an empty answer is a `generation` error, so
    /// the caller can fall back to the original prompt.
    pub fn execute(&self, input: &EnhanceInput) -> Result<String> {
        let prompt = input.prompt.trim();
        if prompt.is_empty() {
            return Err(ClassifiedError::validation(
                Some("prompt"),
                "A prompt is required for enhancement",
            ));
        }

        let enhancement = self.enhancer.enhance(prompt, &input.context)?;
        if let Some(reason) = enhancement.error {
            return Err(ClassifiedError::generation(
                Some("enhance-prompt"),
                format!("Prompt enhancement declined: {}", reason),
            )
            .with_retryable(false));
        }
        let enhanced = enhancement.enhanced_prompt.trim();
        if enhanced.is_empty() {
            return Err(ClassifiedError::generation(
                Some("enhance-prompt"),
                "Prompt enhancement returned an empty prompt",
            ));
        }
        Ok(enhanced.to_string())
    }
}
