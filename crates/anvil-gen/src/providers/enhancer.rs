//! Prompt enhancement over an OpenAI-compatible chat completions endpoint

use super::http::{HttpClient, REQUEST_TIMEOUT};
use crate::config::AnvilConfig;
use crate::provider::{EnhanceContext, Enhancement, PromptEnhancer};
use anvil_core::{ClassifiedError, Result};
use serde_json::{json, Value};

const DEFAULT_ENHANCER_URL: &str = "https://api.openai.com/v1";
const ENHANCER_MODEL: &str = "gpt-4o-mini";

pub struct ChatPromptEnhancer {
    client: HttpClient,
    base_url: String,
}

impl ChatPromptEnhancer {
    pub fn from_config(config: &AnvilConfig) -> Result<Self> {
        let api_key = config.api_key("enhancer").ok_or_else(|| {
            ClassifiedError::auth(
                "Enhancer API key not configured. Set ANVIL_ENHANCER_API_KEY or add to .anvil/config.toml",
            )
        })?;
        let base_url = config
            .api_url("enhancer")
            .unwrap_or(DEFAULT_ENHANCER_URL)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client: HttpClient::new(Some(api_key.to_string()), REQUEST_TIMEOUT),
            base_url,
        })
    }
}

/// Instructions sent ahead of the user's prompt
pub fn system_prompt(context: &EnhanceContext) -> String {
    let mut text = format!(
        "Rewrite the user's description of a {} into a single prompt for a 3D mesh generator. \
         Describe shape, materials and colors concretely. Keep it under 60 words. \
         Reply with the prompt only.",
        context.asset_type
    );
    if context.is_avatar {
        text.push_str(
            " The model will be rigged as an avatar: ask for a neutral T-pose, \
             humanoid proportions and separated limbs.",
        );
    }
    text
}

/// Extract the first completion from a chat response
pub fn parse_completion(response: &Value) -> Enhancement {
    match response
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
    {
        Some(content) => Enhancement {
            enhanced_prompt: content.trim().trim_matches('"').to_string(),
            error: None,
        },
        None => Enhancement {
            enhanced_prompt: String::new(),
            error: Some(
                response
                    .pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("No completion in response")
                    .to_string(),
            ),
        },
    }
}

impl PromptEnhancer for ChatPromptEnhancer {
    fn enhance(&self, prompt: &str, context: &EnhanceContext) -> Result<Enhancement> {
        let payload = json!({
            "model": ENHANCER_MODEL,
            "temperature": 0.7,
            "messages": [
                {"role": "system", "content": system_prompt(context)},
                {"role": "user", "content": prompt}
            ]
        });
        let url = format!("{}/chat/completions", self.base_url);
        let response = self.client.post_json(&url, &payload)?;
        Ok(parse_completion(&response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let out = parse_completion(&json!({
            "choices": [{"message": {"role": "assistant", "content": " \"a battle-worn iron sword\" "}}]
        }));
        assert_eq!(out.enhanced_prompt, "a battle-worn iron sword");
        assert!(out.error.is_none());
    }

    #[test]
    fn test_parse_refusal() {
        let out = parse_completion(&json!({"error": {"message": "quota exceeded"}}));
        assert_eq!(out.error.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn test_avatar_context_mentions_pose() {
        let ctx = EnhanceContext {
            asset_type: "character".to_string(),
            is_avatar: true,
        };
        assert!(system_prompt(&ctx).contains("T-pose"));
    }
}
