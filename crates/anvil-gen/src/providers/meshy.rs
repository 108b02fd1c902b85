//! Meshy mesh generation and rigging provider
//!
//! Text-to-3d runs as a preview task followed by a refine task on the v2
//! API; image-to-3d, retexture and rigging are single tasks on v1. Status
//! queries are routed by the job kind carried in the handle.

use super::http::{HttpClient, REQUEST_TIMEOUT};
use crate::config::AnvilConfig;
use crate::job::{
    JobHandle, JobKind, OutputUrls, RemoteStatus, GLB_URL, RIGGED_GLB_URL, THUMBNAIL_URL,
};
use crate::provider::*;
use anvil_core::{ClassifiedError, Result};
use serde_json::{json, Value};

const DEFAULT_MESHY_URL: &str = "https://api.meshy.ai/openapi";

/// Meshy provider for AI 3D model generation and auto-rigging
pub struct MeshyProvider {
    client: HttpClient,
    base_url: String,
}

impl MeshyProvider {
    /// Create a new MeshyProvider from config
    pub fn from_config(config: &AnvilConfig) -> Result<Self> {
        let api_key = config.api_key("meshy").ok_or_else(|| {
            ClassifiedError::auth(
                "Meshy API key not configured. Set ANVIL_MESHY_API_KEY or add to .anvil/config.toml",
            )
        })?;
        let base_url = config
            .api_url("meshy")
            .unwrap_or(DEFAULT_MESHY_URL)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client: HttpClient::new(Some(api_key.to_string()), REQUEST_TIMEOUT),
            base_url,
        })
    }

    fn endpoint(&self, kind: JobKind) -> String {
        let path = match kind {
            JobKind::Preview | JobKind::Refine => "v2/text-to-3d",
            JobKind::ImageToMesh => "v1/image-to-3d",
            JobKind::Retexture => "v1/retexture",
            JobKind::Rig => "v1/rigging",
        };
        format!("{}/{}", self.base_url, path)
    }

    fn submit(&self, kind: JobKind, payload: &Value) -> Result<String> {
        let url = self.endpoint(kind);
        let response = self.client.post_json(&url, payload)?;
        let id = parse_meshy_submit(&response)?;
        tracing::debug!(%kind, job = %id, "meshy task submitted");
        Ok(id)
    }
}

impl JobStatusSource for MeshyProvider {
    fn get_status(&self, handle: &JobHandle) -> Result<RemoteStatus> {
        let url = format!("{}/{}", self.endpoint(handle.kind()), handle.id());
        let response = self.client.get_json(&url)?;
        Ok(parse_meshy_status(&response))
    }
}

impl MeshProvider for MeshyProvider {
    fn name(&self) -> &str {
        "meshy"
    }

    fn submit_preview(&self, prompt: &str, style: &StyleParams) -> Result<String> {
        let mut payload = json!({
            "mode": "preview",
            "prompt": prompt,
            "ai_model": style.ai_model,
            "target_polycount": style.target_polycount,
            "should_remesh": true
        });
        if let Some(art_style) = &style.art_style {
            payload["art_style"] = json!(art_style);
        }
        if let Some(negative) = &style.negative_prompt {
            payload["negative_prompt"] = json!(negative);
        }
        if let Some(seed) = style.seed {
            payload["seed"] = json!(seed);
        }
        self.submit(JobKind::Preview, &payload)
    }

    fn submit_refine(&self, preview_job_id: &str, texture: &TextureParams) -> Result<String> {
        let mut payload = json!({
            "mode": "refine",
            "preview_task_id": preview_job_id,
            "enable_pbr": texture.enable_pbr,
            "texture_resolution": texture.texture_resolution
        });
        if let Some(prompt) = &texture.texture_prompt {
            payload["texture_prompt"] = json!(prompt);
        }
        self.submit(JobKind::Refine, &payload)
    }

    fn submit_image_to_mesh(&self, image_url: &str, params: &ImageParams) -> Result<String> {
        let payload = json!({
            "image_url": image_url,
            "ai_model": params.ai_model,
            "target_polycount": params.target_polycount,
            "texture_resolution": params.texture_resolution,
            "enable_pbr": params.enable_pbr,
            "should_texture": true,
            "should_remesh": true
        });
        self.submit(JobKind::ImageToMesh, &payload)
    }

    fn submit_retexture(&self, model_url: &str, style: &StyleParams) -> Result<String> {
        let payload = json!({
            "model_url": model_url,
            "text_style_prompt": style.art_style.as_deref().unwrap_or_default(),
            "ai_model": style.ai_model,
            "enable_pbr": true
        });
        self.submit(JobKind::Retexture, &payload)
    }
}

impl RiggingProvider for MeshyProvider {
    fn submit_rig(&self, model_url: &str, height_meters: f32) -> Result<String> {
        let payload = json!({
            "model_url": model_url,
            "height_meters": height_meters
        });
        self.submit(JobKind::Rig, &payload)
    }
}

/// Read the task id from a submit response
pub fn parse_meshy_submit(response: &Value) -> Result<String> {
    response
        .get("result")
        .and_then(|r| r.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ClassifiedError::generation(
                None,
                format!("Unexpected Meshy submit response: {}", response),
            )
        })
}

/// Map a task record onto the provider-neutral status shape
pub fn parse_meshy_status(response: &Value) -> RemoteStatus {
    let str_at = |ptr: &str| {
        response
            .pointer(ptr)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    let mut result_urls = OutputUrls::new();
    if let Some(url) = str_at("/model_urls/glb") {
        result_urls.insert(GLB_URL.to_string(), url);
    }
    if let Some(url) = str_at("/thumbnail_url") {
        result_urls.insert(THUMBNAIL_URL.to_string(), url);
    }
    if let Some(url) = str_at("/result/rigged_character_glb_url") {
        result_urls.insert(RIGGED_GLB_URL.to_string(), url);
    }

    RemoteStatus {
        status: str_at("/status").unwrap_or_else(|| "UNKNOWN".to_string()),
        progress: response
            .get("progress")
            .and_then(|p| p.as_u64())
            .map(|p| p.min(100) as u8),
        queue_depth: response
            .get("preceding_tasks")
            .and_then(|q| q.as_u64())
            .map(|q| q.min(u32::MAX as u64) as u32),
        result_urls,
        error_message: str_at("/task_error/message").filter(|m| !m.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    #[test]
    fn test_parse_meshy_submit_response() {
        let json: Value = serde_json::from_str(r#"{"result":"018d2158-xxxx-yyyy-zzzz-aabbccddee"}"#).unwrap();
        assert_eq!(parse_meshy_submit(&json).unwrap(), "018d2158-xxxx-yyyy-zzzz-aabbccddee");

        let err = parse_meshy_submit(&json!({"message": "nope"})).unwrap_err();
        assert_eq!(err.kind().label(), "generation");
    }

    #[test]
    fn test_parse_meshy_poll_pending() {
        let status = parse_meshy_status(&json!({"status": "PENDING", "progress": 0, "preceding_tasks": 7}));
        assert_eq!(status.queue_depth, Some(7));
        assert_eq!(JobStatus::from(status), JobStatus::Queued);
    }

    #[test]
    fn test_parse_meshy_poll_complete() {
        let status = parse_meshy_status(&json!({
            "status": "SUCCEEDED",
            "progress": 100,
            "model_urls": {
                "glb": "https://example.com/model.glb",
                "fbx": "https://example.com/model.fbx"
            },
            "thumbnail_url": "https://example.com/thumb.png"
        }));
        assert_eq!(status.result_urls[GLB_URL], "https://example.com/model.glb");
        assert_eq!(status.result_urls[THUMBNAIL_URL], "https://example.com/thumb.png");
        assert!(JobStatus::from(status).is_terminal());
    }

    #[test]
    fn test_parse_meshy_poll_failed() {
        let status = parse_meshy_status(&json!({
            "status": "FAILED",
            "progress": 50,
            "task_error": {"message": "Generation failed due to content policy"}
        }));
        assert_eq!(
            JobStatus::from(status),
            JobStatus::Failed {
                message: "Generation failed due to content policy".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rigging_result() {
        let status = parse_meshy_status(&json!({
            "status": "SUCCEEDED",
            "progress": 100,
            "result": {"rigged_character_glb_url": "https://example.com/rigged.glb"}
        }));
        assert_eq!(status.result_urls[RIGGED_GLB_URL], "https://example.com/rigged.glb");
    }

    #[test]
    fn test_missing_api_key_is_auth_error() {
        let err = match MeshyProvider::from_config(&AnvilConfig::default()) {
            Err(e) => e,
            Ok(_) => panic!("expected missing key error"),
        };
        assert_eq!(err.exit_code(), 3);
    }
}
