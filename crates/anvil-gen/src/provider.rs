//! Collaborator contracts consumed by the pipeline
//!
//! Every method returns a [`ClassifiedError`](anvil_core::ClassifiedError)
//! on failure; implementations convert transport and provider errors at
//! their own boundary.

use crate::job::{JobHandle, RemoteStatus};
use anvil_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Style parameters for untextured mesh generation and retexturing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleParams {
    #[serde(default)]
    pub art_style: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    pub ai_model: String,
    pub target_polycount: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Texturing parameters for the refine pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextureParams {
    #[serde(default)]
    pub texture_prompt: Option<String>,
    pub texture_resolution: u32,
    #[serde(default = "default_true")]
    pub enable_pbr: bool,
}

fn default_true() -> bool {
    true
}

/// Parameters for combined image-to-mesh generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageParams {
    pub ai_model: String,
    pub target_polycount: u32,
    pub texture_resolution: u32,
    #[serde(default = "default_true")]
    pub enable_pbr: bool,
}

/// Anything that can report the status of a job it issued
pub trait JobStatusSource: Send + Sync {
    fn get_status(&self, handle: &JobHandle) -> Result<RemoteStatus>;
}

/// Remote mesh generation service
pub trait MeshProvider: JobStatusSource {
    fn name(&self) -> &str;

    fn submit_preview(&self, prompt: &str, style: &StyleParams) -> Result<String>;

    fn submit_refine(&self, preview_job_id: &str, texture: &TextureParams) -> Result<String>;

    fn submit_image_to_mesh(&self, image_url: &str, params: &ImageParams) -> Result<String>;

    fn submit_retexture(&self, model_url: &str, style: &StyleParams) -> Result<String>;
}

/// Remote auto-rigging service
pub trait RiggingProvider: JobStatusSource {
    fn submit_rig(&self, model_url: &str, height_meters: f32) -> Result<String>;
}

/// Output of an avatar-format conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarConversion {
    pub converted: Vec<u8>,
    pub warnings: Vec<String>,
}

/// Converts a mesh into the avatar (VRM) format
pub trait AvatarConverter: Send + Sync {
    fn convert(&self, mesh: &[u8], display_name: &str) -> Result<AvatarConversion>;
}

/// Context handed to prompt enhancement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhanceContext {
    pub asset_type: String,
    pub is_avatar: bool,
}

/// Prompt enhancement response; `error` is set when the provider declined
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enhancement {
    pub enhanced_prompt: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Rewrites user prompts into provider-friendly ones
pub trait PromptEnhancer: Send + Sync {
    fn enhance(&self, prompt: &str, context: &EnhanceContext) -> Result<Enhancement>;
}

/// Fetches remote binaries; non-2xx and transport failures are `network` errors
pub trait BinaryFetch: Send + Sync {
    fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Everything a finished run hands to persistence
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub asset_id: String,
    pub model: Vec<u8>,
    pub rigged_model: Option<Vec<u8>>,
    pub thumbnail: Option<Vec<u8>>,
    pub avatar: Option<Vec<u8>>,
    pub metadata: crate::result::ResultMetadata,
}

/// Locations of persisted artifacts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedArtifacts {
    pub model_url: String,
    #[serde(default)]
    pub rigged_model_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Content hash per stored file name
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
}

/// Object storage plus asset catalog
pub trait ArtifactStore: Send + Sync {
    fn save(&self, bundle: &ArtifactBundle) -> Result<SavedArtifacts>;
}
