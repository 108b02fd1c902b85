//! Final output of a generation run

use crate::request::{AssetCategory, FeatureFlags, GenerationMode, QualityTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optional stages that actually succeeded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedStages {
    pub enhancement: bool,
    pub rigging: bool,
    pub avatar_conversion: bool,
}

/// Metadata bag stored with the artifacts and returned to the caller.
///
/// Scalar fields come before the nested tables so the bag serializes to
/// TOML as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub name: String,
    /// The prompt sent to the mesh provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// The caller's prompt, when enhancement replaced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Model that was retextured, for retexture runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_model: Option<String>,
    /// Unset for retexture runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<GenerationMode>,
    pub quality: QualityTier,
    pub category: AssetCategory,
    pub provider: String,
    pub ai_model: String,
    pub target_polycount: u32,
    pub texture_resolution: u32,
    #[serde(rename = "hasVRM")]
    pub has_vrm: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triangle_count: Option<u64>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub requested: FeatureFlags,
    pub applied: AppliedStages,
    /// Provider job id per stage name
    #[serde(default)]
    pub job_ids: BTreeMap<String, String>,
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub asset_id: String,
    /// Persisted primary mesh; never the rigged variant
    pub model_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rigged_model_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Where the provider served the primary mesh
    pub source_model_url: String,
    #[serde(default)]
    pub content_hashes: BTreeMap<String, String>,
    pub metadata: ResultMetadata,
}
