//! Generation request types
//!
//! A [`GenerationRequest`] is built once by the caller and consumed by a
//! single pipeline run.

use anvil_core::{ClassifiedError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_RIG_HEIGHT_METERS: f32 = 1.7;

/// How the primary mesh is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    TextToMesh,
    ImageToMesh,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationMode::TextToMesh => write!(f, "text-to-mesh"),
            GenerationMode::ImageToMesh => write!(f, "image-to-mesh"),
        }
    }
}

impl FromStr for GenerationMode {
    type Err = ClassifiedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text-to-mesh" | "text" => Ok(GenerationMode::TextToMesh),
            "image-to-mesh" | "image" => Ok(GenerationMode::ImageToMesh),
            _ => Err(ClassifiedError::validation(
                Some("mode"),
                format!("Unknown generation mode '{}'. Use: text-to-mesh, image-to-mesh", s),
            )),
        }
    }
}

/// Quality tier, mapping to a fixed polycount / texture / model triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Preview,
    Medium,
    High,
}

/// Concrete provider settings for a quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualitySpec {
    pub target_polycount: u32,
    pub texture_resolution: u32,
    pub ai_model: &'static str,
}

impl QualityTier {
    pub fn spec(self) -> QualitySpec {
        match self {
            QualityTier::Preview => QualitySpec {
                target_polycount: 10_000,
                texture_resolution: 1024,
                ai_model: "meshy-4",
            },
            QualityTier::Medium => QualitySpec {
                target_polycount: 30_000,
                texture_resolution: 2048,
                ai_model: "meshy-4",
            },
            QualityTier::High => QualitySpec {
                target_polycount: 100_000,
                texture_resolution: 4096,
                ai_model: "meshy-5",
            },
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityTier::Preview => write!(f, "preview"),
            QualityTier::Medium => write!(f, "medium"),
            QualityTier::High => write!(f, "high"),
        }
    }
}

impl FromStr for QualityTier {
    type Err = ClassifiedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preview" => Ok(QualityTier::Preview),
            "medium" => Ok(QualityTier::Medium),
            "high" => Ok(QualityTier::High),
            _ => Err(ClassifiedError::validation(
                Some("quality"),
                format!("Unknown quality tier '{}'. Use: preview, medium, high", s),
            )),
        }
    }
}

/// Target content category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetCategory {
    Item,
    Prop,
    Character,
    Npc,
}

impl AssetCategory {
    /// Characters and NPCs are eligible for rigging and avatar conversion
    pub fn is_character(self) -> bool {
        matches!(self, AssetCategory::Character | AssetCategory::Npc)
    }
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetCategory::Item => write!(f, "item"),
            AssetCategory::Prop => write!(f, "prop"),
            AssetCategory::Character => write!(f, "character"),
            AssetCategory::Npc => write!(f, "npc"),
        }
    }
}

impl FromStr for AssetCategory {
    type Err = ClassifiedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "item" => Ok(AssetCategory::Item),
            "prop" => Ok(AssetCategory::Prop),
            "character" => Ok(AssetCategory::Character),
            "npc" => Ok(AssetCategory::Npc),
            _ => Err(ClassifiedError::validation(
                Some("category"),
                format!("Unknown category '{}'. Use: item, prop, character, npc", s),
            )),
        }
    }
}

/// Optional stages the caller asked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    #[serde(default)]
    pub enable_enhancement: bool,
    #[serde(default)]
    pub enable_rigging: bool,
    #[serde(default)]
    pub convert_to_avatar_format: bool,
}

/// A request to generate one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Human-readable asset name
    pub name: String,
    /// Text prompt (required for text-to-mesh)
    #[serde(default)]
    pub prompt: Option<String>,
    /// Source image reference (required for image-to-mesh)
    #[serde(default)]
    pub image_url: Option<String>,
    pub mode: GenerationMode,
    pub quality: QualityTier,
    pub category: AssetCategory,
    #[serde(default)]
    pub flags: FeatureFlags,
    #[serde(default)]
    pub art_style: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// Character height handed to the rigging provider
    #[serde(default)]
    pub height_meters: Option<f32>,
}

impl GenerationRequest {
    /// A text-to-mesh request with default quality and no optional stages
    pub fn text(prompt: &str, category: AssetCategory) -> Self {
        Self {
            name: derive_name(prompt),
            prompt: Some(prompt.to_string()),
            image_url: None,
            mode: GenerationMode::TextToMesh,
            quality: QualityTier::Medium,
            category,
            flags: FeatureFlags::default(),
            art_style: None,
            negative_prompt: None,
            height_meters: None,
        }
    }

    /// An image-to-mesh request
    pub fn image(image_url: &str, name: &str, category: AssetCategory) -> Self {
        Self {
            name: name.to_string(),
            prompt: None,
            image_url: Some(image_url.to_string()),
            mode: GenerationMode::ImageToMesh,
            quality: QualityTier::Medium,
            category,
            flags: FeatureFlags::default(),
            art_style: None,
            negative_prompt: None,
            height_meters: None,
        }
    }

    pub fn with_quality(mut self, quality: QualityTier) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_flags(mut self, flags: FeatureFlags) -> Self {
        self.flags = flags;
        self
    }

    /// The prompt, trimmed, if one was given
    pub fn prompt_text(&self) -> Option<&str> {
        self.prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// Check required fields for the chosen mode
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ClassifiedError::validation(Some("name"), "Asset name is required"));
        }
        match self.mode {
            GenerationMode::TextToMesh => {
                if self.prompt_text().is_none() {
                    return Err(ClassifiedError::validation(
                        Some("prompt"),
                        "A prompt is required for text-to-mesh generation",
                    ));
                }
            }
            GenerationMode::ImageToMesh => {
                let image = self.image_url.as_deref().map(str::trim).unwrap_or("");
                if image.is_empty() {
                    return Err(ClassifiedError::validation(
                        Some("image_url"),
                        "An image reference is required for image-to-mesh generation",
                    ));
                }
            }
        }
        if let Some(h) = self.height_meters {
            if !(0.1..=10.0).contains(&h) {
                return Err(ClassifiedError::validation(
                    Some("height_meters"),
                    format!("height_meters must be between 0.1 and 10.0, got {}", h),
                ));
            }
        }
        Ok(())
    }
}

/// Derive a snake_case asset name from the first words of a prompt
pub fn derive_name(prompt: &str) -> String {
    let name = prompt
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != '_', "");
    if name.is_empty() {
        "asset".to_string()
    } else {
        name
    }
}
