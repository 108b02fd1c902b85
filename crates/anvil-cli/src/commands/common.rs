//! Arguments and output shared by the generation commands

use anvil_core::{ClassifiedError, ErrorHistory, SystemClock};
use anvil_gen::pipeline::{Pipeline, PipelineFailure, PipelineSettings};
use anvil_gen::providers::create_studio;
use anvil_gen::request::{
    AssetCategory, FeatureFlags, GenerationMode, GenerationRequest, QualityTier,
};
use anvil_gen::{AnvilConfig, GenerationResult, LocalArtifactStore, ProgressEvent};
use anyhow::Result;
use clap::Args;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// What to generate
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Text prompt describing the asset
    pub prompt: Option<String>,

    /// Source image URL (switches to image-to-mesh)
    #[arg(long)]
    pub image: Option<String>,

    /// Asset name (defaults to the first words of the prompt)
    #[arg(long)]
    pub name: Option<String>,

    /// Generation mode: text-to-mesh, image-to-mesh
    #[arg(long)]
    pub mode: Option<String>,

    /// Quality tier: preview, medium, high
    #[arg(long, default_value = "medium")]
    pub quality: String,

    /// Content category: item, prop, character, npc
    #[arg(long, default_value = "item")]
    pub category: String,

    /// Rewrite the prompt with the enhancement service first
    #[arg(long)]
    pub enhance: bool,

    /// Auto-rig the mesh (characters and NPCs only)
    #[arg(long)]
    pub rig: bool,

    /// Convert to the avatar (VRM) format (characters and NPCs only)
    #[arg(long)]
    pub avatar: bool,

    /// Character height in meters for rigging
    #[arg(long)]
    pub height: Option<f32>,

    /// Art style hint passed to the mesh provider
    #[arg(long)]
    pub art_style: Option<String>,

    /// Things the mesh should not contain
    #[arg(long)]
    pub negative_prompt: Option<String>,
}

/// Where and how to run
#[derive(Args, Debug, Clone)]
pub struct StudioArgs {
    /// Provider to use (meshy, mock)
    #[arg(long)]
    pub provider: Option<String>,

    /// Output directory (defaults to the configured output_dir)
    #[arg(long, short)]
    pub output: Option<String>,

    /// Stream progress and the outcome as JSON lines on stdout
    #[arg(long)]
    pub events: bool,
}

impl RequestArgs {
    pub fn to_request(&self) -> anvil_core::Result<GenerationRequest> {
        let mode = match (&self.mode, &self.image) {
            (Some(mode), _) => mode.parse::<GenerationMode>()?,
            (None, Some(_)) => GenerationMode::ImageToMesh,
            (None, None) => GenerationMode::TextToMesh,
        };
        let quality: QualityTier = self.quality.parse()?;
        let category: AssetCategory = self.category.parse()?;

        let mut request = match mode {
            GenerationMode::TextToMesh => {
                GenerationRequest::text(self.prompt.as_deref().unwrap_or(""), category)
            }
            GenerationMode::ImageToMesh => {
                let name = self.name.clone().unwrap_or_else(|| "asset".to_string());
                let mut request =
                    GenerationRequest::image(self.image.as_deref().unwrap_or(""), &name, category);
                request.prompt = self.prompt.clone();
                request
            }
        };
        if let Some(name) = &self.name {
            request.name = name.clone();
        }
        request.quality = quality;
        request.flags = FeatureFlags {
            enable_enhancement: self.enhance,
            enable_rigging: self.rig,
            convert_to_avatar_format: self.avatar,
        };
        request.height_meters = self.height;
        request.art_style = self.art_style.clone();
        request.negative_prompt = self.negative_prompt.clone();
        request.validate()?;
        Ok(request)
    }
}

/// Build a pipeline from config plus command-line overrides
pub fn open_pipeline(args: &StudioArgs) -> Result<Pipeline> {
    let config = AnvilConfig::load()?;
    let provider = args
        .provider
        .clone()
        .unwrap_or_else(|| config.default_provider().to_string());
    let output = args
        .output
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| config.output_dir());

    tracing::info!(provider = %provider, output = %output.display(), "opening studio");
    let store = Arc::new(LocalArtifactStore::new(output));
    let collaborators = create_studio(&provider, &config, store)?;
    Ok(Pipeline::new(
        collaborators,
        PipelineSettings::from_config(&config),
        Arc::new(SystemClock::new()),
    ))
}

/// Writes progress and outcomes either as text or as JSON lines
pub struct EventSink {
    json: bool,
}

impl EventSink {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn progress(&self, event: &ProgressEvent) {
        if self.json {
            println!("{}", progress_line(event));
        } else {
            eprintln!("  [{:>3}%] {}", event.percent, event.message);
        }
    }

    pub fn result(&self, result: &GenerationResult) {
        if self.json {
            println!("{}", result_line(result));
            return;
        }
        println!("Generated '{}' ({})", result.metadata.name, result.asset_id);
        println!("  Model: {}", result.model_url);
        if let Some(url) = &result.thumbnail_url {
            println!("  Thumbnail: {}", url);
        }
        if let Some(url) = &result.rigged_model_url {
            println!("  Rigged: {}", url);
        }
        if let Some(url) = &result.avatar_url {
            println!("  Avatar: {}", url);
        }
        if let Some(triangles) = result.metadata.triangle_count {
            println!("  Triangles: {}", triangles);
        }
        for warning in &result.metadata.warnings {
            println!("  Warning: {}", warning);
        }
    }

    /// Every error recorded during the run, retried ones included. Text
    /// output goes through the logger, so it shows at `-v`.
    pub fn history(&self, history: &ErrorHistory) {
        if history.is_empty() {
            return;
        }
        if self.json {
            println!("{}", history_line(history));
            return;
        }
        for record in history.entries() {
            tracing::info!(retryable = record.retryable, "{}", record);
        }
    }

    pub fn failure(&self, failure: &PipelineFailure) {
        if self.json {
            println!("{}", failure_line(failure));
        } else {
            eprintln!("{} failed: {}", failure.stage, failure.error.user_message());
        }
    }
}

fn tagged(kind: &str, mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert("type".to_string(), Value::String(kind.to_string()));
    }
    value
}

pub fn progress_line(event: &ProgressEvent) -> Value {
    tagged("progress", serde_json::to_value(event).unwrap_or(Value::Null))
}

pub fn result_line(result: &GenerationResult) -> Value {
    json!({
        "type": "result",
        "result": result,
    })
}

pub fn failure_line(failure: &PipelineFailure) -> Value {
    error_line(Some(failure.stage.as_str()), &failure.error)
}

pub fn history_line(history: &ErrorHistory) -> Value {
    json!({
        "type": "history",
        "entries": history.entries().collect::<Vec<_>>(),
    })
}

pub fn error_line(stage: Option<&str>, error: &ClassifiedError) -> Value {
    json!({
        "type": "error",
        "stage": stage,
        "code": error.code(),
        "kind": error.kind().label(),
        "message": error.message(),
        "userMessage": error.user_message(),
        "retryable": error.is_retryable(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_gen::Stage;

    fn args(prompt: Option<&str>) -> RequestArgs {
        RequestArgs {
            prompt: prompt.map(str::to_string),
            image: None,
            name: None,
            mode: None,
            quality: "medium".to_string(),
            category: "item".to_string(),
            enhance: false,
            rig: false,
            avatar: false,
            height: None,
            art_style: None,
            negative_prompt: None,
        }
    }

    #[test]
    fn test_text_request_from_args() {
        let mut a = args(Some("iron sword"));
        a.enhance = true;
        let request = a.to_request().unwrap();
        assert_eq!(request.mode, GenerationMode::TextToMesh);
        assert_eq!(request.name, "iron_sword");
        assert!(request.flags.enable_enhancement);
    }

    #[test]
    fn test_image_flag_switches_mode() {
        let mut a = args(None);
        a.image = Some("https://img/statue.png".to_string());
        a.name = Some("statue".to_string());
        let request = a.to_request().unwrap();
        assert_eq!(request.mode, GenerationMode::ImageToMesh);
        assert_eq!(request.name, "statue");
    }

    #[test]
    fn test_invalid_args_are_validation_errors() {
        let err = args(None).to_request().unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let mut a = args(Some("iron sword"));
        a.quality = "ultra".to_string();
        assert_eq!(a.to_request().unwrap_err().kind().label(), "validation");
    }

    #[test]
    fn test_progress_line_shape() {
        let line = progress_line(&ProgressEvent {
            stage: Stage::MeshRefine,
            percent: 72,
            message: "Refining mesh and textures (48%)".to_string(),
            queue_depth: None,
        });
        assert_eq!(line["type"], "progress");
        assert_eq!(line["stage"], "mesh-refine");
        assert_eq!(line["percent"], 72);
        assert!(line.get("queueDepth").is_none());
    }

    #[test]
    fn test_history_line_lists_records() {
        let mut history = ErrorHistory::new();
        history.record(&ClassifiedError::network("HTTP 503", Some(503), None), Some("mesh-refine"));
        history.record(&ClassifiedError::generation(None, "task failed"), Some("mesh-refine"));

        let line = history_line(&history);
        assert_eq!(line["type"], "history");
        let entries = line["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["code"], "NETWORK_ERROR");
        assert_eq!(entries[0]["stage"], "mesh-refine");
        assert_eq!(entries[1]["code"], "GENERATION_ERROR");
    }

    #[test]
    fn test_failure_line_shape() {
        let line = failure_line(&PipelineFailure {
            stage: Stage::Persist,
            error: ClassifiedError::storage(Some("write"), "disk full"),
        });
        assert_eq!(line["type"], "error");
        assert_eq!(line["stage"], "persist");
        assert_eq!(line["code"], "STORAGE_ERROR");
        assert_eq!(line["retryable"], true);
    }
}
