//! `anvil retexture`

use super::common::{open_pipeline, EventSink, StudioArgs};
use anvil_core::ErrorHistory;
use anvil_gen::pipeline::RetextureRequest;
use anvil_gen::{AssetCategory, ProgressEvent, QualityTier};
use anyhow::Result;

pub struct RetextureArgs {
    pub model_url: String,
    pub style: String,
    pub name: Option<String>,
    pub quality: String,
    pub category: String,
}

pub fn run(args: RetextureArgs, studio: StudioArgs) -> Result<()> {
    let quality: QualityTier = args.quality.parse()?;
    let category: AssetCategory = args.category.parse()?;
    let name = args.name.unwrap_or_else(|| name_from_url(&args.model_url));

    let pipeline = open_pipeline(&studio)?;
    let sink = EventSink::new(studio.events);
    let mut history = ErrorHistory::new();

    if !studio.events {
        println!("Retexturing '{}' with style: {}", name, args.style);
    }

    let request = RetextureRequest {
        name,
        model_url: args.model_url,
        style_prompt: args.style,
        quality,
        category,
    };
    let mut observer = |event: &ProgressEvent| sink.progress(event);
    let outcome = pipeline.retexture(request, &mut observer, &mut history);
    sink.history(&history);
    match outcome {
        Ok(result) => {
            sink.result(&result);
            Ok(())
        }
        Err(failure) => {
            sink.failure(&failure);
            Err(failure.into())
        }
    }
}

/// File stem of the model URL, or "retextured"
fn name_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .and_then(|file| file.split(['?', '#']).next())
        .and_then(|file| file.rsplit_once('.').map(|(stem, _)| stem).or(Some(file)))
        .filter(|stem| !stem.is_empty())
        .map(|stem| format!("{}_retextured", stem))
        .unwrap_or_else(|| "retextured".to_string())
}
