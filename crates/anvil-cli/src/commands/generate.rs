//! `anvil generate`

use super::common::{open_pipeline, EventSink, RequestArgs, StudioArgs};
use anvil_core::ErrorHistory;
use anvil_gen::ProgressEvent;
use anyhow::Result;

pub fn run(request: RequestArgs, studio: StudioArgs) -> Result<()> {
    let request = request.to_request()?;
    let pipeline = open_pipeline(&studio)?;
    let sink = EventSink::new(studio.events);
    let mut history = ErrorHistory::new();

    if !studio.events {
        println!(
            "Generating {} '{}' ({}, {})...",
            request.category, request.name, request.mode, request.quality
        );
    }

    let mut observer = |event: &ProgressEvent| sink.progress(event);
    let outcome = pipeline.run(request, &mut observer, &mut history);
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
