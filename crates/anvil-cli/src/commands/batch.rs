//! `anvil batch`

use super::common::{open_pipeline, EventSink, RequestArgs, StudioArgs};
use anvil_core::{ClassifiedError, ErrorHistory};
use anvil_gen::{run_batch, ProgressEvent};
use anyhow::Result;

pub fn run(request: RequestArgs, studio: StudioArgs, count: usize) -> Result<()> {
    if count == 0 {
        return Err(ClassifiedError::validation(Some("count"), "--count must be at least 1").into());
    }
    let base = request.to_request()?;
    let pipeline = open_pipeline(&studio)?;
    let sink = EventSink::new(studio.events);
    let mut history = ErrorHistory::new();

    if !studio.events {
        println!("Generating {} variations of '{}'...", count, base.name);
    }

    let mut observer = |event: &ProgressEvent| sink.progress(event);
    let report = run_batch(&pipeline, &base, count, &mut observer, &mut history);
    sink.history(&history);

    for (_, result) in &report.results {
        sink.result(result);
    }
    for (index, failure) in &report.failures {
        if !studio.events {
            eprint!("Variation {}: ", index);
        }
        sink.failure(failure);
    }
    if !studio.events {
        println!(
            "Batch done: {} succeeded, {} failed",
            report.results.len(),
            report.failures.len()
        );
    }

    // Partial success is still success
    if report.results.is_empty() {
        if let Some((_, failure)) = report.failures.into_iter().next() {
            return Err(failure.into());
        }
    }
    Ok(())
}
