//! Batch generation
//!
//! Runs variations of one base request back to back. Iterations are never
//! parallel so provider rate limits are respected; a failed iteration is
//! recorded and the batch moves on.

use crate::pipeline::{Pipeline, PipelineFailure};
use crate::progress::ProgressObserver;
use crate::request::GenerationRequest;
use crate::result::GenerationResult;
use anvil_core::ErrorHistory;
use tracing::{info, warn};

/// Outcome of a batch; iteration numbers are 1-based
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<(usize, GenerationResult)>,
    pub failures: Vec<(usize, PipelineFailure)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.results.len() + self.failures.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The request for iteration `index` of `count`
pub fn variation(base: &GenerationRequest, index: usize, count: usize) -> GenerationRequest {
    let mut request = base.clone();
    if count > 1 {
        if let Some(prompt) = request.prompt.as_mut() {
            prompt.push_str(&format!(" (variation {}/{})", index, count));
        }
        request.name = format!("{}_{}", base.name, index);
    }
    request
}

/// Generate `count` variations of `base`, one after another
pub fn run_batch(
    pipeline: &Pipeline,
    base: &GenerationRequest,
    count: usize,
    observer: &mut dyn ProgressObserver,
    history: &mut ErrorHistory,
) -> BatchReport {
    let mut report = BatchReport::default();
    for index in 1..=count {
        info!(index, count, "batch iteration");
        match pipeline.run(variation(base, index, count), observer, history) {
            Ok(result) => report.results.push((index, result)),
            Err(failure) => {
                warn!(index, stage = %failure.stage, "batch iteration failed: {}", failure.error);
                report.failures.push((index, failure));
            }
        }
    }
    info!(
        succeeded = report.results.len(),
        failed = report.failures.len(),
        "batch finished"
    );
    report
}
