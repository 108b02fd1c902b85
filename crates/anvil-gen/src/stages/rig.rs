//! Auto-rigging driver

use super::{required_output, Stage, StageDriver};
use crate::job::{JobHandle, JobKind, RemoteStatus, TerminalJob, RIGGED_GLB_URL};
use crate::provider::{BinaryFetch, JobStatusSource, RiggingProvider};
use anvil_core::{ClassifiedError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct RigInput {
    pub model_url: String,
    pub height_meters: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RigOutput {
    pub job_id: String,
    pub rigged_model_url: String,
    pub rigged_model: Vec<u8>,
}

/// Submits rigging jobs and fetches the rigged mesh on success
pub struct RigDriver<'a> {
    rigger: &'a dyn RiggingProvider,
    fetch: &'a dyn BinaryFetch,
}

impl<'a> RigDriver<'a> {
    pub fn new(rigger: &'a dyn RiggingProvider, fetch: &'a dyn BinaryFetch) -> Self {
        Self { rigger, fetch }
    }
}

impl JobStatusSource for RigDriver<'_> {
    fn get_status(&self, handle: &JobHandle) -> Result<RemoteStatus> {
        self.rigger.get_status(handle)
    }
}

impl StageDriver for RigDriver<'_> {
    type Input = RigInput;
    type Output = RigOutput;

    fn stage(&self) -> Stage {
        Stage::Rig
    }

    fn submit(&self, input: &RigInput) -> Result<JobHandle> {
        if input.model_url.trim().is_empty() {
            return Err(ClassifiedError::validation(
                Some("model_url"),
                "A model URL is required for rigging",
            ));
        }
        if !(input.height_meters.is_finite() && input.height_meters > 0.0) {
            return Err(ClassifiedError::validation(
                Some("height_meters"),
                format!("height_meters must be positive, got {}", input.height_meters),
            ));
        }
        let id = self
            .rigger
            .submit_rig(input.model_url.trim(), input.height_meters)?;
        Ok(JobHandle::new(id, JobKind::Rig))
    }

    fn interpret(&self, job: TerminalJob) -> Result<RigOutput> {
        let rigged_model_url = required_output(&job, RIGGED_GLB_URL, Stage::Rig)?;
        let rigged_model = self.fetch.download(&rigged_model_url)?;
        Ok(RigOutput {
            job_id: job.handle.id().to_string(),
            rigged_model_url,
            rigged_model,
        })
    }
}
