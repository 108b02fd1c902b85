//! Stage drivers
//!
//! A polled driver knows how to submit one kind of remote job and how to
//! read its terminal result. It never polls; [`run_polled`] hands the job to
//! a [`TaskPoller`]. Drivers for synchronous collaborators expose `execute`
//! instead.

mod avatar;
mod enhance;
mod mesh;
mod rig;

pub use avatar::AvatarDriver;
pub use enhance::{EnhanceDriver, EnhanceInput};
pub use mesh::{
    ImageToMeshDriver, ImageToMeshInput, MeshOutput, PreviewDriver, PreviewInput, PreviewOutput,
    RefineDriver, RefineInput, RetextureDriver, RetextureInput,
};
pub use rig::{RigDriver, RigInput, RigOutput};

use crate::job::{JobHandle, TerminalJob};
use crate::poller::{PollOptions, TaskPoller};
use crate::provider::JobStatusSource;
use anvil_core::{Clock, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named steps of a generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    EnhancePrompt,
    MeshPreview,
    MeshRefine,
    ImageToMesh,
    Retexture,
    Rig,
    ConvertAvatarFormat,
    Download,
    Persist,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::EnhancePrompt => "enhance-prompt",
            Stage::MeshPreview => "mesh-preview",
            Stage::MeshRefine => "mesh-refine",
            Stage::ImageToMesh => "image-to-mesh",
            Stage::Retexture => "retexture",
            Stage::Rig => "rig",
            Stage::ConvertAvatarFormat => "convert-avatar-format",
            Stage::Download => "download",
            Stage::Persist => "persist",
        }
    }

    /// Whether a failure of this stage only degrades the result
    pub fn is_optional(self) -> bool {
        matches!(
            self,
            Stage::EnhancePrompt | Stage::Rig | Stage::ConvertAvatarFormat
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage backed by a remote job
pub trait StageDriver: JobStatusSource {
    type Input;
    type Output;

    fn stage(&self) -> Stage;

    /// Validate `input` and submit the job. Validation failures are returned
    /// before any provider call.
    fn submit(&self, input: &Self::Input) -> Result<JobHandle>;

    /// Extract the stage output from a succeeded job
    fn interpret(&self, job: TerminalJob) -> Result<Self::Output>;
}

/// Submit, poll to completion and interpret one job
pub fn run_polled<D: StageDriver>(
    driver: &D,
    input: &D::Input,
    clock: &dyn Clock,
    options: PollOptions,
    on_progress: &mut dyn FnMut(u8, Option<u32>),
) -> Result<D::Output> {
    let stage = driver.stage();
    let handle = driver.submit(input).map_err(|e| e.in_stage(stage.as_str()))?;
    tracing::debug!(stage = stage.as_str(), job = handle.id(), "submitted");
    let job = TaskPoller::new(driver, clock, options).poll_until_terminal(
        handle,
        stage.as_str(),
        on_progress,
    )?;
    driver.interpret(job).map_err(|e| e.in_stage(stage.as_str()))
}

/// Read a required output URL from a terminal job
pub(crate) fn required_output(job: &TerminalJob, key: &str, stage: Stage) -> Result<String> {
    job.output(key).map(str::to_string).ok_or_else(|| {
        anvil_core::ClassifiedError::generation(
            Some(stage.as_str()),
            format!(
                "{} job {} succeeded without a '{}' output",
                stage,
                job.handle.id(),
                key
            ),
        )
    })
}
