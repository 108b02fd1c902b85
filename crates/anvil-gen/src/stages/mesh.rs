//! Mesh generation drivers: preview, refine, image-to-mesh and retexture

use super::{required_output, Stage, StageDriver};
use crate::job::{JobHandle, JobKind, RemoteStatus, TerminalJob, GLB_URL, THUMBNAIL_URL};
use crate::provider::{ImageParams, JobStatusSource, MeshProvider, StyleParams, TextureParams};
use anvil_core::{ClassifiedError, Result};

/// Output of a texturing mesh stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshOutput {
    pub job_id: String,
    pub model_url: String,
    pub thumbnail_url: Option<String>,
}

fn mesh_output(job: TerminalJob, stage: Stage) -> Result<MeshOutput> {
    let model_url = required_output(&job, GLB_URL, stage)?;
    let thumbnail_url = job.output(THUMBNAIL_URL).map(str::to_string);
    Ok(MeshOutput {
        job_id: job.handle.id().to_string(),
        model_url,
        thumbnail_url,
    })
}

fn require(value: &str, field: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ClassifiedError::validation(
            Some(field),
            format!("{} is required", what),
        ));
    }
    Ok(())
}

fn check_model(model: &str, polycount: u32) -> Result<()> {
    require(model, "ai_model", "A provider model")?;
    if polycount == 0 {
        return Err(ClassifiedError::validation(
            Some("target_polycount"),
            "target_polycount must be positive",
        ));
    }
    Ok(())
}

macro_rules! delegate_status {
    ($driver:ident) => {
        impl JobStatusSource for $driver<'_> {
            fn get_status(&self, handle: &JobHandle) -> Result<RemoteStatus> {
                self.provider.get_status(handle)
            }
        }
    };
}

// --- Preview ---

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewInput {
    pub prompt: String,
    pub style: StyleParams,
}

/// The untextured preview; only its job id feeds the refine pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewOutput {
    pub preview_job_id: String,
    pub model_url: Option<String>,
}

pub struct PreviewDriver<'a> {
    provider: &'a dyn MeshProvider,
}

impl<'a> PreviewDriver<'a> {
    pub fn new(provider: &'a dyn MeshProvider) -> Self {
        Self { provider }
    }
}

delegate_status!(PreviewDriver);

impl StageDriver for PreviewDriver<'_> {
    type Input = PreviewInput;
    type Output = PreviewOutput;

    fn stage(&self) -> Stage {
        Stage::MeshPreview
    }

    fn submit(&self, input: &PreviewInput) -> Result<JobHandle> {
        require(&input.prompt, "prompt", "A prompt")?;
        check_model(&input.style.ai_model, input.style.target_polycount)?;
        let id = self.provider.submit_preview(input.prompt.trim(), &input.style)?;
        Ok(JobHandle::new(id, JobKind::Preview))
    }

    fn interpret(&self, job: TerminalJob) -> Result<PreviewOutput> {
        Ok(PreviewOutput {
            model_url: job.output(GLB_URL).map(str::to_string),
            preview_job_id: job.handle.id().to_string(),
        })
    }
}

// --- Refine ---

#[derive(Debug, Clone, PartialEq)]
pub struct RefineInput {
    pub preview_job_id: String,
    pub texture: TextureParams,
}

pub struct RefineDriver<'a> {
    provider: &'a dyn MeshProvider,
}

impl<'a> RefineDriver<'a> {
    pub fn new(provider: &'a dyn MeshProvider) -> Self {
        Self { provider }
    }
}

delegate_status!(RefineDriver);

impl StageDriver for RefineDriver<'_> {
    type Input = RefineInput;
    type Output = MeshOutput;

    fn stage(&self) -> Stage {
        Stage::MeshRefine
    }

    fn submit(&self, input: &RefineInput) -> Result<JobHandle> {
        require(&input.preview_job_id, "preview_job_id", "A preview job id")?;
        if input.texture.texture_resolution == 0 {
            return Err(ClassifiedError::validation(
                Some("texture_resolution"),
                "texture_resolution must be positive",
            ));
        }
        let id = self
            .provider
            .submit_refine(&input.preview_job_id, &input.texture)?;
        Ok(JobHandle::new(id, JobKind::Refine))
    }

    fn interpret(&self, job: TerminalJob) -> Result<MeshOutput> {
        mesh_output(job, Stage::MeshRefine)
    }
}

// --- Image to mesh ---

#[derive(Debug, Clone, PartialEq)]
pub struct ImageToMeshInput {
    pub image_url: String,
    pub params: ImageParams,
}

pub struct ImageToMeshDriver<'a> {
    provider: &'a dyn MeshProvider,
}

impl<'a> ImageToMeshDriver<'a> {
    pub fn new(provider: &'a dyn MeshProvider) -> Self {
        Self { provider }
    }
}

delegate_status!(ImageToMeshDriver);

impl StageDriver for ImageToMeshDriver<'_> {
    type Input = ImageToMeshInput;
    type Output = MeshOutput;

    fn stage(&self) -> Stage {
        Stage::ImageToMesh
    }

    fn submit(&self, input: &ImageToMeshInput) -> Result<JobHandle> {
        require(&input.image_url, "image_url", "An image reference")?;
        check_model(&input.params.ai_model, input.params.target_polycount)?;
        let id = self
            .provider
            .submit_image_to_mesh(input.image_url.trim(), &input.params)?;
        Ok(JobHandle::new(id, JobKind::ImageToMesh))
    }

    fn interpret(&self, job: TerminalJob) -> Result<MeshOutput> {
        mesh_output(job, Stage::ImageToMesh)
    }
}

// --- Retexture ---

#[derive(Debug, Clone, PartialEq)]
pub struct RetextureInput {
    pub model_url: String,
    pub style: StyleParams,
}

pub struct RetextureDriver<'a> {
    provider: &'a dyn MeshProvider,
}

impl<'a> RetextureDriver<'a> {
    pub fn new(provider: &'a dyn MeshProvider) -> Self {
        Self { provider }
    }
}

delegate_status!(RetextureDriver);

impl StageDriver for RetextureDriver<'_> {
    type Input = RetextureInput;
    type Output = MeshOutput;

    fn stage(&self) -> Stage {
        Stage::Retexture
    }

    fn submit(&self, input: &RetextureInput) -> Result<JobHandle> {
        require(&input.model_url, "model_url", "A model URL")?;
        let has_style = input
            .style
            .art_style
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        if !has_style {
            return Err(ClassifiedError::validation(
                Some("art_style"),
                "A style prompt is required for retexturing",
            ));
        }
        let id = self
            .provider
            .submit_retexture(input.model_url.trim(), &input.style)?;
        Ok(JobHandle::new(id, JobKind::Retexture))
    }

    fn interpret(&self, job: TerminalJob) -> Result<MeshOutput> {
        mesh_output(job, Stage::Retexture)
    }
}
