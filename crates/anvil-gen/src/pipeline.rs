//! Pipeline orchestrator
//!
//! Drives one generation request through its stages:
//!
//! ```text
//! Idle -> Enhancing? -> MeshGenerating -> Rigging? -> AvatarConverting? -> Persisting -> Completed
//!                    \________________ any stage ________________/ -> Failed(stage)
//! ```
//!
//! Mesh generation, the mesh download and persistence are mandatory; a
//! failure there ends the run. Enhancement, rigging and avatar conversion
//! are optional: once their retries are exhausted the run records a warning
//! and continues without them.

use crate::config::AnvilConfig;
use crate::inspect::inspect_glb;
use crate::poller::PollOptions;
use crate::progress::{BandPlan, ProgressObserver, ProgressTracker};
use crate::provider::*;
use crate::request::{
    AssetCategory, GenerationMode, GenerationRequest, QualityTier, DEFAULT_RIG_HEIGHT_METERS,
};
use crate::result::{AppliedStages, GenerationResult, ResultMetadata};
use crate::stages::*;
use anvil_core::{
    with_retry, ClassifiedError, Clock, ErrorHistory, Result, RetryNotice, RetryPolicy,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Every external service a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub mesh: Arc<dyn MeshProvider>,
    pub rigger: Arc<dyn RiggingProvider>,
    pub enhancer: Arc<dyn PromptEnhancer>,
    pub avatar: Arc<dyn AvatarConverter>,
    pub fetch: Arc<dyn BinaryFetch>,
    pub store: Arc<dyn ArtifactStore>,
}

/// Timeouts and retry policy for runs
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub poll: PollOptions,
    pub slow_poll: PollOptions,
    pub retry: RetryPolicy,
    pub rig_height_meters: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll: PollOptions::default(),
            slow_poll: PollOptions::slow(),
            retry: RetryPolicy::default(),
            rig_height_meters: DEFAULT_RIG_HEIGHT_METERS,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &AnvilConfig) -> Self {
        Self {
            poll: config.poll_options(),
            slow_poll: config.slow_poll_options(),
            retry: config.retry_policy(),
            rig_height_meters: config.rig_height_meters(),
        }
    }
}

/// Which optional stages a run will attempt, decided once per run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagePlan {
    pub run_enhancement: bool,
    pub run_rigging: bool,
    pub run_avatar_conversion: bool,
}

impl StagePlan {
    /// Rigging and avatar conversion only apply to characters; enhancement
    /// only applies to text prompts.
    pub fn for_request(request: &GenerationRequest) -> Self {
        let character = request.category.is_character();
        Self {
            run_enhancement: request.flags.enable_enhancement
                && request.mode == GenerationMode::TextToMesh,
            run_rigging: character && request.flags.enable_rigging,
            run_avatar_conversion: character && request.flags.convert_to_avatar_format,
        }
    }
}

/// State of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Enhancing,
    MeshGenerating,
    Rigging,
    AvatarConverting,
    Persisting,
    Completed,
    Failed { stage: Stage },
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed { .. })
    }

    /// Legal transitions; optional states may be skipped
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (from, Failed { .. }) => !from.is_terminal(),
            (Idle, Enhancing | MeshGenerating) => true,
            (Enhancing, MeshGenerating) => true,
            (MeshGenerating, Rigging | AvatarConverting | Persisting) => true,
            (Rigging, AvatarConverting | Persisting) => true,
            (AvatarConverting, Persisting) => true,
            (Persisting, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Enhancing => write!(f, "enhancing"),
            PipelineState::MeshGenerating => write!(f, "mesh-generating"),
            PipelineState::Rigging => write!(f, "rigging"),
            PipelineState::AvatarConverting => write!(f, "avatar-converting"),
            PipelineState::Persisting => write!(f, "persisting"),
            PipelineState::Completed => write!(f, "completed"),
            PipelineState::Failed { stage } => write!(f, "failed({})", stage),
        }
    }
}

/// A run that ended in `Failed`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{stage} failed: {error}")]
pub struct PipelineFailure {
    pub stage: Stage,
    #[source]
    pub error: ClassifiedError,
}

/// Buffers and URLs produced while a run is in flight
#[derive(Debug, Default)]
struct Artifacts {
    source_model_url: Option<String>,
    thumbnail_url: Option<String>,
    model: Option<Vec<u8>>,
    rigged_model: Option<Vec<u8>>,
    thumbnail: Option<Vec<u8>>,
    avatar: Option<Vec<u8>>,
}

/// Mutable state of one in-flight run, owned by the flow executing it
#[derive(Debug)]
pub struct PipelineRun {
    state: PipelineState,
    stage: Option<Stage>,
    progress: ProgressTracker,
    artifacts: Artifacts,
    job_ids: BTreeMap<String, String>,
    warnings: Vec<String>,
    applied: AppliedStages,
    triangle_count: Option<u64>,
}

impl PipelineRun {
    fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            stage: None,
            progress: ProgressTracker::new(),
            artifacts: Artifacts::default(),
            job_ids: BTreeMap::new(),
            warnings: Vec::new(),
            applied: AppliedStages::default(),
            triangle_count: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn current_stage(&self) -> Option<Stage> {
        self.stage
    }

    pub fn progress(&self) -> u8 {
        self.progress.percent()
    }

    pub fn status_line(&self) -> &str {
        self.progress.status()
    }

    fn enter(&mut self, state: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(state),
            "illegal transition {} -> {}",
            self.state,
            state
        );
        info!(from = %self.state, to = %state, "pipeline state");
        self.state = state;
    }

    fn begin(&mut self, stage: Stage) {
        self.stage = Some(stage);
    }

    fn report(
        &mut self,
        observer: &mut dyn ProgressObserver,
        stage: Stage,
        percent: u8,
        message: impl Into<String>,
        queue_depth: Option<u32>,
    ) {
        self.progress
            .report(observer, stage, percent, message, queue_depth);
    }
}

/// Request to retexture an existing model
#[derive(Debug, Clone, PartialEq)]
pub struct RetextureRequest {
    pub name: String,
    pub model_url: String,
    pub style_prompt: String,
    pub quality: QualityTier,
    pub category: AssetCategory,
}

/// The orchestrator. Holds no per-run state, so one instance can serve
/// independent runs on separate threads.
pub struct Pipeline {
    collaborators: Collaborators,
    settings: PipelineSettings,
    clock: Arc<dyn Clock>,
}

fn describe(stage: Stage) -> &'static str {
    match stage {
        Stage::EnhancePrompt => "Enhancing prompt",
        Stage::MeshPreview => "Generating preview mesh",
        Stage::MeshRefine => "Refining mesh and textures",
        Stage::ImageToMesh => "Generating mesh from image",
        Stage::Retexture => "Retexturing model",
        Stage::Rig => "Rigging character",
        Stage::ConvertAvatarFormat => "Converting to avatar format",
        Stage::Download => "Downloading artifacts",
        Stage::Persist => "Saving artifacts",
    }
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            collaborators,
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Generate one asset.
    ///
    /// Progress reported to `observer` never decreases and ends at 100 on
    /// success. Every failure, retried or final, is recorded in `history`.
    pub fn run(
        &self,
        request: GenerationRequest,
        observer: &mut dyn ProgressObserver,
        history: &mut ErrorHistory,
    ) -> std::result::Result<GenerationResult, PipelineFailure> {
        let plan = StagePlan::for_request(&request);
        let bands = BandPlan::new(plan.run_rigging);
        let spec = request.quality.spec();
        let mut run = PipelineRun::new();
        let first_mesh_stage = match request.mode {
            GenerationMode::TextToMesh => Stage::MeshPreview,
            GenerationMode::ImageToMesh => Stage::ImageToMesh,
        };

        info!(
            name = %request.name,
            mode = %request.mode,
            quality = %request.quality,
            category = %request.category,
            ?plan,
            "starting generation"
        );

        if let Err(e) = request.validate() {
            return Err(self.fail(&mut run, history, first_mesh_stage, e));
        }

        // Enhancement
        let original_prompt = request.prompt_text().map(str::to_string);
        let mut prompt = original_prompt.clone();
        if plan.run_enhancement {
            run.enter(PipelineState::Enhancing);
            run.begin(Stage::EnhancePrompt);
            run.report(observer, Stage::EnhancePrompt, bands.enhance.start, describe(Stage::EnhancePrompt), None);

            let input = EnhanceInput {
                prompt: original_prompt.clone().unwrap_or_default(),
                context: EnhanceContext {
                    asset_type: request.category.to_string(),
                    is_avatar: plan.run_avatar_conversion,
                },
            };
            let driver = EnhanceDriver::new(self.collaborators.enhancer.as_ref());
            match self.retrying(Stage::EnhancePrompt, history, |_| driver.execute(&input)) {
                Ok(enhanced) => {
                    info!(prompt = %enhanced, "prompt enhanced");
                    run.applied.enhancement = true;
                    prompt = Some(enhanced);
                }
                Err(e) => self.degrade(&mut run, history, Stage::EnhancePrompt, e),
            }
            run.report(observer, Stage::EnhancePrompt, bands.enhance.end, "Prompt ready", None);
        }

        // Mesh generation
        run.enter(PipelineState::MeshGenerating);
        let mesh = match request.mode {
            GenerationMode::TextToMesh => {
                let preview_input = PreviewInput {
                    prompt: prompt.clone().unwrap_or_default(),
                    style: StyleParams {
                        art_style: request.art_style.clone(),
                        negative_prompt: request.negative_prompt.clone(),
                        ai_model: spec.ai_model.to_string(),
                        target_polycount: spec.target_polycount,
                        seed: None,
                    },
                };
                let preview = self.polled(
                    &PreviewDriver::new(self.collaborators.mesh.as_ref()),
                    &preview_input,
                    &bands,
                    self.settings.poll,
                    &mut run,
                    observer,
                    history,
                );
                let preview = match preview {
                    Ok(p) => p,
                    Err(e) => return Err(self.fail(&mut run, history, Stage::MeshPreview, e)),
                };
                run.job_ids
                    .insert(Stage::MeshPreview.to_string(), preview.preview_job_id.clone());

                let refine_input = RefineInput {
                    preview_job_id: preview.preview_job_id,
                    texture: TextureParams {
                        texture_prompt: prompt.clone(),
                        texture_resolution: spec.texture_resolution,
                        enable_pbr: true,
                    },
                };
                let refined = self.polled(
                    &RefineDriver::new(self.collaborators.mesh.as_ref()),
                    &refine_input,
                    &bands,
                    self.settings.poll,
                    &mut run,
                    observer,
                    history,
                );
                match refined {
                    Ok(m) => m,
                    Err(e) => return Err(self.fail(&mut run, history, Stage::MeshRefine, e)),
                }
            }
            GenerationMode::ImageToMesh => {
                let input = ImageToMeshInput {
                    image_url: request.image_url.clone().unwrap_or_default(),
                    params: ImageParams {
                        ai_model: spec.ai_model.to_string(),
                        target_polycount: spec.target_polycount,
                        texture_resolution: spec.texture_resolution,
                        enable_pbr: true,
                    },
                };
                let generated = self.polled(
                    &ImageToMeshDriver::new(self.collaborators.mesh.as_ref()),
                    &input,
                    &bands,
                    self.settings.poll,
                    &mut run,
                    observer,
                    history,
                );
                match generated {
                    Ok(m) => m,
                    Err(e) => return Err(self.fail(&mut run, history, Stage::ImageToMesh, e)),
                }
            }
        };
        let mesh_stage = match request.mode {
            GenerationMode::TextToMesh => Stage::MeshRefine,
            GenerationMode::ImageToMesh => Stage::ImageToMesh,
        };
        run.job_ids.insert(mesh_stage.to_string(), mesh.job_id.clone());
        run.artifacts.source_model_url = Some(mesh.model_url.clone());
        run.artifacts.thumbnail_url = mesh.thumbnail_url.clone();

        let model = match self.download_mesh(&mesh.model_url, &bands, &mut run, observer, history) {
            Ok(m) => m,
            Err(e) => return Err(self.fail(&mut run, history, Stage::Download, e)),
        };
        self.inspect(&mut run, &model, spec.target_polycount);

        // Rigging
        if plan.run_rigging {
            run.enter(PipelineState::Rigging);
            let input = RigInput {
                model_url: mesh.model_url.clone(),
                height_meters: request.height_meters.unwrap_or(self.settings.rig_height_meters),
            };
            let rigged = self.polled(
                &RigDriver::new(
                    self.collaborators.rigger.as_ref(),
                    self.collaborators.fetch.as_ref(),
                ),
                &input,
                &bands,
                self.settings.poll,
                &mut run,
                observer,
                history,
            );
            match rigged {
                Ok(out) => {
                    run.applied.rigging = true;
                    run.job_ids.insert(Stage::Rig.to_string(), out.job_id);
                    run.artifacts.rigged_model = Some(out.rigged_model);
                }
                Err(e) => self.degrade(&mut run, history, Stage::Rig, e),
            }
        }

        // Avatar conversion, on the most processed mesh available
        if plan.run_avatar_conversion {
            run.enter(PipelineState::AvatarConverting);
            run.begin(Stage::ConvertAvatarFormat);
            run.report(
                observer,
                Stage::ConvertAvatarFormat,
                bands.avatar.start,
                describe(Stage::ConvertAvatarFormat),
                None,
            );
            let converted = {
                let source = run.artifacts.rigged_model.as_deref().unwrap_or(&model);
                let driver = AvatarDriver::new(self.collaborators.avatar.as_ref());
                self.retrying(Stage::ConvertAvatarFormat, history, |_| {
                    driver.execute(source, &request.name)
                })
            };
            match converted {
                Ok(conversion) => {
                    run.applied.avatar_conversion = true;
                    run.warnings.extend(conversion.warnings);
                    run.artifacts.avatar = Some(conversion.converted);
                }
                Err(e) => self.degrade(&mut run, history, Stage::ConvertAvatarFormat, e),
            }
            run.report(observer, Stage::ConvertAvatarFormat, bands.avatar.end, "Avatar conversion finished", None);
        }

        let metadata = ResultMetadata {
            name: request.name.clone(),
            prompt: prompt.clone(),
            original_prompt: if run.applied.enhancement {
                original_prompt
            } else {
                None
            },
            image_url: request.image_url.clone(),
            source_model: None,
            mode: Some(request.mode),
            quality: request.quality,
            category: request.category,
            provider: self.collaborators.mesh.name().to_string(),
            ai_model: spec.ai_model.to_string(),
            target_polycount: spec.target_polycount,
            texture_resolution: spec.texture_resolution,
            has_vrm: false,
            triangle_count: None,
            warnings: Vec::new(),
            requested: request.flags,
            applied: AppliedStages::default(),
            job_ids: BTreeMap::new(),
        };
        run.artifacts.model = Some(model);
        self.finish(run, metadata, bands, observer, history)
    }

    /// Retexture an existing model with a style prompt, then persist it like
    /// a generated asset
    pub fn retexture(
        &self,
        request: RetextureRequest,
        observer: &mut dyn ProgressObserver,
        history: &mut ErrorHistory,
    ) -> std::result::Result<GenerationResult, PipelineFailure> {
        let bands = BandPlan::new(false);
        let spec = request.quality.spec();
        let mut run = PipelineRun::new();
        info!(name = %request.name, model = %request.model_url, "starting retexture");

        if request.name.trim().is_empty() {
            let err = ClassifiedError::validation(Some("name"), "Asset name is required");
            return Err(self.fail(&mut run, history, Stage::Retexture, err));
        }

        run.enter(PipelineState::MeshGenerating);
        let input = RetextureInput {
            model_url: request.model_url.clone(),
            style: StyleParams {
                art_style: Some(request.style_prompt.clone()),
                negative_prompt: None,
                ai_model: spec.ai_model.to_string(),
                target_polycount: spec.target_polycount,
                seed: None,
            },
        };
        let retextured = self.polled(
            &RetextureDriver::new(self.collaborators.mesh.as_ref()),
            &input,
            &bands,
            self.settings.slow_poll,
            &mut run,
            observer,
            history,
        );
        let mesh = match retextured {
            Ok(m) => m,
            Err(e) => return Err(self.fail(&mut run, history, Stage::Retexture, e)),
        };
        run.job_ids.insert(Stage::Retexture.to_string(), mesh.job_id.clone());
        run.artifacts.source_model_url = Some(mesh.model_url.clone());
        run.artifacts.thumbnail_url = mesh.thumbnail_url.clone();

        let model = match self.download_mesh(&mesh.model_url, &bands, &mut run, observer, history) {
            Ok(m) => m,
            Err(e) => return Err(self.fail(&mut run, history, Stage::Download, e)),
        };
        self.inspect(&mut run, &model, spec.target_polycount);
        run.artifacts.model = Some(model);

        let metadata = ResultMetadata {
            name: request.name.clone(),
            prompt: Some(request.style_prompt.clone()),
            original_prompt: None,
            image_url: None,
            source_model: Some(request.model_url.clone()),
            mode: None,
            quality: request.quality,
            category: request.category,
            provider: self.collaborators.mesh.name().to_string(),
            ai_model: spec.ai_model.to_string(),
            target_polycount: spec.target_polycount,
            texture_resolution: spec.texture_resolution,
            has_vrm: false,
            triangle_count: None,
            warnings: Vec::new(),
            requested: Default::default(),
            applied: AppliedStages::default(),
            job_ids: BTreeMap::new(),
        };
        self.finish(run, metadata, bands, observer, history)
    }

    /// Fetch the thumbnail, persist everything and build the result
    fn finish(
        &self,
        mut run: PipelineRun,
        mut metadata: ResultMetadata,
        bands: BandPlan,
        observer: &mut dyn ProgressObserver,
        history: &mut ErrorHistory,
    ) -> std::result::Result<GenerationResult, PipelineFailure> {
        run.enter(PipelineState::Persisting);

        if let Some(url) = run.artifacts.thumbnail_url.clone() {
            run.begin(Stage::Download);
            run.report(observer, Stage::Download, bands.persist.start, "Downloading thumbnail", None);
            let fetch = self.collaborators.fetch.as_ref();
            match self.retrying(Stage::Download, history, |_| fetch.download(&url)) {
                Ok(bytes) => run.artifacts.thumbnail = Some(bytes),
                Err(e) => {
                    warn!(url = %url, "thumbnail unavailable: {}", e);
                    history.record(&e, Some(Stage::Download.as_str()));
                    run.warnings.push(format!("thumbnail not saved: {}", e.message()));
                }
            }
        }

        run.begin(Stage::Persist);
        run.report(observer, Stage::Persist, bands.persist.start, describe(Stage::Persist), None);

        metadata.has_vrm = run.artifacts.avatar.is_some();
        metadata.triangle_count = run.triangle_count;
        metadata.applied = run.applied;
        metadata.job_ids = std::mem::take(&mut run.job_ids);
        metadata.warnings = std::mem::take(&mut run.warnings);

        let bundle = ArtifactBundle {
            asset_id: asset_id(&metadata.name),
            model: run.artifacts.model.take().unwrap_or_default(),
            rigged_model: run.artifacts.rigged_model.take(),
            thumbnail: run.artifacts.thumbnail.take(),
            avatar: run.artifacts.avatar.take(),
            metadata,
        };
        let store = self.collaborators.store.as_ref();
        let saved = match self.retrying(Stage::Persist, history, |_| store.save(&bundle)) {
            Ok(saved) => saved,
            Err(e) => return Err(self.fail(&mut run, history, Stage::Persist, e)),
        };
        run.report(observer, Stage::Persist, bands.persist.end, "Artifacts saved", None);

        run.enter(PipelineState::Completed);
        run.report(observer, Stage::Persist, 100, "Completed", None);
        info!(asset = %bundle.asset_id, applied = ?bundle.metadata.applied, "generation completed");

        Ok(GenerationResult {
            asset_id: bundle.asset_id,
            model_url: saved.model_url,
            thumbnail_url: saved.thumbnail_url,
            rigged_model_url: saved.rigged_model_url,
            avatar_url: saved.avatar_url,
            source_model_url: run.artifacts.source_model_url.take().unwrap_or_default(),
            content_hashes: saved.hashes,
            metadata: bundle.metadata,
        })
    }

    /// Run a polled stage under the retry policy, mapping its sub-progress
    /// into the stage's band
    #[allow(clippy::too_many_arguments)]
    fn polled<D: StageDriver>(
        &self,
        driver: &D,
        input: &D::Input,
        bands: &BandPlan,
        options: PollOptions,
        run: &mut PipelineRun,
        observer: &mut dyn ProgressObserver,
        history: &mut ErrorHistory,
    ) -> Result<D::Output> {
        let stage = driver.stage();
        let band = bands.band(stage);
        run.begin(stage);
        run.report(observer, stage, band.start, describe(stage), None);

        let clock = self.clock.as_ref();
        let output = self.retrying(stage, history, |_| {
            let mut on_progress = |progress: u8, queue_depth: Option<u32>| {
                let message = match queue_depth {
                    Some(depth) if depth > 0 => {
                        format!("{} ({}%, {} ahead in queue)", describe(stage), progress, depth)
                    }
                    _ => format!("{} ({}%)", describe(stage), progress),
                };
                run.report(&mut *observer, stage, band.map(progress), message, queue_depth);
            };
            run_polled(driver, input, clock, options, &mut on_progress)
        })?;

        run.report(observer, stage, band.end, format!("{} done", describe(stage)), None);
        Ok(output)
    }

    fn download_mesh(
        &self,
        url: &str,
        bands: &BandPlan,
        run: &mut PipelineRun,
        observer: &mut dyn ProgressObserver,
        history: &mut ErrorHistory,
    ) -> Result<Vec<u8>> {
        let band = bands.band(Stage::Download);
        run.begin(Stage::Download);
        run.report(observer, Stage::Download, band.start, "Downloading mesh", None);
        let fetch = self.collaborators.fetch.as_ref();
        let model = self.retrying(Stage::Download, history, |_| fetch.download(url))?;
        if model.is_empty() {
            return Err(ClassifiedError::generation(
                Some(Stage::Download.as_str()),
                format!("Downloaded mesh from {} is empty", url),
            ));
        }
        run.report(observer, Stage::Download, band.end, "Mesh downloaded", None);
        Ok(model)
    }

    /// Count triangles; never fails the run
    fn inspect(&self, run: &mut PipelineRun, model: &[u8], target_polycount: u32) {
        match inspect_glb(model) {
            Ok(report) => {
                run.triangle_count = Some(report.triangle_count);
                if report.triangle_count > target_polycount as u64 {
                    run.warnings.push(format!(
                        "mesh has {} triangles, above the {} target",
                        report.triangle_count, target_polycount
                    ));
                }
            }
            Err(e) => {
                warn!("mesh inspection failed: {}", e);
                run.warnings.push(format!("mesh inspection failed: {}", e.message()));
            }
        }
    }

    fn retrying<T>(
        &self,
        stage: Stage,
        history: &mut ErrorHistory,
        operation: impl FnMut(u32) -> Result<T>,
    ) -> Result<T> {
        with_retry(
            &self.settings.retry,
            self.clock.as_ref(),
            |notice: &RetryNotice| {
                warn!(
                    stage = stage.as_str(),
                    attempt = notice.attempt,
                    delay_ms = notice.delay.as_millis() as u64,
                    code = notice.error.code(),
                    "retrying after error: {}",
                    notice.error
                );
                history.record(notice.error, Some(stage.as_str()));
            },
            operation,
        )
        .map_err(|e| e.in_stage(stage.as_str()))
    }

    fn degrade(
        &self,
        run: &mut PipelineRun,
        history: &mut ErrorHistory,
        stage: Stage,
        err: ClassifiedError,
    ) {
        debug_assert!(stage.is_optional(), "{} cannot be skipped", stage);
        warn!(
            stage = stage.as_str(),
            code = err.code(),
            "optional stage failed, continuing without it: {}",
            err
        );
        history.record(&err, Some(stage.as_str()));
        run.warnings
            .push(format!("{} not applied: {}", stage, err.message()));
    }

    fn fail(
        &self,
        run: &mut PipelineRun,
        history: &mut ErrorHistory,
        stage: Stage,
        err: ClassifiedError,
    ) -> PipelineFailure {
        let err = err.in_stage(stage.as_str());
        error!(stage = stage.as_str(), code = err.code(), "generation failed: {}", err);
        history.record(&err, Some(stage.as_str()));
        run.enter(PipelineState::Failed { stage });
        PipelineFailure { stage, error: err }
    }
}

/// `<name-slug>-<8 hex>`
fn asset_id(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(48)
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", slug, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryArtifactStore;
    use crate::progress::ProgressEvent;
    use crate::providers::mock::{minimal_glb, MockFailure, MockOp, MockStudio};
    use crate::request::FeatureFlags;
    use anvil_core::{ErrorKind, ManualClock, GENERATION_TIMEOUT};
    use std::time::Duration;

    struct Harness {
        pipeline: Pipeline,
        studio: Arc<MockStudio>,
        store: Arc<MemoryArtifactStore>,
    }

    fn harness_with(studio: MockStudio, store: MemoryArtifactStore) -> Harness {
        let studio = Arc::new(studio);
        let store = Arc::new(store);
        let collaborators = Collaborators {
            mesh: studio.clone(),
            rigger: studio.clone(),
            enhancer: studio.clone(),
            avatar: studio.clone(),
            fetch: studio.clone(),
            store: store.clone(),
        };
        Harness {
            pipeline: Pipeline::new(
                collaborators,
                PipelineSettings::default(),
                Arc::new(ManualClock::new()),
            ),
            studio,
            store,
        }
    }

    fn harness(studio: MockStudio) -> Harness {
        harness_with(studio, MemoryArtifactStore::new())
    }

    fn run_collecting(
        h: &Harness,
        request: GenerationRequest,
    ) -> (
        std::result::Result<GenerationResult, PipelineFailure>,
        Vec<ProgressEvent>,
        ErrorHistory,
    ) {
        let mut events = Vec::new();
        let mut history = ErrorHistory::new();
        let result = {
            let mut observer = |e: &ProgressEvent| events.push(e.clone());
            h.pipeline.run(request, &mut observer, &mut history)
        };
        (result, events, history)
    }

    fn character(flags: FeatureFlags) -> GenerationRequest {
        GenerationRequest::text("armored knight", AssetCategory::Character).with_flags(flags)
    }

    fn assert_monotonic_to_100(events: &[ProgressEvent]) {
        assert!(!events.is_empty());
        for pair in events.windows(2) {
            assert!(
                pair[0].percent <= pair[1].percent,
                "progress went backwards: {:?} -> {:?}",
                pair[0],
                pair[1]
            );
        }
        assert_eq!(events.last().map(|e| e.percent), Some(100));
    }

    #[test]
    fn test_plan_for_request() {
        let item = GenerationRequest::text("chair", AssetCategory::Item).with_flags(FeatureFlags {
            enable_enhancement: true,
            enable_rigging: true,
            convert_to_avatar_format: true,
        });
        assert_eq!(
            StagePlan::for_request(&item),
            StagePlan {
                run_enhancement: true,
                run_rigging: false,
                run_avatar_conversion: false,
            }
        );

        let mut npc = GenerationRequest::image("https://img/goblin.png", "goblin", AssetCategory::Npc);
        npc.flags = FeatureFlags {
            enable_enhancement: true,
            enable_rigging: true,
            convert_to_avatar_format: false,
        };
        assert_eq!(
            StagePlan::for_request(&npc),
            StagePlan {
                run_enhancement: false,
                run_rigging: true,
                run_avatar_conversion: false,
            }
        );
    }

    #[test]
    fn test_state_transitions() {
        use PipelineState::*;
        assert!(Idle.can_transition_to(MeshGenerating));
        assert!(MeshGenerating.can_transition_to(Persisting));
        assert!(Rigging.can_transition_to(Failed { stage: Stage::Rig }));
        assert!(!Persisting.can_transition_to(Rigging));
        assert!(!Completed.can_transition_to(Failed { stage: Stage::Persist }));
        assert!(!Idle.can_transition_to(Completed));
    }

    #[test]
    fn test_iron_sword_scenario() {
        let h = harness(MockStudio::new());
        let request = GenerationRequest::text("iron sword", AssetCategory::Item)
            .with_quality(QualityTier::Medium);

        let (result, events, history) = run_collecting(&h, request);
        let result = result.unwrap();

        assert!(result.model_url.ends_with("model.glb"));
        assert!(result.thumbnail_url.is_some());
        assert!(result.rigged_model_url.is_none());
        assert!(result.avatar_url.is_none());
        assert!(!result.metadata.has_vrm);
        assert_eq!(result.metadata.applied, AppliedStages::default());
        assert_eq!(result.metadata.prompt.as_deref(), Some("iron sword"));
        assert_eq!(result.metadata.target_polycount, 30_000);
        assert_eq!(result.metadata.triangle_count, Some(1));
        assert!(result.metadata.job_ids.contains_key("mesh-preview"));
        assert!(result.metadata.job_ids.contains_key("mesh-refine"));
        assert!(result.source_model_url.starts_with("mock://"));

        assert_eq!(h.store.save_count(), 1);
        assert!(history.is_empty());
        assert_monotonic_to_100(&events);
    }

    #[test]
    fn test_progress_stays_in_stage_bands() {
        let h = harness(MockStudio::new().with_polls_to_finish(5));
        let (result, events, _) = run_collecting(&h, GenerationRequest::text("lantern", AssetCategory::Prop));
        assert!(result.is_ok());

        let bands = BandPlan::new(false);
        for event in &events {
            match event.stage {
                Stage::MeshPreview => assert!(bands.preview.contains(event.percent), "{:?}", event),
                Stage::MeshRefine => assert!(bands.refine.contains(event.percent), "{:?}", event),
                _ => {}
            }
        }
        assert!(events.iter().any(|e| e.queue_depth.is_some()));
        assert_monotonic_to_100(&events);
    }

    #[test]
    fn test_rigged_character_with_failing_avatar_conversion() {
        let studio = MockStudio::new().fail(
            MockOp::Avatar,
            MockFailure::Error(ClassifiedError::generation(None, "converter crashed")),
        );
        let h = harness(studio);
        let request = character(FeatureFlags {
            enable_enhancement: false,
            enable_rigging: true,
            convert_to_avatar_format: true,
        });

        let (result, events, history) = run_collecting(&h, request);
        let result = result.unwrap();

        assert!(result.rigged_model_url.is_some());
        assert!(result.avatar_url.is_none());
        assert!(result.metadata.applied.rigging);
        assert!(!result.metadata.applied.avatar_conversion);
        assert!(!result.metadata.has_vrm);
        assert!(result.metadata.requested.convert_to_avatar_format);
        assert!(result
            .metadata
            .warnings
            .iter()
            .any(|w| w.starts_with("convert-avatar-format not applied")));

        assert_eq!(h.studio.calls(MockOp::Avatar), 3);
        assert_eq!(
            history.latest().and_then(|r| r.stage.as_deref()),
            Some("convert-avatar-format")
        );

        let bands = BandPlan::new(true);
        for event in events.iter().filter(|e| e.stage == Stage::Rig) {
            assert!(bands.rig.contains(event.percent), "{:?}", event);
        }
        assert_monotonic_to_100(&events);
    }

    #[test]
    fn test_failed_rigging_keeps_unrigged_mesh() {
        let studio = MockStudio::new().fail(MockOp::Rig, MockFailure::JobFailed("no skeleton".into()));
        let h = harness(studio);
        let request = character(FeatureFlags {
            enable_enhancement: false,
            enable_rigging: true,
            convert_to_avatar_format: false,
        });

        let (result, events, _) = run_collecting(&h, request);
        let result = result.unwrap();

        assert!(!result.metadata.applied.rigging);
        assert!(result.rigged_model_url.is_none());
        assert_eq!(h.studio.calls(MockOp::Rig), 3);

        let saved = h.store.last().unwrap();
        assert_eq!(saved.model, minimal_glb());
        assert!(saved.rigged_model.is_none());
        assert_monotonic_to_100(&events);
    }

    #[test]
    fn test_avatar_converts_rigged_mesh() {
        let h = harness(MockStudio::new());
        let request = character(FeatureFlags {
            enable_enhancement: true,
            enable_rigging: true,
            convert_to_avatar_format: true,
        });

        let (result, _, _) = run_collecting(&h, request);
        let result = result.unwrap();
        assert!(result.metadata.has_vrm);
        assert!(result.avatar_url.is_some());
        assert_eq!(
            result.metadata.applied,
            AppliedStages {
                enhancement: true,
                rigging: true,
                avatar_conversion: true,
            }
        );
        assert!(result.metadata.prompt.unwrap().contains("T-pose"));
        assert_eq!(result.metadata.original_prompt.as_deref(), Some("armored knight"));
    }

    #[test]
    fn test_refine_exhaustion_is_fatal() {
        let studio = MockStudio::new().fail(MockOp::Refine, MockFailure::JobFailed("boom".into()));
        let h = harness(studio);

        let (result, _, history) = run_collecting(&h, GenerationRequest::text("iron sword", AssetCategory::Item));
        let failure = result.unwrap_err();

        assert_eq!(failure.stage, Stage::MeshRefine);
        assert_eq!(
            failure.error.kind(),
            &ErrorKind::Generation {
                stage: Some("mesh-refine".to_string())
            }
        );
        assert!(failure.error.message().contains("boom"));
        assert_eq!(h.studio.calls(MockOp::Refine), 3);
        assert_eq!(h.store.save_count(), 0);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_enhancement_failure_falls_back_to_original_prompt() {
        let studio = MockStudio::new().fail(
            MockOp::Enhance,
            MockFailure::Error(ClassifiedError::network("connection reset", None, None)),
        );
        let h = harness(studio);
        let request = GenerationRequest::text("iron sword", AssetCategory::Item).with_flags(FeatureFlags {
            enable_enhancement: true,
            ..Default::default()
        });

        let (result, _, _) = run_collecting(&h, request);
        let result = result.unwrap();

        assert!(!result.metadata.applied.enhancement);
        assert_eq!(result.metadata.prompt.as_deref(), Some("iron sword"));
        assert!(result.metadata.original_prompt.is_none());
        assert_eq!(h.studio.calls(MockOp::Enhance), 3);
        assert_eq!(h.studio.prompts(), vec!["iron sword".to_string()]);
    }

    #[test]
    fn test_validation_failure_before_any_provider_call() {
        let h = harness(MockStudio::new());
        let mut request = GenerationRequest::text("iron sword", AssetCategory::Item);
        request.prompt = None;

        let (result, events, _) = run_collecting(&h, request);
        let failure = result.unwrap_err();
        assert_eq!(failure.stage, Stage::MeshPreview);
        assert_eq!(failure.error.exit_code(), 2);
        assert_eq!(h.studio.calls(MockOp::Preview), 0);
        assert!(events.is_empty());
    }

    #[test]
    fn test_rigging_flags_ignored_for_items() {
        let h = harness(MockStudio::new());
        let request = GenerationRequest::text("crate", AssetCategory::Prop).with_flags(FeatureFlags {
            enable_enhancement: false,
            enable_rigging: true,
            convert_to_avatar_format: true,
        });
        let (result, _, _) = run_collecting(&h, request);
        let result = result.unwrap();
        assert_eq!(h.studio.calls(MockOp::Rig), 0);
        assert_eq!(h.studio.calls(MockOp::Avatar), 0);
        assert!(result.metadata.requested.enable_rigging);
        assert!(!result.metadata.applied.rigging);
    }

    #[test]
    fn test_image_to_mesh_skips_preview() {
        let h = harness(MockStudio::new());
        let request = GenerationRequest::image("https://img/statue.png", "statue", AssetCategory::Prop);
        let (result, events, _) = run_collecting(&h, request);
        let result = result.unwrap();

        assert_eq!(h.studio.calls(MockOp::Preview), 0);
        assert_eq!(h.studio.calls(MockOp::ImageToMesh), 1);
        assert!(result.metadata.job_ids.contains_key("image-to-mesh"));
        for event in events.iter().filter(|e| e.stage == Stage::ImageToMesh) {
            assert!((10..=95).contains(&event.percent));
        }
        assert_monotonic_to_100(&events);
    }

    #[test]
    fn test_preview_timeout_is_fatal() {
        let studio = MockStudio::new().fail(MockOp::Preview, MockFailure::Stall);
        let h = harness(studio);
        let (result, _, _) = run_collecting(&h, GenerationRequest::text("iron sword", AssetCategory::Item));
        let failure = result.unwrap_err();
        assert_eq!(failure.stage, Stage::MeshPreview);
        assert_eq!(failure.error.code(), GENERATION_TIMEOUT);
        assert_eq!(h.studio.calls(MockOp::Refine), 0);
    }

    #[test]
    fn test_persistence_failure_is_fatal() {
        let h = harness_with(
            MockStudio::new(),
            MemoryArtifactStore::failing(ClassifiedError::storage(Some("write"), "disk full")),
        );
        let (result, _, _) = run_collecting(&h, GenerationRequest::text("iron sword", AssetCategory::Item));
        let failure = result.unwrap_err();
        assert_eq!(failure.stage, Stage::Persist);
        assert_eq!(failure.error.kind().label(), "storage");
        assert_eq!(h.store.save_count(), 3);
    }

    /// Serves meshes from the mock studio but never thumbnails
    struct NoThumbnails(Arc<MockStudio>);

    impl BinaryFetch for NoThumbnails {
        fn download(&self, url: &str) -> Result<Vec<u8>> {
            if url.ends_with(".png") {
                return Err(ClassifiedError::network("HTTP 404", Some(404), Some(url)));
            }
            self.0.download(url)
        }
    }

    #[test]
    fn test_missing_thumbnail_is_only_a_warning() {
        let studio = Arc::new(MockStudio::new());
        let store = Arc::new(MemoryArtifactStore::new());
        let collaborators = Collaborators {
            mesh: studio.clone(),
            rigger: studio.clone(),
            enhancer: studio.clone(),
            avatar: studio.clone(),
            fetch: Arc::new(NoThumbnails(studio.clone())),
            store: store.clone(),
        };
        let pipeline = Pipeline::new(
            collaborators,
            PipelineSettings::default(),
            Arc::new(ManualClock::new()),
        );
        let mut history = ErrorHistory::new();
        let result = pipeline
            .run(
                GenerationRequest::text("iron sword", AssetCategory::Item),
                &mut crate::progress::NoProgress,
                &mut history,
            )
            .unwrap();

        assert!(result.thumbnail_url.is_none());
        assert!(result
            .metadata
            .warnings
            .iter()
            .any(|w| w.starts_with("thumbnail not saved")));
        assert_eq!(history.latest().and_then(|r| r.stage.as_deref()), Some("download"));
        assert!(store.last().unwrap().thumbnail.is_none());
    }

    #[test]
    fn test_retexture() {
        let h = harness(MockStudio::new());
        let mut events = Vec::new();
        let mut history = ErrorHistory::new();
        let request = RetextureRequest {
            name: "old chair".to_string(),
            model_url: "https://cdn/chair.glb".to_string(),
            style_prompt: "lacquered red wood".to_string(),
            quality: QualityTier::High,
            category: AssetCategory::Prop,
        };

        let result = {
            let mut observer = |e: &ProgressEvent| events.push(e.clone());
            h.pipeline.retexture(request, &mut observer, &mut history).unwrap()
        };
        assert_eq!(h.studio.calls(MockOp::Retexture), 1);
        assert_eq!(result.metadata.source_model.as_deref(), Some("https://cdn/chair.glb"));
        assert!(result.metadata.mode.is_none());
        assert!(result.asset_id.starts_with("old_chair-"));
        assert_monotonic_to_100(&events);
    }

    #[test]
    fn test_retexture_requires_style() {
        let h = harness(MockStudio::new());
        let request = RetextureRequest {
            name: "old chair".to_string(),
            model_url: "https://cdn/chair.glb".to_string(),
            style_prompt: " ".to_string(),
            quality: QualityTier::Medium,
            category: AssetCategory::Prop,
        };
        let failure = h
            .pipeline
            .retexture(request, &mut crate::progress::NoProgress, &mut ErrorHistory::new())
            .unwrap_err();
        assert_eq!(failure.stage, Stage::Retexture);
        assert_eq!(failure.error.kind().label(), "validation");
        assert_eq!(h.studio.calls(MockOp::Retexture), 0);
    }

    #[test]
    fn test_independent_runs_on_separate_threads() {
        let h = harness(MockStudio::new());
        let pipeline = &h.pipeline;
        std::thread::scope(|scope| {
            let handles: Vec<_> = ["sword", "shield"]
                .iter()
                .map(|prompt| {
                    scope.spawn(move || {
                        let mut history = ErrorHistory::new();
                        pipeline.run(
                            GenerationRequest::text(prompt, AssetCategory::Item),
                            &mut crate::progress::NoProgress,
                            &mut history,
                        )
                    })
                })
                .collect();
            for handle in handles {
                assert!(handle.join().unwrap().is_ok());
            }
        });
        assert_eq!(h.store.save_count(), 2);
    }

    #[test]
    fn test_retry_waits_use_injected_clock() {
        let clock = Arc::new(ManualClock::new());
        let studio = Arc::new(MockStudio::new().fail(
            MockOp::Preview,
            MockFailure::Flaky {
                times: 2,
                error: ClassifiedError::network("HTTP 503", Some(503), None),
            },
        ));
        let collaborators = Collaborators {
            mesh: studio.clone(),
            rigger: studio.clone(),
            enhancer: studio.clone(),
            avatar: studio.clone(),
            fetch: studio.clone(),
            store: Arc::new(MemoryArtifactStore::new()),
        };
        let pipeline = Pipeline::new(collaborators, PipelineSettings::default(), clock.clone());
        let mut history = ErrorHistory::new();
        let result = pipeline.run(
            GenerationRequest::text("iron sword", AssetCategory::Item),
            &mut crate::progress::NoProgress,
            &mut history,
        );
        assert!(result.is_ok());
        assert_eq!(studio.calls(MockOp::Preview), 3);
        assert_eq!(history.len(), 2);

        let sleeps = clock.sleeps();
        assert_eq!(sleeps[0], Duration::from_millis(1000));
        assert_eq!(sleeps[1], Duration::from_millis(2000));
    }
}
