//! Anvil Gen - asset generation pipeline
//!
//! Drives a generation request through remote mesh, rigging and avatar
//! conversion jobs, polls them to completion with bounded timeouts, retries
//! classified failures, and persists the resulting artifacts.

pub mod batch;
pub mod config;
pub mod inspect;
pub mod job;
pub mod persistence;
pub mod pipeline;
pub mod poller;
pub mod progress;
pub mod provider;
pub mod providers;
pub mod request;
pub mod result;
pub mod stages;

pub use batch::{run_batch, BatchReport};
pub use config::AnvilConfig;
pub use job::{JobHandle, JobKind, JobStatus, RemoteStatus};
pub use persistence::{LocalArtifactStore, MemoryArtifactStore};
pub use pipeline::{
    Collaborators, Pipeline, PipelineFailure, PipelineSettings, PipelineState, RetextureRequest,
    StagePlan,
};
pub use poller::{PollOptions, TaskPoller};
pub use progress::{NoProgress, ProgressEvent, ProgressObserver};
pub use provider::{
    ArtifactStore, AvatarConverter, BinaryFetch, MeshProvider, PromptEnhancer, RiggingProvider,
};
pub use request::{AssetCategory, FeatureFlags, GenerationMode, GenerationRequest, QualityTier};
pub use result::{AppliedStages, GenerationResult, ResultMetadata};
pub use stages::Stage;
