//! Mock studio for offline runs and tests
//!
//! Implements every remote collaborator without network calls. Jobs finish
//! after a fixed number of status polls, downloads of `mock://` URLs return
//! a minimal GLB or a solid-color PNG, and any operation can be told to fail.

use crate::job::{JobHandle, RemoteStatus, GLB_URL, RIGGED_GLB_URL, THUMBNAIL_URL};
use crate::provider::*;
use anvil_core::{ClassifiedError, Result};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard};

/// Operations that can be counted and failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MockOp {
    Enhance,
    Preview,
    Refine,
    ImageToMesh,
    Retexture,
    Rig,
    Avatar,
    Download,
    Status,
}

impl MockOp {
    fn label(self) -> &'static str {
        match self {
            MockOp::Enhance => "enhance",
            MockOp::Preview => "preview",
            MockOp::Refine => "refine",
            MockOp::ImageToMesh => "image",
            MockOp::Retexture => "retexture",
            MockOp::Rig => "rig",
            MockOp::Avatar => "avatar",
            MockOp::Download => "download",
            MockOp::Status => "status",
        }
    }
}

/// How an operation misbehaves
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// Every call returns this error
    Error(ClassifiedError),
    /// The first `times` calls return the error, later calls succeed
    Flaky { times: usize, error: ClassifiedError },
    /// Jobs are accepted but end `FAILED`; synchronous calls are declined
    JobFailed(String),
    /// Jobs never reach a terminal status
    Stall,
}

enum Outcome {
    Succeed,
    Fail(String),
    Stall,
}

struct MockJob {
    op: MockOp,
    polls: u32,
    outcome: Outcome,
}

#[derive(Default)]
struct MockState {
    calls: BTreeMap<MockOp, usize>,
    jobs: HashMap<String, MockJob>,
    prompts: Vec<String>,
    next_id: u64,
}

/// Deterministic in-process stand-in for the remote services
pub struct MockStudio {
    failures: HashMap<MockOp, MockFailure>,
    polls_to_finish: u32,
    state: Mutex<MockState>,
}

impl Default for MockStudio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStudio {
    pub fn new() -> Self {
        Self {
            failures: HashMap::new(),
            polls_to_finish: 3,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn fail(mut self, op: MockOp, failure: MockFailure) -> Self {
        self.failures.insert(op, failure);
        self
    }

    /// Status polls before a job succeeds (at least 1)
    pub fn with_polls_to_finish(mut self, polls: u32) -> Self {
        self.polls_to_finish = polls.max(1);
        self
    }

    /// Number of calls made to `op`, including failed ones
    pub fn calls(&self, op: MockOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Prompts submitted for preview generation, in order
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count the call and apply any injected error
    fn enter(&self, op: MockOp) -> Result<()> {
        let count = {
            let mut state = self.lock();
            let count = state.calls.entry(op).or_insert(0);
            *count += 1;
            *count
        };
        match self.failures.get(&op) {
            Some(MockFailure::Error(err)) => Err(err.clone()),
            Some(MockFailure::Flaky { times, error }) if count <= *times => Err(error.clone()),
            _ => Ok(()),
        }
    }

    fn start_job(&self, op: MockOp) -> Result<String> {
        self.enter(op)?;
        let outcome = match self.failures.get(&op) {
            Some(MockFailure::JobFailed(message)) => Outcome::Fail(message.clone()),
            Some(MockFailure::Stall) => Outcome::Stall,
            _ => Outcome::Succeed,
        };
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("mock-{}-{}", op.label(), state.next_id);
        state.jobs.insert(
            id.clone(),
            MockJob {
                op,
                polls: 0,
                outcome,
            },
        );
        Ok(id)
    }

    fn declined(&self, op: MockOp) -> Option<&str> {
        match self.failures.get(&op) {
            Some(MockFailure::JobFailed(message)) => Some(message),
            _ => None,
        }
    }
}

impl JobStatusSource for MockStudio {
    fn get_status(&self, handle: &JobHandle) -> Result<RemoteStatus> {
        self.enter(MockOp::Status)?;
        let mut state = self.lock();
        let job = state.jobs.get_mut(handle.id()).ok_or_else(|| {
            ClassifiedError::network(
                format!("Unknown mock job {}", handle.id()),
                Some(404),
                Some("mock://status"),
            )
        })?;
        job.polls += 1;

        let running = |progress: u32| RemoteStatus {
            status: "IN_PROGRESS".to_string(),
            progress: Some(progress.min(99) as u8),
            ..Default::default()
        };

        let status = match &job.outcome {
            Outcome::Stall => running(job.polls * 10),
            _ if job.polls < self.polls_to_finish => {
                let mut status = running(job.polls * 100 / self.polls_to_finish);
                status.queue_depth = Some(self.polls_to_finish - job.polls);
                status
            }
            Outcome::Fail(message) => RemoteStatus {
                status: "FAILED".to_string(),
                error_message: Some(message.clone()),
                ..Default::default()
            },
            Outcome::Succeed => {
                let id = handle.id();
                let mut urls = BTreeMap::new();
                match job.op {
                    MockOp::Rig => {
                        urls.insert(RIGGED_GLB_URL.to_string(), format!("mock://{}/rigged.glb", id));
                    }
                    MockOp::Preview => {
                        urls.insert(GLB_URL.to_string(), format!("mock://{}/preview.glb", id));
                    }
                    _ => {
                        urls.insert(GLB_URL.to_string(), format!("mock://{}/model.glb", id));
                        urls.insert(
                            THUMBNAIL_URL.to_string(),
                            format!("mock://{}/thumbnail.png", id),
                        );
                    }
                }
                RemoteStatus {
                    status: "SUCCEEDED".to_string(),
                    progress: Some(100),
                    result_urls: urls,
                    ..Default::default()
                }
            }
        };
        Ok(status)
    }
}

impl MeshProvider for MockStudio {
    fn name(&self) -> &str {
        "mock"
    }

    fn submit_preview(&self, prompt: &str, _style: &StyleParams) -> Result<String> {
        self.lock().prompts.push(prompt.to_string());
        self.start_job(MockOp::Preview)
    }

    fn submit_refine(&self, _preview_job_id: &str, _texture: &TextureParams) -> Result<String> {
        self.start_job(MockOp::Refine)
    }

    fn submit_image_to_mesh(&self, _image_url: &str, _params: &ImageParams) -> Result<String> {
        self.start_job(MockOp::ImageToMesh)
    }

    fn submit_retexture(&self, _model_url: &str, _style: &StyleParams) -> Result<String> {
        self.start_job(MockOp::Retexture)
    }
}

impl RiggingProvider for MockStudio {
    fn submit_rig(&self, _model_url: &str, _height_meters: f32) -> Result<String> {
        self.start_job(MockOp::Rig)
    }
}

impl PromptEnhancer for MockStudio {
    fn enhance(&self, prompt: &str, context: &EnhanceContext) -> Result<Enhancement> {
        self.enter(MockOp::Enhance)?;
        if let Some(reason) = self.declined(MockOp::Enhance) {
            return Ok(Enhancement {
                enhanced_prompt: String::new(),
                error: Some(reason.to_string()),
            });
        }
        let suffix = if context.is_avatar {
            "T-pose, humanoid proportions, game-ready"
        } else {
            "game-ready, detailed PBR materials"
        };
        Ok(Enhancement {
            enhanced_prompt: format!("{}, {}", prompt, suffix),
            error: None,
        })
    }
}

impl AvatarConverter for MockStudio {
    fn convert(&self, mesh: &[u8], display_name: &str) -> Result<AvatarConversion> {
        self.enter(MockOp::Avatar)?;
        if let Some(reason) = self.declined(MockOp::Avatar) {
            return Err(ClassifiedError::generation(
                Some("convert-avatar-format"),
                format!("Avatar conversion failed: {}", reason),
            ));
        }
        Ok(AvatarConversion {
            converted: mesh.to_vec(),
            warnings: vec![format!("{}: no humanoid bone mapping in mock output", display_name)],
        })
    }
}

impl BinaryFetch for MockStudio {
    fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.enter(MockOp::Download)?;
        if !url.starts_with("mock://") {
            return Err(ClassifiedError::network(
                format!("Mock studio cannot fetch {}", url),
                Some(404),
                Some(url),
            ));
        }
        if url.ends_with(".glb") || url.ends_with(".vrm") {
            Ok(minimal_glb())
        } else if url.ends_with(".png") {
            thumbnail_png(url)
        } else {
            Err(ClassifiedError::network(
                format!("Not found: {}", url),
                Some(404),
                Some(url),
            ))
        }
    }
}

/// A minimal valid glTF 2.0 binary holding a single indexed triangle
pub fn minimal_glb() -> Vec<u8> {
    let json = serde_json::json!({
        "asset": { "version": "2.0", "generator": "anvil-mock" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{
            "primitives": [{
                "attributes": { "POSITION": 0 },
                "indices": 1
            }]
        }],
        "accessors": [
            {
                "bufferView": 0,
                "componentType": 5126,
                "count": 3,
                "type": "VEC3",
                "max": [1.0, 1.0, 0.0],
                "min": [-1.0, 0.0, 0.0]
            },
            {
                "bufferView": 1,
                "componentType": 5123,
                "count": 3,
                "type": "SCALAR",
                "max": [2],
                "min": [0]
            }
        ],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963 }
        ],
        "buffers": [{ "byteLength": 44 }]
    });

    let mut json_chunk = json.to_string().into_bytes();
    json_chunk.resize((json_chunk.len() + 3) & !3, b' ');

    let vertices: [f32; 9] = [-1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let indices: [u16; 3] = [0, 1, 2];
    let mut bin_chunk = Vec::with_capacity(44);
    for v in &vertices {
        bin_chunk.extend_from_slice(&v.to_le_bytes());
    }
    for i in &indices {
        bin_chunk.extend_from_slice(&i.to_le_bytes());
    }
    bin_chunk.resize((bin_chunk.len() + 3) & !3, 0);

    let total_len = 12 + 8 + json_chunk.len() as u32 + 8 + bin_chunk.len() as u32;
    let mut out = Vec::with_capacity(total_len as usize);
    out.extend_from_slice(b"glTF");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&total_len.to_le_bytes());

    out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(&0x4E4F534Au32.to_le_bytes()); // "JSON"
    out.extend_from_slice(&json_chunk);

    out.extend_from_slice(&(bin_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(&0x004E4942u32.to_le_bytes()); // "BIN\0"
    out.extend_from_slice(&bin_chunk);
    out
}

/// A 64x64 solid-color PNG whose color is derived from `seed`
pub fn thumbnail_png(seed: &str) -> Result<Vec<u8>> {
    let hash = seed
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    let color = image::Rgba([(hash >> 16) as u8, (hash >> 8) as u8, hash as u8, 255]);
    let img = image::RgbaImage::from_pixel(64, 64, color);

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).map_err(|e| {
        ClassifiedError::generation(Some("download"), format!("Failed to encode PNG: {}", e))
    })?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, JobStatus};

    #[test]
    fn test_glb_layout() {
        let glb = minimal_glb();
        assert_eq!(&glb[..4], b"glTF");
        let total = u32::from_le_bytes([glb[8], glb[9], glb[10], glb[11]]);
        assert_eq!(total as usize, glb.len());
        assert_eq!(glb.len() % 4, 0);
    }

    #[test]
    fn test_thumbnail_is_png() {
        let png = thumbnail_png("mock://x/thumbnail.png").unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!(img.width(), 64);
    }

    #[test]
    fn test_job_finishes_after_configured_polls() {
        let studio = MockStudio::new().with_polls_to_finish(2);
        let id = studio
            .submit_refine("p-1", &TextureParams::default())
            .unwrap();
        let handle = JobHandle::new(id, JobKind::Refine);

        let first = JobStatus::from(studio.get_status(&handle).unwrap());
        assert!(!first.is_terminal());
        let second = JobStatus::from(studio.get_status(&handle).unwrap());
        match second {
            JobStatus::Succeeded { outputs } => {
                assert!(outputs.contains_key(GLB_URL));
                assert!(outputs.contains_key(THUMBNAIL_URL));
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(studio.calls(MockOp::Status), 2);
    }

    #[test]
    fn test_flaky_failure_recovers() {
        let studio = MockStudio::new().fail(
            MockOp::Download,
            MockFailure::Flaky {
                times: 1,
                error: ClassifiedError::network("connection reset", None, None),
            },
        );
        assert!(studio.download("mock://a/model.glb").is_err());
        assert!(studio.download("mock://a/model.glb").is_ok());
        assert_eq!(studio.calls(MockOp::Download), 2);
    }

    #[test]
    fn test_unknown_url_is_network_error() {
        let studio = MockStudio::new();
        let err = studio.download("https://elsewhere/model.glb").unwrap_err();
        assert_eq!(err.kind().label(), "network");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_declined_enhancement() {
        let studio = MockStudio::new().fail(MockOp::Enhance, MockFailure::JobFailed("nope".into()));
        let ctx = EnhanceContext {
            asset_type: "item".to_string(),
            is_avatar: false,
        };
        let out = studio.enhance("sword", &ctx).unwrap();
        assert_eq!(out.error.as_deref(), Some("nope"));
    }
}
