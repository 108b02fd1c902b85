//! Remote job handles and status
//!
//! Providers report status in their own vocabulary ([`RemoteStatus`]);
//! [`JobStatus`] is the normalized form the poller acts on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// The kind of remote job behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Preview,
    Refine,
    ImageToMesh,
    Retexture,
    Rig,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Preview => write!(f, "preview"),
            JobKind::Refine => write!(f, "refine"),
            JobKind::ImageToMesh => write!(f, "image-to-mesh"),
            JobKind::Retexture => write!(f, "retexture"),
            JobKind::Rig => write!(f, "rig"),
        }
    }
}

/// Identifier of a submitted remote job.
///
/// Not `Clone`: a handle is moved into the poller and handed
/// back only with the terminal status.
#[derive(Debug, PartialEq, Eq)]
pub struct JobHandle {
    id: String,
    kind: JobKind,
}

impl JobHandle {
    pub fn new(id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

/// Result URLs of a successful job, keyed by provider asset name
/// (`glb`, `thumbnail`, `rigged_glb`, ...)
pub type OutputUrls = BTreeMap<String, String>;

pub const GLB_URL: &str = "glb";
pub const THUMBNAIL_URL: &str = "thumbnail";
pub const RIGGED_GLB_URL: &str = "rigged_glb";

/// Normalized job status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running {
        progress: u8,
        queue_depth: Option<u32>,
    },
    Succeeded {
        outputs: OutputUrls,
    },
    Failed {
        message: String,
    },
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded { .. } | JobStatus::Failed { .. } | JobStatus::Canceled
        )
    }
}

/// Raw status record returned by a provider's status query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub status: String,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub queue_depth: Option<u32>,
    #[serde(default)]
    pub result_urls: OutputUrls,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl From<RemoteStatus> for JobStatus {
    fn from(remote: RemoteStatus) -> Self {
        match remote.status.to_ascii_uppercase().as_str() {
            "SUCCEEDED" | "SUCCESS" | "COMPLETED" => JobStatus::Succeeded {
                outputs: remote.result_urls,
            },
            "FAILED" | "EXPIRED" | "ERROR" => JobStatus::Failed {
                message: remote
                    .error_message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            },
            "CANCELED" | "CANCELLED" => JobStatus::Canceled,
            "PENDING" | "QUEUED" => match remote.progress {
                Some(p) if p > 0 => JobStatus::Running {
                    progress: p.min(100),
                    queue_depth: remote.queue_depth,
                },
                _ => JobStatus::Queued,
            },
            // Running without a reported progress is indistinguishable from queued
            _ => match remote.progress {
                Some(p) => JobStatus::Running {
                    progress: p.min(100),
                    queue_depth: remote.queue_depth,
                },
                None => JobStatus::Queued,
            },
        }
    }
}

/// A job that reached `Succeeded`, returned to the driver that submitted it
#[derive(Debug)]
pub struct TerminalJob {
    pub handle: JobHandle,
    pub outputs: OutputUrls,
    pub elapsed: Duration,
}

impl TerminalJob {
    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).map(String::as_str)
    }
}
