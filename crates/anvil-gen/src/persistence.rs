//! Artifact persistence
//!
//! [`LocalArtifactStore`] writes each asset into its own directory:
//!
//! ```text
//! <root>/<asset_id>/model.glb
//! <root>/<asset_id>/rigged.glb        (when rigging succeeded)
//! <root>/<asset_id>/thumbnail.png     (when a thumbnail was produced)
//! <root>/<asset_id>/avatar.vrm        (when avatar conversion succeeded)
//! <root>/<asset_id>/<asset_id>.asset.toml
//! ```

use crate::provider::{ArtifactBundle, ArtifactStore, SavedArtifacts};
use crate::result::ResultMetadata;
use anvil_core::{ClassifiedError, ContentHash, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const MODEL_FILE: &str = "model.glb";
pub const RIGGED_FILE: &str = "rigged.glb";
pub const THUMBNAIL_FILE: &str = "thumbnail.png";
pub const AVATAR_FILE: &str = "avatar.vrm";

/// Sidecar written next to the stored files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSidecar {
    pub asset: SidecarHeader,
    /// Content hash per stored file
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarHeader {
    pub id: String,
    pub name: String,
    /// Seconds since the Unix epoch
    pub saved_at: u64,
}

/// Stores artifacts on the local filesystem and returns `file://` URLs
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one asset's files
    pub fn asset_dir(&self, asset_id: &str) -> PathBuf {
        self.root.join(asset_id)
    }

    /// Read back the sidecar of a stored asset
    pub fn load_sidecar(&self, asset_id: &str) -> Result<AssetSidecar> {
        let path = self
            .asset_dir(asset_id)
            .join(format!("{}.asset.toml", asset_id));
        let content = fs::read_to_string(&path).map_err(|e| io_error("read", &path, e))?;
        Ok(toml::from_str(&content)?)
    }

    fn write_file(
        &self,
        dir: &Path,
        file_name: &str,
        data: &[u8],
        hashes: &mut BTreeMap<String, String>,
    ) -> Result<String> {
        let path = dir.join(file_name);
        fs::write(&path, data).map_err(|e| io_error("write", &path, e))?;
        hashes.insert(file_name.to_string(), ContentHash::of(data).to_prefixed_hex());
        file_url(&path)
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn save(&self, bundle: &ArtifactBundle) -> Result<SavedArtifacts> {
        check_asset_id(&bundle.asset_id)?;
        if bundle.model.is_empty() {
            return Err(ClassifiedError::validation(
                Some("model"),
                "Cannot persist an empty model",
            ));
        }

        let dir = self.asset_dir(&bundle.asset_id);
        fs::create_dir_all(&dir).map_err(|e| io_error("create_dir", &dir, e))?;

        let mut hashes = BTreeMap::new();
        let model_url = self.write_file(&dir, MODEL_FILE, &bundle.model, &mut hashes)?;
        let rigged_model_url = bundle
            .rigged_model
            .as_deref()
            .map(|data| self.write_file(&dir, RIGGED_FILE, data, &mut hashes))
            .transpose()?;
        let thumbnail_url = bundle
            .thumbnail
            .as_deref()
            .map(|data| self.write_file(&dir, THUMBNAIL_FILE, data, &mut hashes))
            .transpose()?;
        let avatar_url = bundle
            .avatar
            .as_deref()
            .map(|data| self.write_file(&dir, AVATAR_FILE, data, &mut hashes))
            .transpose()?;

        let sidecar = AssetSidecar {
            asset: SidecarHeader {
                id: bundle.asset_id.clone(),
                name: bundle.metadata.name.clone(),
                saved_at: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
            },
            files: hashes.clone(),
            metadata: bundle.metadata.clone(),
        };
        let toml_str = toml::to_string_pretty(&sidecar)?;
        let sidecar_path = dir.join(format!("{}.asset.toml", bundle.asset_id));
        fs::write(&sidecar_path, toml_str).map_err(|e| io_error("write", &sidecar_path, e))?;

        tracing::info!(asset = %bundle.asset_id, dir = %dir.display(), "artifacts saved");

        Ok(SavedArtifacts {
            model_url,
            rigged_model_url,
            thumbnail_url,
            avatar_url,
            hashes,
        })
    }
}

fn check_asset_id(asset_id: &str) -> Result<()> {
    let ok = !asset_id.is_empty()
        && asset_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ClassifiedError::validation(
            Some("asset_id"),
            format!("Invalid asset id '{}'", asset_id),
        ))
    }
}

fn io_error(operation: &str, path: &Path, err: std::io::Error) -> ClassifiedError {
    ClassifiedError::storage(
        Some(operation),
        format!("Failed to {} {}: {}", operation, path.display(), err),
    )
    .with_source(err)
}

fn file_url(path: &Path) -> Result<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| io_error("resolve", path, e))?
            .join(path)
    };
    Ok(format!("file://{}", absolute.display()))
}

/// In-memory store that keeps every bundle it was asked to save
#[derive(Default)]
pub struct MemoryArtifactStore {
    saved: Mutex<Vec<ArtifactBundle>>,
    failure: Option<ClassifiedError>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every save fails with `error`
    pub fn failing(error: ClassifiedError) -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            failure: Some(error),
        }
    }

    /// Number of save calls, including failed ones
    pub fn save_count(&self) -> usize {
        self.lock().len()
    }

    pub fn last(&self) -> Option<ArtifactBundle> {
        self.lock().last().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ArtifactBundle>> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn save(&self, bundle: &ArtifactBundle) -> Result<SavedArtifacts> {
        self.lock().push(bundle.clone());
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let base = format!("memory://{}", bundle.asset_id);
        let mut hashes = BTreeMap::new();
        hashes.insert(
            MODEL_FILE.to_string(),
            ContentHash::of(&bundle.model).to_prefixed_hex(),
        );
        Ok(SavedArtifacts {
            model_url: format!("{}/{}", base, MODEL_FILE),
            rigged_model_url: bundle
                .rigged_model
                .as_ref()
                .map(|_| format!("{}/{}", base, RIGGED_FILE)),
            thumbnail_url: bundle
                .thumbnail
                .as_ref()
                .map(|_| format!("{}/{}", base, THUMBNAIL_FILE)),
            avatar_url: bundle
                .avatar
                .as_ref()
                .map(|_| format!("{}/{}", base, AVATAR_FILE)),
            hashes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{AssetCategory, FeatureFlags, GenerationMode, QualityTier};
    use crate::result::AppliedStages;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("anvil_store_test_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn bundle(asset_id: &str) -> ArtifactBundle {
        ArtifactBundle {
            asset_id: asset_id.to_string(),
            model: b"glTF-model".to_vec(),
            rigged_model: None,
            thumbnail: Some(b"png".to_vec()),
            avatar: None,
            metadata: ResultMetadata {
                name: "iron_sword".to_string(),
                prompt: Some("iron sword".to_string()),
                original_prompt: None,
                image_url: None,
                source_model: None,
                mode: Some(GenerationMode::TextToMesh),
                quality: QualityTier::Medium,
                category: AssetCategory::Item,
                provider: "mock".to_string(),
                ai_model: "meshy-4".to_string(),
                target_polycount: 30_000,
                texture_resolution: 2048,
                has_vrm: false,
                triangle_count: None,
                warnings: vec!["heads up".to_string()],
                requested: FeatureFlags::default(),
                applied: AppliedStages::default(),
                job_ids: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn test_local_store_writes_files_and_sidecar() {
        let dir = temp_dir();
        let store = LocalArtifactStore::new(&dir);

        let saved = store.save(&bundle("iron_sword-1")).unwrap();
        assert!(saved.model_url.starts_with("file://"));
        assert!(saved.model_url.ends_with(MODEL_FILE));
        assert!(saved.thumbnail_url.is_some());
        assert!(saved.rigged_model_url.is_none());
        assert!(saved.avatar_url.is_none());

        let asset_dir = store.asset_dir("iron_sword-1");
        assert_eq!(fs::read(asset_dir.join(MODEL_FILE)).unwrap(), b"glTF-model");
        assert!(!asset_dir.join(AVATAR_FILE).exists());

        let sidecar = store.load_sidecar("iron_sword-1").unwrap();
        assert_eq!(sidecar.asset.name, "iron_sword");
        assert_eq!(sidecar.files.len(), 2);
        assert!(sidecar.files[MODEL_FILE].starts_with("sha256:"));
        assert_eq!(sidecar.metadata.warnings, vec!["heads up".to_string()]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rejects_path_like_asset_id() {
        let dir = temp_dir();
        let store = LocalArtifactStore::new(&dir);
        let err = store.save(&bundle("../escape")).unwrap_err();
        assert_eq!(err.kind().label(), "validation");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unwritable_root_is_storage_error() {
        let dir = temp_dir();
        let blocker = dir.join("blocker");
        fs::write(&blocker, b"file, not a directory").unwrap();
        let store = LocalArtifactStore::new(&blocker);

        let err = store.save(&bundle("a1")).unwrap_err();
        assert_eq!(err.kind().label(), "storage");
        assert!(err.is_retryable());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_memory_store_records_bundles() {
        let store = MemoryArtifactStore::new();
        let saved = store.save(&bundle("m1")).unwrap();
        assert_eq!(saved.model_url, "memory://m1/model.glb");
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.last().unwrap().asset_id, "m1");
    }
}
