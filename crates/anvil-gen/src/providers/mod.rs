//! Provider registry
//!
//! Maps a provider name to a full set of pipeline collaborators.

pub mod avatar;
pub mod enhancer;
pub mod http;
pub mod meshy;
pub mod mock;

use crate::config::AnvilConfig;
use crate::pipeline::Collaborators;
use crate::provider::*;
use anvil_core::{ClassifiedError, Result};
use std::sync::Arc;

/// Create the collaborators for a provider by name
pub fn create_studio(
    name: &str,
    config: &AnvilConfig,
    store: Arc<dyn ArtifactStore>,
) -> Result<Collaborators> {
    if !config.is_enabled(name) {
        return Err(ClassifiedError::validation(
            Some("provider"),
            format!("Provider '{}' is disabled in config", name),
        ));
    }
    match name {
        "mock" => {
            let studio = Arc::new(mock::MockStudio::new());
            Ok(Collaborators {
                mesh: studio.clone(),
                rigger: studio.clone(),
                enhancer: studio.clone(),
                avatar: studio.clone(),
                fetch: studio,
                store,
            })
        }
        "meshy" => {
            let meshy = Arc::new(meshy::MeshyProvider::from_config(config)?);
            let enhancer: Arc<dyn PromptEnhancer> =
                match enhancer::ChatPromptEnhancer::from_config(config) {
                    Ok(e) => Arc::new(e),
                    Err(e) => Arc::new(Unavailable(e)),
                };
            let avatar: Arc<dyn AvatarConverter> =
                match avatar::HttpAvatarConverter::from_config(config) {
                    Ok(a) => Arc::new(a),
                    Err(e) => Arc::new(Unavailable(e)),
                };
            Ok(Collaborators {
                mesh: meshy.clone(),
                rigger: meshy,
                enhancer,
                avatar,
                fetch: Arc::new(http::HttpFetcher::new()),
                store,
            })
        }
        _ => Err(ClassifiedError::validation(
            Some("provider"),
            format!(
                "Unknown provider '{}'. Available: {}",
                name,
                available_providers().join(", ")
            ),
        )),
    }
}

/// List all available provider names
pub fn available_providers() -> Vec<&'static str> {
    vec!["mock", "meshy"]
}

/// Stands in for an optional collaborator that could not be configured.
/// Every call returns the configuration error.
pub struct Unavailable(pub ClassifiedError);

impl PromptEnhancer for Unavailable {
    fn enhance(&self, _prompt: &str, _context: &EnhanceContext) -> Result<Enhancement> {
        Err(self.0.clone())
    }
}

impl AvatarConverter for Unavailable {
    fn convert(&self, _mesh: &[u8], _display_name: &str) -> Result<AvatarConversion> {
        Err(self.0.clone())
    }
}
