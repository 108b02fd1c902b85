//! HTTP client for the avatar-format (VRM) conversion service
//!
//! The service takes a GLB body and answers with the converted file.
//! Conversion warnings come back `;`-separated in a response header.

use super::http::{HttpClient, REQUEST_TIMEOUT};
use crate::config::AnvilConfig;
use crate::provider::{AvatarConversion, AvatarConverter};
use anvil_core::{ClassifiedError, Result};

const WARNINGS_HEADER: &str = "X-Conversion-Warnings";

pub struct HttpAvatarConverter {
    client: HttpClient,
    base_url: String,
}

impl HttpAvatarConverter {
    pub fn from_config(config: &AnvilConfig) -> Result<Self> {
        let base_url = config.api_url("avatar").ok_or_else(|| {
            ClassifiedError::validation(
                Some("providers.avatar.api_url"),
                "Avatar converter URL not configured. Add [providers.avatar] api_url to .anvil/config.toml",
            )
        })?;
        Ok(Self {
            client: HttpClient::new(config.api_key("avatar").map(str::to_string), REQUEST_TIMEOUT),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

pub fn parse_warnings(header: Option<&str>) -> Vec<String> {
    header
        .map(|h| {
            h.split(';')
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl AvatarConverter for HttpAvatarConverter {
    fn convert(&self, mesh: &[u8], display_name: &str) -> Result<AvatarConversion> {
        let url = format!("{}/convert", self.base_url);
        let (converted, headers) = self.client.post_bytes(
            &url,
            mesh,
            &[("X-Display-Name", display_name)],
            &[WARNINGS_HEADER],
        )?;
        let warnings = parse_warnings(headers.first().and_then(|h| h.as_deref()));
        Ok(AvatarConversion {
            converted,
            warnings,
        })
    }
}
