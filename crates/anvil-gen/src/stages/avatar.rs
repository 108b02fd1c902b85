//! Avatar-format conversion driver

use crate::provider::{AvatarConversion, AvatarConverter};
use anvil_core::{ClassifiedError, Result};

const GLB_MAGIC: &[u8; 4] = b"glTF";

pub struct AvatarDriver<'a> {
    converter: &'a dyn AvatarConverter,
}

impl<'a> AvatarDriver<'a> {
    pub fn new(converter: &'a dyn AvatarConverter) -> Self {
        Self { converter }
    }

    /// Convert a binary glTF mesh. The input must carry the GLB magic.
    pub fn execute(&self, mesh: &[u8], display_name: &str) -> Result<AvatarConversion> {
        if mesh.len() < 12 || &mesh[0..4] != GLB_MAGIC {
            return Err(ClassifiedError::validation(
                Some("mesh"),
                "Avatar conversion requires a binary glTF (GLB) mesh",
            ));
        }
        if display_name.trim().is_empty() {
            return Err(ClassifiedError::validation(
                Some("display_name"),
                "A display name is required for avatar conversion",
            ));
        }

        let conversion = self.converter.convert(mesh, display_name.trim())?;
        if conversion.converted.is_empty() {
            return Err(ClassifiedError::generation(
                Some("convert-avatar-format"),
                "Avatar conversion produced an empty file",
            ));
        }
        for warning in &conversion.warnings {
            tracing::warn!(stage = "convert-avatar-format", "{}", warning);
        }
        Ok(conversion)
    }
}
