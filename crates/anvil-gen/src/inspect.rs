//! Inspection of downloaded GLB meshes

use anvil_core::{ClassifiedError, Result};
use gltf::mesh::Mode;

/// Geometry summary of a binary glTF model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshReport {
    pub mesh_count: usize,
    pub vertex_count: u64,
    pub triangle_count: u64,
    pub has_skin: bool,
}

/// Parse a GLB buffer and count its geometry
pub fn inspect_glb(bytes: &[u8]) -> Result<MeshReport> {
    let (document, buffers, _images) = gltf::import_slice(bytes).map_err(|e| {
        ClassifiedError::validation(Some("mesh"), format!("Failed to parse glTF: {}", e))
    })?;

    let mut report = MeshReport {
        mesh_count: document.meshes().count(),
        has_skin: document.skins().next().is_some(),
        ..Default::default()
    };

    for mesh in document.meshes() {
        for primitive in mesh.primitives() {
            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|d| &d.0[..]));
            let positions = reader.read_positions().map(|p| p.count()).unwrap_or(0) as u64;
            report.vertex_count += positions;

            if primitive.mode() != Mode::Triangles {
                continue;
            }
            let corners = reader
                .read_indices()
                .map(|i| i.into_u32().count() as u64)
                .unwrap_or(positions);
            report.triangle_count += corners / 3;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::minimal_glb;

    #[test]
    fn test_inspect_mock_mesh() {
        let report = inspect_glb(&minimal_glb()).unwrap();
        assert_eq!(report.mesh_count, 1);
        assert_eq!(report.vertex_count, 3);
        assert_eq!(report.triangle_count, 1);
        assert!(!report.has_skin);
    }

    #[test]
    fn test_garbage_is_validation_error() {
        let err = inspect_glb(b"definitely not a mesh").unwrap_err();
        assert_eq!(err.kind().label(), "validation");
    }
}
