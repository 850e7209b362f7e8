//! Character model loading.
//!
//! Reads the morph dictionaries of the head and teeth meshes from a binary
//! glTF (GLB) container. Only the JSON chunk is inspected; geometry and
//! textures belong to the renderer.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::RigConfig;
use crate::error::{AvatarError, Result};
use crate::expression;
use crate::morph::{FaceRig, MorphSurface};
use crate::viseme::{MOUTH_OPEN, Viseme};

const GLB_MAGIC: u32 = 0x4654_6C67;
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GltfDocument {
    nodes: Vec<GltfNode>,
    meshes: Vec<GltfMesh>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GltfNode {
    name: Option<String>,
    mesh: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GltfMesh {
    name: Option<String>,
    extras: Option<MeshExtras>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MeshExtras {
    target_names: Vec<String>,
}

/// Load the face rig from a GLB (or plain `.gltf` JSON) file.
///
/// # Errors
///
/// Returns [`AvatarError::Io`] if the file cannot be read and
/// [`AvatarError::Asset`] if it is malformed or lacks the head mesh.
pub fn load_rig(path: &Path, config: &RigConfig) -> Result<FaceRig> {
    let bytes = std::fs::read(path)?;
    let rig = parse_rig(&bytes, config)?;
    info!(
        path = %path.display(),
        head_controls = rig.head.controls().count(),
        teeth = rig.teeth.is_some(),
        "character rig loaded"
    );
    Ok(rig)
}

/// Parse the face rig from GLB or glTF JSON bytes.
///
/// # Errors
///
/// Returns [`AvatarError::Asset`] if the container is malformed or the head
/// mesh is missing. A missing teeth mesh is only logged.
pub fn parse_rig(bytes: &[u8], config: &RigConfig) -> Result<FaceRig> {
    let json = if bytes.first() == Some(&b'{') {
        bytes
    } else {
        glb_json_chunk(bytes)?
    };
    let doc: GltfDocument = serde_json::from_slice(json)
        .map_err(|e| AvatarError::Asset(format!("invalid glTF JSON: {e}")))?;

    let head = find_surface(&doc, &config.head_mesh).ok_or_else(|| {
        AvatarError::Asset(format!("head mesh {:?} not found", config.head_mesh))
    })?;
    let teeth = find_surface(&doc, &config.teeth_mesh);
    if teeth.is_none() {
        warn!(mesh = %config.teeth_mesh, "teeth mesh not found, mirroring disabled");
    }

    let rig = FaceRig::new(head, teeth);
    let missing = rig.missing_controls(driven_controls());
    if !missing.is_empty() {
        debug!(count = missing.len(), missing = ?missing, "rig lacks control points, they will not be driven");
    }
    Ok(rig)
}

/// Every control point the avatar drives, in a stable order.
fn driven_controls() -> Vec<&'static str> {
    let mut names = expression::controls();
    for name in Viseme::ALL.iter().map(|v| v.morph_name()).chain([MOUTH_OPEN]) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// A rig exposing every control point the avatar drives, for running
/// without a character model.
#[must_use]
pub fn standard_rig(config: &RigConfig) -> FaceRig {
    let names = driven_controls();
    FaceRig::new(
        MorphSurface::new(config.head_mesh.clone(), names.iter().copied()),
        Some(MorphSurface::new(config.teeth_mesh.clone(), names)),
    )
}

/// Load the configured model, or fall back to [`standard_rig`] when none
/// is configured.
///
/// # Errors
///
/// Returns the [`load_rig`] error for a configured model that fails to load.
pub fn rig_from_config(config: &RigConfig) -> Result<FaceRig> {
    match &config.model_path {
        Some(path) => load_rig(path, config),
        None => {
            debug!("no character model configured, using standard rig");
            Ok(standard_rig(config))
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Locate the JSON chunk of a GLB container.
fn glb_json_chunk(bytes: &[u8]) -> Result<&[u8]> {
    let malformed = |what: &str| AvatarError::Asset(format!("malformed GLB: {what}"));

    if read_u32(bytes, 0) != Some(GLB_MAGIC) {
        return Err(malformed("bad magic"));
    }
    match read_u32(bytes, 4) {
        Some(GLB_VERSION) => {}
        Some(v) => return Err(AvatarError::Asset(format!("unsupported GLB version {v}"))),
        None => return Err(malformed("truncated header")),
    }
    let total = read_u32(bytes, 8).ok_or_else(|| malformed("truncated header"))? as usize;
    let end = total.min(bytes.len());

    let mut offset = HEADER_LEN;
    while offset + CHUNK_HEADER_LEN <= end {
        let len = read_u32(bytes, offset).ok_or_else(|| malformed("truncated chunk"))? as usize;
        let kind = read_u32(bytes, offset + 4).ok_or_else(|| malformed("truncated chunk"))?;
        let start = offset + CHUNK_HEADER_LEN;
        let stop = start
            .checked_add(len)
            .filter(|&s| s <= end)
            .ok_or_else(|| malformed("chunk overruns file"))?;
        if kind == CHUNK_JSON {
            // The JSON chunk is space-padded to a 4-byte boundary.
            return Ok(bytes[start..stop].trim_ascii_end());
        }
        offset = stop;
    }
    Err(malformed("no JSON chunk"))
}

/// Find a mesh by node name, falling back to the mesh's own name.
fn find_surface(doc: &GltfDocument, name: &str) -> Option<MorphSurface> {
    let mesh = doc
        .nodes
        .iter()
        .find(|n| n.name.as_deref() == Some(name))
        .and_then(|n| n.mesh)
        .and_then(|i| doc.meshes.get(i))
        .or_else(|| doc.meshes.iter().find(|m| m.name.as_deref() == Some(name)))?;

    let targets = mesh
        .extras
        .as_ref()
        .map(|e| e.target_names.clone())
        .unwrap_or_default();
    if targets.is_empty() {
        debug!(mesh = name, "mesh has no morph target names");
    }
    Some(MorphSurface::new(name, targets))
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    /// Wrap a glTF JSON document in a minimal GLB container.
    pub(crate) fn glb(json: &serde_json::Value) -> Vec<u8> {
        let mut chunk = serde_json::to_vec(json).unwrap();
        while chunk.len() % 4 != 0 {
            chunk.push(b' ');
        }
        let total = HEADER_LEN + CHUNK_HEADER_LEN + chunk.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
        out.extend_from_slice(&GLB_VERSION.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        out.extend_from_slice(&chunk);
        out
    }

    pub(crate) fn avatar_json() -> serde_json::Value {
        serde_json::json!({
            "nodes": [
                { "name": "Armature" },
                { "name": "Wolf3D_Head", "mesh": 0 },
                { "name": "Wolf3D_Teeth", "mesh": 1 }
            ],
            "meshes": [
                { "name": "Head", "extras": { "targetNames": [
                    "viseme_aa", "viseme_I", "mouthOpen", "mouthSmile_Left", "browInnerUp"
                ] } },
                { "name": "Teeth", "extras": { "targetNames": ["viseme_aa", "mouthOpen"] } }
            ]
        })
    }

    #[test]
    fn parses_head_and_teeth_dictionaries() {
        let rig = parse_rig(&glb(&avatar_json()), &RigConfig::default()).unwrap();
        assert_eq!(rig.head.name(), "Wolf3D_Head");
        assert_eq!(rig.head.index_of("mouthSmile_Left"), Some(3));
        let teeth = rig.teeth.unwrap();
        assert_eq!(teeth.index_of("mouthOpen"), Some(1));
        assert!(!teeth.has("browInnerUp"));
    }

    #[test]
    fn missing_teeth_is_not_an_error() {
        let mut json = avatar_json();
        json["nodes"].as_array_mut().unwrap().pop();
        let rig = parse_rig(&glb(&json), &RigConfig::default()).unwrap();
        assert!(rig.teeth.is_none());
    }

    #[test]
    fn missing_head_is_an_asset_error() {
        let config = RigConfig {
            head_mesh: "Nope".to_owned(),
            ..RigConfig::default()
        };
        let result = parse_rig(&glb(&avatar_json()), &config);
        assert!(matches!(result, Err(AvatarError::Asset(_))));
    }

    #[test]
    fn plain_gltf_json_is_accepted() {
        let bytes = serde_json::to_vec(&avatar_json()).unwrap();
        let rig = parse_rig(&bytes, &RigConfig::default()).unwrap();
        assert!(rig.head.has("viseme_I"));
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        assert!(matches!(
            parse_rig(b"NOPE\x02\0\0\0\x0c\0\0\0", &RigConfig::default()),
            Err(AvatarError::Asset(_))
        ));
        let mut bytes = glb(&avatar_json());
        bytes.truncate(30);
        assert!(parse_rig(&bytes, &RigConfig::default()).is_err());
    }

    #[test]
    fn load_rig_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avatar.glb");
        std::fs::write(&path, glb(&avatar_json())).unwrap();
        let rig = load_rig(&path, &RigConfig::default()).unwrap();
        assert!(rig.head.has("viseme_aa"));

        let missing = load_rig(&dir.path().join("none.glb"), &RigConfig::default());
        assert!(matches!(missing, Err(AvatarError::Io(_))));
    }

    #[test]
    fn standard_rig_exposes_every_driven_control() {
        let config = RigConfig::default();
        let rig = standard_rig(&config);
        assert_eq!(rig.head.name(), "Wolf3D_Head");
        assert!(rig.missing_controls(driven_controls()).is_empty());
        assert!(rig.head.has(MOUTH_OPEN));
        assert_eq!(
            rig.teeth.as_ref().unwrap().controls().count(),
            rig.head.controls().count()
        );
        assert!(rig_from_config(&config).unwrap().head.has("viseme_PP"));
    }
}
