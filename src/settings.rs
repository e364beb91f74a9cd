use crate::paths::{EXT_BOBJ_GZ, EXT_OBJ, EXT_RAW, EXT_SPARSE, EXT_UNI};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

const SETTINGS_SCHEMA_VERSION: u32 = 1;
const DEFAULT_DATA_PROBE_FIELD: &str = "density";
const DEFAULT_NOISE_PROBE_FIELD: &str = "density_noise";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GridFormat {
    Uni,
    Raw,
    Sparse,
}

impl GridFormat {
    pub fn extension(self) -> &'static str {
        match self {
            GridFormat::Uni => EXT_UNI,
            GridFormat::Raw => EXT_RAW,
            GridFormat::Sparse => EXT_SPARSE,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeshFormat {
    BinaryObjGz,
    Obj,
}

impl MeshFormat {
    pub fn extension(self) -> &'static str {
        match self {
            MeshFormat::BinaryObjGz => EXT_BOBJ_GZ,
            MeshFormat::Obj => EXT_OBJ,
        }
    }
}

/// How one cache directory is laid out on disk.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    pub schema_version: u32,
    pub data_format: GridFormat,
    pub noise_format: GridFormat,
    pub guiding_format: GridFormat,
    pub mesh_format: MeshFormat,
    pub mesh_velocities: bool,
    /// Field whose file decides `has_data`.
    pub data_probe_field: String,
    pub noise_probe_field: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            schema_version: SETTINGS_SCHEMA_VERSION,
            data_format: GridFormat::Uni,
            noise_format: GridFormat::Uni,
            guiding_format: GridFormat::Uni,
            mesh_format: MeshFormat::BinaryObjGz,
            mesh_velocities: false,
            data_probe_field: DEFAULT_DATA_PROBE_FIELD.to_string(),
            noise_probe_field: DEFAULT_NOISE_PROBE_FIELD.to_string(),
        }
    }
}

impl CacheSettings {
    pub fn sanitized(mut self) -> Self {
        self.schema_version = SETTINGS_SCHEMA_VERSION;
        let data = self.data_probe_field.trim();
        self.data_probe_field = if data.is_empty() {
            DEFAULT_DATA_PROBE_FIELD.to_string()
        } else {
            data.to_string()
        };
        let noise = self.noise_probe_field.trim();
        self.noise_probe_field = if noise.is_empty() {
            DEFAULT_NOISE_PROBE_FIELD.to_string()
        } else {
            noise.to_string()
        };
        self
    }

    /// Missing or unparsable files yield `None` so callers can keep defaults.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) => {
                if error.kind() != io::ErrorKind::NotFound {
                    log::warn!("failed to read cache settings {}: {}", path.display(), error);
                }
                return None;
            }
        };

        match serde_json::from_str::<CacheSettings>(&raw) {
            Ok(settings) => Some(settings.sanitized()),
            Err(error) => {
                log::warn!(
                    "failed to parse cache settings {}: {} (ignoring file)",
                    path.display(),
                    error
                );
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_UNIQUIFIER: AtomicU64 = AtomicU64::new(0);

    fn test_root(name: &str) -> PathBuf {
        let serial = TEST_UNIQUIFIER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("flowcache-settings-{name}-{}-{}", std::process::id(), serial));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).expect("create test root");
        path
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{ "data_format": "sparse", "mesh_velocities": true }"#;
        let settings: CacheSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.data_format, GridFormat::Sparse);
        assert!(settings.mesh_velocities);
        assert_eq!(settings.mesh_format, MeshFormat::BinaryObjGz);
        assert_eq!(settings.data_probe_field, "density");
    }

    #[test]
    fn save_then_load() {
        let root = test_root("roundtrip");
        let path = root.join("nested").join("cache.json");
        let settings = CacheSettings {
            mesh_format: MeshFormat::Obj,
            noise_format: GridFormat::Raw,
            data_probe_field: "heat".to_string(),
            ..Default::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(CacheSettings::load(&path), Some(settings));
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn unreadable_settings_are_ignored() {
        let root = test_root("broken");
        let path = root.join("cache.json");
        assert_eq!(CacheSettings::load(&path), None);
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(CacheSettings::load(&path), None);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn sanitized_restores_blank_probe_fields() {
        let settings = CacheSettings {
            data_probe_field: "  ".to_string(),
            schema_version: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(settings.data_probe_field, "density");
        assert_eq!(settings.schema_version, SETTINGS_SCHEMA_VERSION);
    }

    #[test]
    fn formats_map_to_extensions() {
        assert_eq!(GridFormat::Uni.extension(), ".uni");
        assert_eq!(GridFormat::Sparse.extension(), ".svol");
        assert_eq!(MeshFormat::BinaryObjGz.extension(), ".bobj.gz");
    }
}
