use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const FRAME_DIGITS: usize = 4;

pub const EXT_UNI: &str = ".uni";
pub const EXT_SPARSE: &str = ".svol";
pub const EXT_RAW: &str = ".raw";
pub const EXT_OBJ: &str = ".obj";
pub const EXT_BOBJ_GZ: &str = ".bobj.gz";

pub const NAME_CONFIG: &str = "config";
pub const NAME_FLIP_PARTICLES: &str = "pp";
pub const NAME_FLIP_VELOCITY: &str = "pvel";
pub const NAME_SECONDARY_PARTICLES: &str = "ppsnd";
pub const NAME_SECONDARY_VELOCITY: &str = "pvelsnd";
pub const NAME_SECONDARY_LIFE: &str = "plifesnd";
pub const NAME_MESH: &str = "lmesh";
pub const NAME_MESH_VELOCITY: &str = "lvelmesh";
pub const NAME_DOMAIN_VELOCITY: &str = "velocity";
pub const NAME_GUIDE_VELOCITY: &str = "guidevel";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStage {
    Config,
    Data,
    Noise,
    Mesh,
    Particles,
    Guiding,
    Script,
}

impl CacheStage {
    pub const ALL: [CacheStage; 7] = [
        CacheStage::Config,
        CacheStage::Data,
        CacheStage::Noise,
        CacheStage::Mesh,
        CacheStage::Particles,
        CacheStage::Guiding,
        CacheStage::Script,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            CacheStage::Config => "config",
            CacheStage::Data => "data",
            CacheStage::Noise => "noise",
            CacheStage::Mesh => "mesh",
            CacheStage::Particles => "particles",
            CacheStage::Guiding => "guide",
            CacheStage::Script => "script",
        }
    }
}

impl fmt::Display for CacheStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for CacheStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheStage::ALL
            .into_iter()
            .find(|stage| stage.dir_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown cache stage {s:?}"))
    }
}

pub fn directory(root: &Path, stage: CacheStage) -> PathBuf {
    root.join(stage.dir_name())
}

/// `<root>/<stage>/<field>_<frame><extension>`, frame zero-padded to [`FRAME_DIGITS`].
pub fn file(root: &Path, stage: CacheStage, field: &str, extension: &str, frame: i32) -> PathBuf {
    directory(root, stage).join(frame_file_name(field, extension, frame))
}

pub fn frame_file_name(field: &str, extension: &str, frame: i32) -> String {
    format!("{field}_{frame:0width$}{extension}", width = FRAME_DIGITS)
}

/// Host-application relative roots (`//cache`) and plain relative paths are
/// never touched on disk.
pub fn is_resolved_root(root: &Path) -> bool {
    let text = root.to_string_lossy();
    !text.is_empty() && !text.starts_with("//") && root.is_absolute()
}

/// Longest matching registered suffix, so `.bobj.gz` wins over anything shorter.
pub fn match_extension<'a, I>(path: &Path, extensions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
    extensions
        .into_iter()
        .filter(|ext| name.ends_with(&ext.to_ascii_lowercase()))
        .max_by_key(|ext| ext.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_pads_frame_in_name_only() {
        let root = Path::new("/cache/run7");
        let path = file(root, CacheStage::Data, "density", EXT_UNI, 12);
        assert_eq!(path, PathBuf::from("/cache/run7/data/density_0012.uni"));
        assert_eq!(
            file(root, CacheStage::Mesh, NAME_MESH, EXT_BOBJ_GZ, 12345),
            PathBuf::from("/cache/run7/mesh/lmesh_12345.bobj.gz")
        );
    }

    #[test]
    fn file_is_deterministic() {
        let root = Path::new("/cache");
        let a = file(root, CacheStage::Guiding, NAME_GUIDE_VELOCITY, EXT_UNI, 3);
        let b = file(root, CacheStage::Guiding, NAME_GUIDE_VELOCITY, EXT_UNI, 3);
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/cache/guide/guidevel_0003.uni"));
    }

    #[test]
    fn directory_tags() {
        let root = Path::new("/c");
        let names: Vec<_> = CacheStage::ALL
            .iter()
            .map(|stage| directory(root, *stage))
            .collect();
        assert_eq!(names[0], PathBuf::from("/c/config"));
        assert_eq!(names[5], PathBuf::from("/c/guide"));
        assert_eq!(names[6], PathBuf::from("/c/script"));
    }

    #[test]
    fn stage_parses_from_dir_name() {
        assert_eq!("guide".parse::<CacheStage>(), Ok(CacheStage::Guiding));
        assert_eq!("Mesh".parse::<CacheStage>(), Ok(CacheStage::Mesh));
        assert!("volumes".parse::<CacheStage>().is_err());
    }

    #[test]
    fn relative_roots_are_unresolved() {
        assert!(!is_resolved_root(Path::new("//cache_fluid")));
        assert!(!is_resolved_root(Path::new("cache_fluid")));
        assert!(!is_resolved_root(Path::new("")));
        assert!(is_resolved_root(&std::env::temp_dir()));
    }

    #[test]
    fn longest_extension_wins() {
        let exts = [EXT_UNI, ".gz", EXT_BOBJ_GZ, EXT_OBJ];
        assert_eq!(
            match_extension(Path::new("/m/lmesh_0001.bobj.gz"), exts),
            Some(EXT_BOBJ_GZ)
        );
        assert_eq!(match_extension(Path::new("/m/lmesh_0001.OBJ"), exts), Some(EXT_OBJ));
        assert_eq!(match_extension(Path::new("/m/lmesh_0001.vdb"), exts), None);
    }
}
