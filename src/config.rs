use crate::container;
use crate::error::{CacheError, CacheResult};
use bytemuck::{Pod, Zeroable};
use std::io::Write;
use std::path::Path;

/// Bit set of the optional grids a domain simulates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ActiveFields(pub i32);

impl ActiveFields {
    pub const HEAT: ActiveFields = ActiveFields(1 << 0);
    pub const FIRE: ActiveFields = ActiveFields(1 << 1);
    pub const COLORS: ActiveFields = ActiveFields(1 << 2);
    pub const COLOR_RAMP: ActiveFields = ActiveFields(1 << 3);
    pub const INVELOCITY: ActiveFields = ActiveFields(1 << 4);
    pub const OUTFLOW: ActiveFields = ActiveFields(1 << 5);
    pub const OBSTACLE: ActiveFields = ActiveFields(1 << 6);
    pub const GUIDING: ActiveFields = ActiveFields(1 << 7);

    pub const fn empty() -> Self {
        ActiveFields(0)
    }

    pub const fn contains(self, other: ActiveFields) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ActiveFields) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for ActiveFields {
    type Output = ActiveFields;

    fn bitor(self, rhs: ActiveFields) -> ActiveFields {
        ActiveFields(self.0 | rhs.0)
    }
}

/// Domain parameters captured when a bake starts. Stored as one flat blob,
/// field order and width fixed.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DomainConfig {
    pub active_fields: i32,
    pub resolution: [i32; 3],
    pub dx: f32,
    pub dt: f32,
    pub p0: [f32; 3],
    pub p1: [f32; 3],
    pub dp0: [f32; 3],
    pub shift: [i32; 3],
    pub obj_shift: [f32; 3],
    pub obj_matrix: [f32; 16],
    pub base_resolution: [i32; 3],
    pub res_min: [i32; 3],
    pub res_max: [i32; 3],
    pub active_color: [f32; 3],
    pub time: i32,
}

pub const DOMAIN_CONFIG_LEN: usize = std::mem::size_of::<DomainConfig>();

impl Default for DomainConfig {
    fn default() -> Self {
        let mut obj_matrix = [0.0; 16];
        for i in 0..4 {
            obj_matrix[i * 5] = 1.0;
        }
        Self {
            active_fields: 0,
            resolution: [0; 3],
            dx: 0.0,
            dt: 0.0,
            p0: [0.0; 3],
            p1: [0.0; 3],
            dp0: [0.0; 3],
            shift: [0; 3],
            obj_shift: [0.0; 3],
            obj_matrix,
            base_resolution: [0; 3],
            res_min: [0; 3],
            res_max: [0; 3],
            active_color: [0.0; 3],
            time: 0,
        }
    }
}

impl DomainConfig {
    pub fn fields(&self) -> ActiveFields {
        ActiveFields(self.active_fields)
    }

    pub fn grid_resolution(&self) -> [usize; 3] {
        self.resolution.map(|d| d.max(0) as usize)
    }
}

pub fn read_config(path: &Path) -> CacheResult<DomainConfig> {
    let result = container::open_read(path).and_then(|mut reader| {
        let mut config = DomainConfig::zeroed();
        container::fill(&mut reader, bytemuck::bytes_of_mut(&mut config), path)?;
        Ok(config)
    });
    if let Err(error) = &result {
        log::error!("config read failed: {error}");
    }
    result
}

pub fn write_config(path: &Path, config: &DomainConfig) -> CacheResult<()> {
    let result = container::create(path).and_then(|mut writer| {
        writer
            .write_all(bytemuck::bytes_of(config))
            .map_err(|source| CacheError::io(path, source))?;
        container::finish(writer, path)
    });
    if let Err(error) = &result {
        log::error!("config write failed: {error}");
    }
    result
}
