//! Per-solver view of one cache directory: cheap existence probes per stage
//! and full stage reloads that only report success when every expected
//! sub-resource decoded.

use crate::config::{self, DomainConfig};
use crate::error::{CacheError, CacheResult};
use crate::grid::{common_resolution, GridCodecRegistry, GridDescriptor, GridView};
use crate::mesh::{self, MeshCodecRegistry, MeshSnapshot};
use crate::particles::{self, ParticleSystem, Population};
use crate::paths::{
    self, CacheStage, EXT_UNI, NAME_CONFIG, NAME_DOMAIN_VELOCITY, NAME_FLIP_PARTICLES,
    NAME_FLIP_VELOCITY, NAME_GUIDE_VELOCITY, NAME_MESH, NAME_MESH_VELOCITY,
    NAME_SECONDARY_LIFE, NAME_SECONDARY_PARTICLES, NAME_SECONDARY_VELOCITY,
};
use crate::registry::SolverId;
use crate::settings::CacheSettings;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Which stages were restored from disk by their last update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStageFlags {
    pub data: bool,
    pub noise: bool,
    pub mesh: bool,
    pub particles: bool,
    pub guiding: bool,
    pub flip: bool,
}

/// Successful sub-reads against the number a stage needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StageTally {
    expected: usize,
    actual: usize,
}

impl StageTally {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            actual: 0,
        }
    }

    fn record<T>(&mut self, result: Option<CacheResult<T>>) {
        if let Some(Ok(_)) = result {
            self.actual += 1;
        }
    }

    fn complete(self) -> bool {
        self.expected > 0 && self.actual == self.expected
    }
}

pub struct FluidCache {
    id: SolverId,
    root: PathBuf,
    settings: CacheSettings,
    grid_codecs: GridCodecRegistry,
    mesh_codecs: MeshCodecRegistry,
    flags: CacheStageFlags,
    resolutions: HashMap<CacheStage, [usize; 3]>,
}

impl FluidCache {
    pub fn new(id: SolverId, root: impl Into<PathBuf>, settings: CacheSettings) -> Self {
        Self::with_codecs(
            id,
            root,
            settings,
            GridCodecRegistry::default(),
            MeshCodecRegistry::default(),
        )
    }

    pub fn with_codecs(
        id: SolverId,
        root: impl Into<PathBuf>,
        settings: CacheSettings,
        grid_codecs: GridCodecRegistry,
        mesh_codecs: MeshCodecRegistry,
    ) -> Self {
        let root = root.into();
        if !paths::is_resolved_root(&root) {
            log::warn!("{id}: cache root {} is relative, cache disabled", root.display());
        }
        Self {
            id,
            root,
            settings,
            grid_codecs,
            mesh_codecs,
            flags: CacheStageFlags::default(),
            resolutions: HashMap::new(),
        }
    }

    pub fn id(&self) -> SolverId {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn flags(&self) -> CacheStageFlags {
        self.flags
    }

    pub fn is_resolved(&self) -> bool {
        paths::is_resolved_root(&self.root)
    }

    pub fn establish_resolution(&mut self, stage: CacheStage, resolution: [usize; 3]) {
        self.resolutions.insert(stage, resolution);
    }

    pub fn resolution(&self, stage: CacheStage) -> Option<[usize; 3]> {
        self.resolutions.get(&stage).copied()
    }

    fn stage_file(&self, stage: CacheStage, field: &str, extension: &str, frame: i32) -> PathBuf {
        paths::file(&self.root, stage, field, extension, frame)
    }

    fn grid_extension(&self, stage: CacheStage) -> &'static str {
        match stage {
            CacheStage::Noise => self.settings.noise_format.extension(),
            CacheStage::Guiding => self.settings.guiding_format.extension(),
            _ => self.settings.data_format.extension(),
        }
    }

    /// Guiding velocities come from the domain's own data stage when the
    /// domain guides itself.
    fn guiding_file(&self, frame: i32, source_domain: bool, field: &str) -> PathBuf {
        if source_domain {
            let field = if field == NAME_GUIDE_VELOCITY {
                NAME_DOMAIN_VELOCITY
            } else {
                field
            };
            let ext = self.settings.data_format.extension();
            self.stage_file(CacheStage::Data, field, ext, frame)
        } else {
            self.grid_file(CacheStage::Guiding, field, frame)
        }
    }

    fn grid_file(&self, stage: CacheStage, field: &str, frame: i32) -> PathBuf {
        self.stage_file(stage, field, self.grid_extension(stage), frame)
    }

    fn mesh_file(&self, frame: i32) -> PathBuf {
        let ext = self.settings.mesh_format.extension();
        self.stage_file(CacheStage::Mesh, NAME_MESH, ext, frame)
    }

    fn probe(&self, path: PathBuf) -> bool {
        self.is_resolved() && path.exists()
    }

    pub fn has_config(&self, frame: i32) -> bool {
        self.probe(self.stage_file(CacheStage::Config, NAME_CONFIG, EXT_UNI, frame))
    }

    pub fn has_data(&self, frame: i32) -> bool {
        let field = &self.settings.data_probe_field;
        self.probe(self.grid_file(CacheStage::Data, field, frame))
    }

    pub fn has_noise(&self, frame: i32) -> bool {
        let field = &self.settings.noise_probe_field;
        self.probe(self.grid_file(CacheStage::Noise, field, frame))
    }

    pub fn has_mesh(&self, frame: i32) -> bool {
        self.probe(self.mesh_file(frame))
    }

    pub fn has_particles(&self, frame: i32) -> bool {
        self.probe(self.stage_file(CacheStage::Particles, NAME_SECONDARY_PARTICLES, EXT_UNI, frame))
    }

    pub fn has_flip(&self, frame: i32) -> bool {
        self.probe(self.stage_file(CacheStage::Data, NAME_FLIP_PARTICLES, EXT_UNI, frame))
    }

    pub fn has_guiding(&self, frame: i32, source_domain: bool) -> bool {
        self.probe(self.guiding_file(frame, source_domain, NAME_GUIDE_VELOCITY))
    }

    /// Stage-keyed probe. Guiding is probed in its own directory and the
    /// script stage only needs its directory to exist.
    pub fn has_stage(&self, stage: CacheStage, frame: i32) -> bool {
        match stage {
            CacheStage::Config => self.has_config(frame),
            CacheStage::Data => self.has_data(frame),
            CacheStage::Noise => self.has_noise(frame),
            CacheStage::Mesh => self.has_mesh(frame),
            CacheStage::Particles => self.has_particles(frame),
            CacheStage::Guiding => self.has_guiding(frame, false),
            CacheStage::Script => self.probe(paths::directory(&self.root, CacheStage::Script)),
        }
    }

    /// Runs `read` only when `path` exists; a missing file is an expected
    /// miss and yields `None`.
    fn read_existing<T>(
        &self,
        path: &Path,
        read: impl FnOnce(&Path) -> CacheResult<T>,
    ) -> Option<CacheResult<T>> {
        if !path.exists() {
            log::debug!("{}: no cache file {}", self.id, path.display());
            return None;
        }
        Some(read(path))
    }

    fn check_resolution<'g>(
        &self,
        stage: CacheStage,
        grids: impl IntoIterator<Item = (&'g str, [usize; 3])>,
    ) -> CacheResult<()> {
        let grids: Vec<_> = grids.into_iter().collect();
        common_resolution(grids.iter().copied())?;
        if let Some(expected) = self.resolution(stage) {
            if let Some((name, found)) = grids.iter().find(|(_, found)| *found != expected) {
                return Err(CacheError::ResolutionMismatch {
                    name: name.to_string(),
                    expected,
                    found: *found,
                });
            }
        }
        Ok(())
    }

    pub fn update_config(&mut self, frame: i32, dest: &mut DomainConfig) -> bool {
        *dest = DomainConfig::default();
        if !self.is_resolved() {
            return false;
        }
        let path = self.stage_file(CacheStage::Config, NAME_CONFIG, EXT_UNI, frame);
        match self.read_existing(&path, config::read_config) {
            Some(Ok(config)) => {
                *dest = config;
                true
            }
            _ => false,
        }
    }

    fn update_grid_stage(
        &self,
        stage: CacheStage,
        grids: &mut [GridDescriptor<'_>],
        file_for: impl Fn(&str) -> PathBuf,
    ) -> bool {
        for grid in grids.iter_mut() {
            grid.clear();
        }
        if !self.is_resolved() {
            return false;
        }
        let resolutions = grids.iter().map(|g| (g.name.as_str(), g.resolution));
        if let Err(error) = self.check_resolution(stage, resolutions) {
            log::error!("{}: {stage} stage rejected: {error}", self.id);
            return false;
        }

        let mut tally = StageTally::new(grids.len());
        for grid in grids.iter_mut() {
            let path = file_for(&grid.name);
            let result = self.read_existing(&path, |path| {
                self.grid_codecs
                    .read_grids(path, std::slice::from_mut(&mut *grid))
            });
            if let Some(Err(_)) = &result {
                grid.clear();
            }
            tally.record(result);
        }
        log::debug!(
            "{}: {stage} stage read {}/{} grids",
            self.id,
            tally.actual,
            tally.expected
        );
        tally.complete()
    }

    pub fn update_data_structures(
        &mut self,
        frame: i32,
        grids: &mut [GridDescriptor<'_>],
    ) -> bool {
        self.flags.data = false;
        let ext = self.grid_extension(CacheStage::Data);
        let loaded = self.update_grid_stage(CacheStage::Data, grids, |field| {
            self.stage_file(CacheStage::Data, field, ext, frame)
        });
        self.flags.data = loaded;
        loaded
    }

    pub fn update_noise_structures(
        &mut self,
        frame: i32,
        grids: &mut [GridDescriptor<'_>],
    ) -> bool {
        self.flags.noise = false;
        let ext = self.grid_extension(CacheStage::Noise);
        let loaded = self.update_grid_stage(CacheStage::Noise, grids, |field| {
            self.stage_file(CacheStage::Noise, field, ext, frame)
        });
        self.flags.noise = loaded;
        loaded
    }

    pub fn update_guiding_structures(
        &mut self,
        frame: i32,
        source_domain: bool,
        grids: &mut [GridDescriptor<'_>],
    ) -> bool {
        self.flags.guiding = false;
        let loaded = self.update_grid_stage(CacheStage::Guiding, grids, |field| {
            self.guiding_file(frame, source_domain, field)
        });
        self.flags.guiding = loaded;
        loaded
    }

    /// Primary particles: positions and velocities from the data stage.
    pub fn update_flip_structures(&mut self, frame: i32, dest: &mut ParticleSystem) -> bool {
        self.flags.flip = false;
        dest.clear();
        if !self.is_resolved() {
            return false;
        }
        let mut tally = StageTally::new(2);
        let pp = self.stage_file(CacheStage::Data, NAME_FLIP_PARTICLES, EXT_UNI, frame);
        tally.record(self.read_existing(&pp, |path| {
            particles::read_particles(path, Population::Primary, false, dest)
        }));
        let pvel = self.stage_file(CacheStage::Data, NAME_FLIP_VELOCITY, EXT_UNI, frame);
        tally.record(self.read_existing(&pvel, |path| {
            particles::read_particles(path, Population::Primary, true, dest)
        }));
        self.flags.flip = tally.complete();
        self.flags.flip
    }

    /// Secondary particles: positions, velocities and life from the
    /// particles stage.
    pub fn update_particle_structures(&mut self, frame: i32, dest: &mut ParticleSystem) -> bool {
        self.flags.particles = false;
        dest.clear();
        if !self.is_resolved() {
            return false;
        }
        let mut tally = StageTally::new(3);
        let streams = [
            (NAME_SECONDARY_PARTICLES, false),
            (NAME_SECONDARY_VELOCITY, true),
            (NAME_SECONDARY_LIFE, false),
        ];
        for (field, is_velocity_stream) in streams {
            let path = self.stage_file(CacheStage::Particles, field, EXT_UNI, frame);
            tally.record(self.read_existing(&path, |path| {
                particles::read_particles(path, Population::Secondary, is_velocity_stream, dest)
            }));
        }
        self.flags.particles = tally.complete();
        self.flags.particles
    }

    pub fn update_mesh_structures(&mut self, frame: i32, dest: &mut MeshSnapshot) -> bool {
        self.flags.mesh = false;
        dest.clear();
        if !self.is_resolved() {
            return false;
        }
        let with_velocities = self.settings.mesh_velocities;
        let mut tally = StageTally::new(if with_velocities { 2 } else { 1 });

        let path = self.mesh_file(frame);
        tally.record(self.read_existing(&path, |path| self.mesh_codecs.read_mesh(path, dest)));
        if with_velocities {
            let path = self.stage_file(CacheStage::Mesh, NAME_MESH_VELOCITY, EXT_UNI, frame);
            tally.record(self.read_existing(&path, |path| {
                mesh::read_mesh_velocities(path, &mut dest.velocities)
            }));
        }
        self.flags.mesh = tally.complete();
        self.flags.mesh
    }

    fn ensure_resolved(&self) -> CacheResult<()> {
        if self.is_resolved() {
            Ok(())
        } else {
            Err(CacheError::UnresolvedRoot(self.root.clone()))
        }
    }

    pub fn write_config(&self, frame: i32, config: &DomainConfig) -> CacheResult<()> {
        self.ensure_resolved()?;
        let path = self.stage_file(CacheStage::Config, NAME_CONFIG, EXT_UNI, frame);
        config::write_config(&path, config)
    }

    fn write_grid_stage(
        &self,
        stage: CacheStage,
        grids: &[GridView<'_>],
        file_for: impl Fn(&str) -> PathBuf,
    ) -> CacheResult<()> {
        self.ensure_resolved()?;
        self.check_resolution(stage, grids.iter().map(|g| (g.name.as_str(), g.resolution)))?;
        for grid in grids {
            self.grid_codecs
                .write_grids(&file_for(&grid.name), std::slice::from_ref(grid))?;
        }
        Ok(())
    }

    pub fn write_data(&self, frame: i32, grids: &[GridView<'_>]) -> CacheResult<()> {
        let ext = self.grid_extension(CacheStage::Data);
        self.write_grid_stage(CacheStage::Data, grids, |field| {
            self.stage_file(CacheStage::Data, field, ext, frame)
        })
    }

    pub fn write_noise(&self, frame: i32, grids: &[GridView<'_>]) -> CacheResult<()> {
        let ext = self.grid_extension(CacheStage::Noise);
        self.write_grid_stage(CacheStage::Noise, grids, |field| {
            self.stage_file(CacheStage::Noise, field, ext, frame)
        })
    }

    pub fn write_guiding(&self, frame: i32, grids: &[GridView<'_>]) -> CacheResult<()> {
        self.write_grid_stage(CacheStage::Guiding, grids, |field| {
            self.guiding_file(frame, false, field)
        })
    }

    pub fn write_flip(&self, frame: i32, system: &ParticleSystem) -> CacheResult<()> {
        self.ensure_resolved()?;
        particles::write_particle_records(
            &self.stage_file(CacheStage::Data, NAME_FLIP_PARTICLES, EXT_UNI, frame),
            &system.records,
        )?;
        particles::write_particle_velocities(
            &self.stage_file(CacheStage::Data, NAME_FLIP_VELOCITY, EXT_UNI, frame),
            &system.velocities,
        )
    }

    pub fn write_particles(&self, frame: i32, system: &ParticleSystem) -> CacheResult<()> {
        self.ensure_resolved()?;
        particles::write_particle_records(
            &self.stage_file(CacheStage::Particles, NAME_SECONDARY_PARTICLES, EXT_UNI, frame),
            &system.records,
        )?;
        particles::write_particle_velocities(
            &self.stage_file(CacheStage::Particles, NAME_SECONDARY_VELOCITY, EXT_UNI, frame),
            &system.velocities,
        )?;
        particles::write_particle_life(
            &self.stage_file(CacheStage::Particles, NAME_SECONDARY_LIFE, EXT_UNI, frame),
            &system.life,
        )
    }

    pub fn write_mesh(&self, frame: i32, snapshot: &MeshSnapshot) -> CacheResult<()> {
        self.ensure_resolved()?;
        let path = self.mesh_file(frame);
        self.mesh_codecs.write_mesh(&path, snapshot)?;
        if self.settings.mesh_velocities {
            mesh::write_mesh_velocities(
                &self.stage_file(CacheStage::Mesh, NAME_MESH_VELOCITY, EXT_UNI, frame),
                &snapshot.velocities,
            )?;
        }
        Ok(())
    }

    /// Deletes every file of `stage`. Clearing a stage that was never baked
    /// succeeds.
    pub fn clear_stage(&mut self, stage: CacheStage) -> CacheResult<()> {
        self.ensure_resolved()?;
        match stage {
            CacheStage::Data => self.flags.data = false,
            CacheStage::Noise => self.flags.noise = false,
            CacheStage::Mesh => self.flags.mesh = false,
            CacheStage::Particles => self.flags.particles = false,
            CacheStage::Guiding => self.flags.guiding = false,
            CacheStage::Config | CacheStage::Script => {}
        }
        if stage == CacheStage::Data {
            self.flags.flip = false;
        }
        self.resolutions.remove(&stage);

        let dir = paths::directory(&self.root, stage);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                log::debug!("{}: cleared {}", self.id, dir.display());
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(CacheError::io(&dir, error)),
        }
    }
}
