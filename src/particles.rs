use crate::container::{
    self, read_chunked_into, write_chunked, ContainerHeader, ElementType, Magic, MagicFamily,
};
use crate::error::{CacheError, CacheResult, FormatError};
use bytemuck::{Pod, Zeroable};
use std::path::Path;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ParticleRecord {
    pub position: [f32; 3],
    pub flag: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VelocityRecord {
    pub vector: [f32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Population {
    /// The solver's own simulation particles.
    Primary,
    /// Spray, foam and bubble particles derived from the primary set.
    Secondary,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticleSystem {
    pub records: Vec<ParticleRecord>,
    pub velocities: Vec<VelocityRecord>,
    /// Remaining lifetime, secondary population only.
    pub life: Vec<f32>,
}

impl ParticleSystem {
    pub fn clear(&mut self) {
        self.records.clear();
        self.velocities.clear();
        self.life.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.velocities.is_empty() && self.life.is_empty()
    }
}

/// Decodes one particle cache file into `dest`. Which array is filled
/// depends on the magic tag; `is_velocity_stream` picks between the two
/// payloads sharing the per-particle data tag. Returns the element count.
pub fn read_particles(
    path: &Path,
    population: Population,
    is_velocity_stream: bool,
    dest: &mut ParticleSystem,
) -> CacheResult<usize> {
    let result = decode(path, population, is_velocity_stream, dest);
    if let Err(error) = &result {
        log::error!("particle read failed: {error}");
    }
    result
}

fn decode(
    path: &Path,
    population: Population,
    is_velocity_stream: bool,
    dest: &mut ParticleSystem,
) -> CacheResult<usize> {
    let mut reader = container::open_read(path)?;
    let header = ContainerHeader::read_from(&mut reader, path)?;
    if header.magic.family() != MagicFamily::Particle {
        return Err(CacheError::format(
            path,
            FormatError::Malformed(format!("{:?} payload is not particle data", header.magic)),
        ));
    }

    let count = header.element_count;
    match header.magic {
        Magic::Particles => {
            header.expect_element(path, ElementType::Particle)?;
            read_chunked_into(&mut reader, count, &mut dest.records, path)?;
        }
        Magic::ParticleData if is_velocity_stream => {
            header.expect_element(path, ElementType::Vec3)?;
            read_chunked_into(&mut reader, count, &mut dest.velocities, path)?;
        }
        Magic::ParticleData => {
            if population != Population::Secondary {
                return Err(CacheError::format(
                    path,
                    FormatError::Malformed("life data is only kept for secondary particles".into()),
                ));
            }
            header.expect_element(path, ElementType::Float)?;
            read_chunked_into(&mut reader, count, &mut dest.life, path)?;
        }
        other => {
            // ensure_supported already filtered everything else
            return Err(CacheError::format(path, FormatError::Unsupported(other.bytes())));
        }
    }
    Ok(count)
}

fn write_payload<T: Pod>(
    path: &Path,
    magic: Magic,
    element_type: ElementType,
    items: &[T],
) -> CacheResult<()> {
    debug_assert_eq!(std::mem::size_of::<T>(), element_type.byte_size());
    let header = ContainerHeader::new(magic, items.len(), [0; 3], element_type);
    let result = encode(path, header, items);
    if let Err(error) = &result {
        log::error!("particle write failed: {error}");
    }
    result
}

fn encode<T: Pod>(path: &Path, header: ContainerHeader, items: &[T]) -> CacheResult<()> {
    let mut writer = container::create(path)?;
    header
        .write_to(&mut writer)
        .map_err(|source| CacheError::io(path, source))?;
    write_chunked(&mut writer, items, path)?;
    container::finish(writer, path)
}

pub fn write_particle_records(path: &Path, records: &[ParticleRecord]) -> CacheResult<()> {
    write_payload(path, Magic::Particles, ElementType::Particle, records)
}

pub fn write_particle_velocities(path: &Path, velocities: &[VelocityRecord]) -> CacheResult<()> {
    write_payload(path, Magic::ParticleData, ElementType::Vec3, velocities)
}

pub fn write_particle_life(path: &Path, life: &[f32]) -> CacheResult<()> {
    write_payload(path, Magic::ParticleData, ElementType::Float, life)
}
