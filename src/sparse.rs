//! Sparse volumetric grids: named fields split into 8³ leaf blocks, each
//! with an occupancy mask and only the active voxel values. Voxels are
//! addressed by coordinate, so partially stored fields read back with the
//! background value everywhere else.

use crate::container::{self, fill, read_i32};
use crate::error::{CacheError, CacheResult, FormatError};
use crate::grid::{GridCodec, GridDescriptor, GridKind, GridView};
use crate::paths::EXT_SPARSE;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

const SPARSE_MAGIC: &[u8; 4] = b"SVL1";
pub const LEAF_EDGE: usize = 8;
const LEAF_VOXELS: usize = LEAF_EDGE * LEAF_EDGE * LEAF_EDGE;
const MASK_WORDS: usize = LEAF_VOXELS / 64;
const MAX_NAME_LEN: usize = 1024;

const KIND_SCALAR: u8 = 0;
const KIND_VECTOR3: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
struct SparseLeaf {
    mask: [u64; MASK_WORDS],
    /// `components` floats per active voxel, in mask order.
    values: Vec<f32>,
}

impl SparseLeaf {
    fn empty() -> Self {
        Self {
            mask: [0; MASK_WORDS],
            values: Vec::new(),
        }
    }

    fn active_count(&self) -> usize {
        self.mask.iter().map(|word| word.count_ones() as usize).sum()
    }

    fn is_active(&self, voxel: usize) -> bool {
        self.mask[voxel / 64] & (1u64 << (voxel % 64)) != 0
    }

    /// Number of active voxels before `voxel`.
    fn rank(&self, voxel: usize) -> usize {
        let word = voxel / 64;
        let below = self.mask[..word]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum::<usize>();
        let bits = self.mask[word] & ((1u64 << (voxel % 64)) - 1);
        below + bits.count_ones() as usize
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SparseField {
    pub name: String,
    pub kind: GridKind,
    pub resolution: [usize; 3],
    pub background: [f32; 3],
    leaves: HashMap<[i32; 3], SparseLeaf>,
}

fn leaf_key(x: usize, y: usize, z: usize) -> [i32; 3] {
    [
        (x / LEAF_EDGE * LEAF_EDGE) as i32,
        (y / LEAF_EDGE * LEAF_EDGE) as i32,
        (z / LEAF_EDGE * LEAF_EDGE) as i32,
    ]
}

fn leaf_voxel(x: usize, y: usize, z: usize) -> usize {
    x % LEAF_EDGE + (y % LEAF_EDGE) * LEAF_EDGE + (z % LEAF_EDGE) * LEAF_EDGE * LEAF_EDGE
}

impl SparseField {
    /// Keeps only cells whose bits differ from the zero background, so
    /// `-0.0` stays active.
    pub fn from_dense(view: &GridView<'_>) -> Self {
        let kind = view.kind();
        let components = kind.components();
        let [rx, ry, rz] = view.resolution;
        let background = [0.0f32; 3];
        let mut leaves: HashMap<[i32; 3], SparseLeaf> = HashMap::new();

        // Leaf-major traversal keeps each leaf's values in mask order.
        for lz in (0..rz).step_by(LEAF_EDGE) {
            for ly in (0..ry).step_by(LEAF_EDGE) {
                for lx in (0..rx).step_by(LEAF_EDGE) {
                    let mut leaf = SparseLeaf::empty();
                    for z in lz..(lz + LEAF_EDGE).min(rz) {
                        for y in ly..(ly + LEAF_EDGE).min(ry) {
                            for x in lx..(lx + LEAF_EDGE).min(rx) {
                                let value = view.cell(x + y * rx + z * rx * ry);
                                let inactive = value[..components]
                                    .iter()
                                    .zip(&background)
                                    .all(|(a, b)| a.to_bits() == b.to_bits());
                                if inactive {
                                    continue;
                                }
                                let voxel = leaf_voxel(x, y, z);
                                leaf.mask[voxel / 64] |= 1u64 << (voxel % 64);
                            }
                        }
                    }
                    if leaf.active_count() == 0 {
                        continue;
                    }
                    for voxel in 0..LEAF_VOXELS {
                        if !leaf.is_active(voxel) {
                            continue;
                        }
                        let x = lx + voxel % LEAF_EDGE;
                        let y = ly + (voxel / LEAF_EDGE) % LEAF_EDGE;
                        let z = lz + voxel / (LEAF_EDGE * LEAF_EDGE);
                        let value = view.cell(x + y * rx + z * rx * ry);
                        leaf.values.extend_from_slice(&value[..components]);
                    }
                    leaves.insert(leaf_key(lx, ly, lz), leaf);
                }
            }
        }

        Self {
            name: view.name.clone(),
            kind,
            resolution: view.resolution,
            background,
            leaves,
        }
    }

    pub fn value_at(&self, x: usize, y: usize, z: usize) -> [f32; 3] {
        let Some(leaf) = self.leaves.get(&leaf_key(x, y, z)) else {
            return self.background;
        };
        let voxel = leaf_voxel(x, y, z);
        if !leaf.is_active(voxel) {
            return self.background;
        }
        let components = self.kind.components();
        let start = leaf.rank(voxel) * components;
        let mut value = [0.0f32; 3];
        value[..components].copy_from_slice(&leaf.values[start..start + components]);
        value
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn active_voxel_count(&self) -> usize {
        self.leaves.values().map(SparseLeaf::active_count).sum()
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let components = self.kind.components();
        writer.write_all(&(self.name.len() as u32).to_le_bytes())?;
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(&[match self.kind {
            GridKind::Scalar => KIND_SCALAR,
            GridKind::Vector3 => KIND_VECTOR3,
        }])?;
        for dim in self.resolution {
            writer.write_all(&(dim as u32).to_le_bytes())?;
        }
        for value in &self.background[..components] {
            writer.write_all(&value.to_le_bytes())?;
        }

        let mut keys: Vec<_> = self.leaves.keys().copied().collect();
        keys.sort_unstable_by_key(|key| (key[2], key[1], key[0]));
        writer.write_all(&(keys.len() as u32).to_le_bytes())?;
        for key in keys {
            let leaf = &self.leaves[&key];
            for coord in key {
                writer.write_all(&coord.to_le_bytes())?;
            }
            for word in leaf.mask {
                writer.write_all(&word.to_le_bytes())?;
            }
            writer.write_all(bytemuck::cast_slice(&leaf.values))?;
        }
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R, path: &Path) -> CacheResult<Self> {
        let malformed = |message: String| CacheError::format(path, FormatError::Malformed(message));

        let name_len = read_u32(reader, path)? as usize;
        if name_len > MAX_NAME_LEN {
            return Err(malformed(format!("field name length {name_len}")));
        }
        let mut name = vec![0u8; name_len];
        fill(reader, &mut name, path)?;
        let name =
            String::from_utf8(name).map_err(|_| malformed("field name is not utf-8".into()))?;

        let mut kind = [0u8; 1];
        fill(reader, &mut kind, path)?;
        let kind = match kind[0] {
            KIND_SCALAR => GridKind::Scalar,
            KIND_VECTOR3 => GridKind::Vector3,
            other => {
                return Err(CacheError::UnknownGridKind {
                    path: path.to_path_buf(),
                    element_type: other as i32,
                })
            }
        };
        let components = kind.components();
        let resolution = [
            read_u32(reader, path)? as usize,
            read_u32(reader, path)? as usize,
            read_u32(reader, path)? as usize,
        ];
        let mut background = [0.0f32; 3];
        for value in background.iter_mut().take(components) {
            *value = f32::from_bits(read_u32(reader, path)?);
        }

        let leaf_count = read_u32(reader, path)? as usize;
        let mut leaves = HashMap::with_capacity(leaf_count.min(1 << 16));
        for _ in 0..leaf_count {
            let key = [read_i32(reader, path)?, read_i32(reader, path)?, read_i32(reader, path)?];
            if key.iter().any(|c| *c < 0 || *c as usize % LEAF_EDGE != 0) {
                return Err(malformed(format!("leaf origin {key:?} is not block aligned")));
            }
            let mut leaf = SparseLeaf::empty();
            for word in leaf.mask.iter_mut() {
                let mut bytes = [0u8; 8];
                fill(reader, &mut bytes, path)?;
                *word = u64::from_le_bytes(bytes);
            }
            leaf.values = vec![0.0; leaf.active_count() * components];
            container::read_chunked(reader, &mut leaf.values[..], path)?;
            leaves.insert(key, leaf);
        }

        Ok(Self {
            name,
            kind,
            resolution,
            background,
            leaves,
        })
    }
}

fn read_u32<R: Read>(reader: &mut R, path: &Path) -> CacheResult<u32> {
    Ok(read_i32(reader, path)? as u32)
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SparseVolume {
    pub fields: Vec<SparseField>,
}

impl SparseVolume {
    pub fn read(path: &Path) -> CacheResult<Self> {
        let mut reader = container::open_read(path)?;
        let mut magic = [0u8; 4];
        fill(&mut reader, &mut magic, path)?;
        if &magic != SPARSE_MAGIC {
            return Err(CacheError::format(path, FormatError::UnknownMagic(magic)));
        }
        let count = read_u32(&mut reader, path)? as usize;
        let mut fields = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            fields.push(SparseField::read_from(&mut reader, path)?);
        }
        Ok(Self { fields })
    }

    pub fn write(&self, path: &Path) -> CacheResult<()> {
        if let Some(field) = self.fields.iter().find(|f| f.name.len() > MAX_NAME_LEN) {
            return Err(CacheError::format(
                path,
                FormatError::Malformed(format!(
                    "field name of {} bytes exceeds {MAX_NAME_LEN}",
                    field.name.len()
                )),
            ));
        }
        let mut writer = container::create(path)?;
        self.write_to(&mut writer)
            .map_err(|source| CacheError::io(path, source))?;
        container::finish(writer, path)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(SPARSE_MAGIC)?;
        writer.write_all(&(self.fields.len() as u32).to_le_bytes())?;
        for field in &self.fields {
            field.write_to(writer)?;
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&SparseField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Name lookup, except that a one-field file always serves a caller
    /// asking for exactly one field.
    pub fn resolve(&self, name: &str, requested: usize) -> Option<&SparseField> {
        if self.fields.len() == 1 && requested == 1 {
            return self.fields.first();
        }
        self.field(name)
    }
}

pub struct SparseGridCodec;

impl GridCodec for SparseGridCodec {
    fn extension(&self) -> &'static str {
        EXT_SPARSE
    }

    fn read(&self, path: &Path, grids: &mut [GridDescriptor<'_>]) -> CacheResult<()> {
        let volume = SparseVolume::read(path)?;
        let requested = grids.len();
        for grid in grids.iter_mut() {
            let field = volume.resolve(&grid.name, requested).ok_or_else(|| {
                CacheError::format(
                    path,
                    FormatError::Malformed(format!("no field named {}", grid.name)),
                )
            })?;
            if field.kind != grid.kind() {
                return Err(CacheError::format(
                    path,
                    FormatError::HeaderMismatch {
                        field: "grid kind",
                        expected: grid.kind().components() as i64,
                        found: field.kind.components() as i64,
                    },
                ));
            }
            if field.resolution != grid.resolution {
                log::warn!(
                    "{}: field {} stored at {:?}, reading at {:?}",
                    path.display(),
                    field.name,
                    field.resolution,
                    grid.resolution
                );
            }
            let [rx, ry, rz] = grid.resolution;
            for z in 0..rz {
                for y in 0..ry {
                    for x in 0..rx {
                        grid.set_cell(x + y * rx + z * rx * ry, field.value_at(x, y, z));
                    }
                }
            }
        }
        Ok(())
    }

    fn write(&self, path: &Path, grids: &[GridView<'_>]) -> CacheResult<()> {
        let volume = SparseVolume {
            fields: grids.iter().map(SparseField::from_dense).collect(),
        };
        volume.write(path)
    }
}
