use crate::container::{
    self, read_chunked, read_chunked_with, write_chunked, write_chunked_with, ContainerHeader,
    ElementType, Magic, MagicFamily,
};
use crate::error::{CacheError, CacheResult, FormatError};
use crate::paths::{self, EXT_RAW, EXT_UNI};
use std::io::{Read, Write};
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GridKind {
    Scalar,
    Vector3,
}

impl GridKind {
    pub fn element_type(self) -> ElementType {
        match self {
            GridKind::Scalar => ElementType::Float,
            GridKind::Vector3 => ElementType::Vec3,
        }
    }

    pub fn from_element_type(element_type: ElementType) -> Option<Self> {
        match element_type {
            ElementType::Float => Some(GridKind::Scalar),
            ElementType::Vec3 => Some(GridKind::Vector3),
            ElementType::Int | ElementType::Particle => None,
        }
    }

    pub fn components(self) -> usize {
        match self {
            GridKind::Scalar => 1,
            GridKind::Vector3 => 3,
        }
    }
}

/// Destination buffers owned by the solver; a vector grid always carries all
/// three component buffers.
pub enum GridTarget<'a> {
    Scalar(&'a mut [f32]),
    Vector3([&'a mut [f32]; 3]),
}

pub struct GridDescriptor<'a> {
    pub name: String,
    pub resolution: [usize; 3],
    pub target: GridTarget<'a>,
}

impl<'a> GridDescriptor<'a> {
    pub fn scalar(name: impl Into<String>, resolution: [usize; 3], buffer: &'a mut [f32]) -> Self {
        let name = name.into();
        assert_eq!(
            buffer.len(),
            cell_count(resolution),
            "grid {name}: buffer does not match resolution {resolution:?}"
        );
        Self {
            name,
            resolution,
            target: GridTarget::Scalar(buffer),
        }
    }

    pub fn vector3(
        name: impl Into<String>,
        resolution: [usize; 3],
        buffers: [&'a mut [f32]; 3],
    ) -> Self {
        let name = name.into();
        let cells = cell_count(resolution);
        for buffer in &buffers {
            assert_eq!(
                buffer.len(),
                cells,
                "grid {name}: component buffer does not match resolution {resolution:?}"
            );
        }
        Self {
            name,
            resolution,
            target: GridTarget::Vector3(buffers),
        }
    }

    pub fn kind(&self) -> GridKind {
        match self.target {
            GridTarget::Scalar(_) => GridKind::Scalar,
            GridTarget::Vector3(_) => GridKind::Vector3,
        }
    }

    pub fn cell_count(&self) -> usize {
        cell_count(self.resolution)
    }

    pub fn clear(&mut self) {
        match &mut self.target {
            GridTarget::Scalar(buffer) => buffer.fill(0.0),
            GridTarget::Vector3(buffers) => {
                for buffer in buffers.iter_mut() {
                    buffer.fill(0.0);
                }
            }
        }
    }

    /// Stores one cell given in `x + y*dimX + z*dimX*dimY` order.
    pub fn set_cell(&mut self, index: usize, value: [f32; 3]) {
        match &mut self.target {
            GridTarget::Scalar(buffer) => buffer[index] = value[0],
            GridTarget::Vector3([x, y, z]) => {
                x[index] = value[0];
                y[index] = value[1];
                z[index] = value[2];
            }
        }
    }
}

pub enum GridSource<'a> {
    Scalar(&'a [f32]),
    Vector3([&'a [f32]; 3]),
}

/// Read-only counterpart of [`GridDescriptor`] for the write path.
pub struct GridView<'a> {
    pub name: String,
    pub resolution: [usize; 3],
    pub source: GridSource<'a>,
}

impl<'a> GridView<'a> {
    pub fn scalar(name: impl Into<String>, resolution: [usize; 3], buffer: &'a [f32]) -> Self {
        let name = name.into();
        assert_eq!(
            buffer.len(),
            cell_count(resolution),
            "grid {name}: buffer does not match resolution {resolution:?}"
        );
        Self {
            name,
            resolution,
            source: GridSource::Scalar(buffer),
        }
    }

    pub fn vector3(
        name: impl Into<String>,
        resolution: [usize; 3],
        buffers: [&'a [f32]; 3],
    ) -> Self {
        let name = name.into();
        let cells = cell_count(resolution);
        for buffer in &buffers {
            assert_eq!(
                buffer.len(),
                cells,
                "grid {name}: component buffer does not match resolution {resolution:?}"
            );
        }
        Self {
            name,
            resolution,
            source: GridSource::Vector3(buffers),
        }
    }

    pub fn kind(&self) -> GridKind {
        match self.source {
            GridSource::Scalar(_) => GridKind::Scalar,
            GridSource::Vector3(_) => GridKind::Vector3,
        }
    }

    pub fn cell_count(&self) -> usize {
        cell_count(self.resolution)
    }

    pub fn cell(&self, index: usize) -> [f32; 3] {
        match &self.source {
            GridSource::Scalar(buffer) => [buffer[index], 0.0, 0.0],
            GridSource::Vector3([x, y, z]) => [x[index], y[index], z[index]],
        }
    }
}

pub fn cell_count(resolution: [usize; 3]) -> usize {
    resolution[0] * resolution[1] * resolution[2]
}

/// All grids handled by one call must share one resolution.
pub fn common_resolution<'g, I>(grids: I) -> CacheResult<Option<[usize; 3]>>
where
    I: IntoIterator<Item = (&'g str, [usize; 3])>,
{
    let mut expected: Option<[usize; 3]> = None;
    for (name, resolution) in grids {
        match expected {
            None => expected = Some(resolution),
            Some(first) if first != resolution => {
                return Err(CacheError::ResolutionMismatch {
                    name: name.to_string(),
                    expected: first,
                    found: resolution,
                })
            }
            Some(_) => {}
        }
    }
    Ok(expected)
}

pub trait GridCodec {
    /// File suffix this codec is registered under, dot included.
    fn extension(&self) -> &'static str;

    fn read(&self, path: &Path, grids: &mut [GridDescriptor<'_>]) -> CacheResult<()>;

    fn write(&self, path: &Path, grids: &[GridView<'_>]) -> CacheResult<()>;
}

pub struct GridCodecRegistry {
    codecs: Vec<Box<dyn GridCodec>>,
}

impl Default for GridCodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(UniGridCodec));
        registry.register(Box::new(RawGridCodec));
        #[cfg(feature = "sparse")]
        registry.register(Box::new(crate::sparse::SparseGridCodec));
        registry
    }
}

impl GridCodecRegistry {
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Adds a codec, replacing any codec already bound to the same extension.
    pub fn register(&mut self, codec: Box<dyn GridCodec>) {
        self.codecs
            .retain(|existing| existing.extension() != codec.extension());
        self.codecs.push(codec);
    }

    pub fn extensions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.codecs.iter().map(|codec| codec.extension())
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.extensions().any(|ext| ext == extension)
    }

    pub fn codec_for(&self, path: &Path) -> CacheResult<&dyn GridCodec> {
        let extension = paths::match_extension(path, self.extensions())
            .ok_or_else(|| CacheError::UnknownExtension(path.to_path_buf()))?;
        self.codecs
            .iter()
            .find(|codec| codec.extension() == extension)
            .map(|codec| codec.as_ref())
            .ok_or_else(|| CacheError::UnknownExtension(path.to_path_buf()))
    }

    pub fn read_grids(&self, path: &Path, grids: &mut [GridDescriptor<'_>]) -> CacheResult<()> {
        let result = common_resolution(grids.iter().map(|g| (g.name.as_str(), g.resolution)))
            .and_then(|_| self.codec_for(path))
            .and_then(|codec| codec.read(path, grids));
        if let Err(error) = &result {
            log::error!("grid read failed: {error}");
        }
        result
    }

    pub fn write_grids(&self, path: &Path, grids: &[GridView<'_>]) -> CacheResult<()> {
        let result = common_resolution(grids.iter().map(|g| (g.name.as_str(), g.resolution)))
            .and_then(|_| self.codec_for(path))
            .and_then(|codec| codec.write(path, grids));
        if let Err(error) = &result {
            log::error!("grid write failed: {error}");
        }
        result
    }
}

fn single_grid_only(path: &Path, count: usize) -> CacheResult<()> {
    if count != 1 {
        return Err(CacheError::format(
            path,
            FormatError::Malformed(format!(
                "expected exactly one grid per file, got {count}"
            )),
        ));
    }
    Ok(())
}

/// Vector cells are stored interleaved: x, y, z of cell 0, then cell 1, ...
fn read_cells<R: Read>(
    reader: &mut R,
    grid: &mut GridDescriptor<'_>,
    path: &Path,
) -> CacheResult<()> {
    let cells = grid.cell_count();
    match &mut grid.target {
        GridTarget::Scalar(buffer) => read_chunked(reader, &mut buffer[..], path),
        GridTarget::Vector3([x, y, z]) => {
            read_chunked_with(reader, cells, path, |start, chunk: &[[f32; 3]]| {
                for (offset, value) in chunk.iter().enumerate() {
                    x[start + offset] = value[0];
                    y[start + offset] = value[1];
                    z[start + offset] = value[2];
                }
            })
        }
    }
}

fn write_cells<W: Write>(writer: &mut W, grid: &GridView<'_>, path: &Path) -> CacheResult<()> {
    match &grid.source {
        GridSource::Scalar(buffer) => write_chunked(writer, &buffer[..], path),
        GridSource::Vector3([x, y, z]) => {
            write_chunked_with(writer, grid.cell_count(), path, |start, chunk: &mut [[f32; 3]]| {
                for (offset, value) in chunk.iter_mut().enumerate() {
                    *value = [x[start + offset], y[start + offset], z[start + offset]];
                }
            })
        }
    }
}

fn header_mismatch(path: &Path, field: &'static str, expected: i64, found: i64) -> CacheError {
    CacheError::format(
        path,
        FormatError::HeaderMismatch {
            field,
            expected,
            found,
        },
    )
}

/// Checks a grid header against what the caller expects to receive.
pub fn validate_grid_header(
    header: &ContainerHeader,
    grid: &GridDescriptor<'_>,
    path: &Path,
) -> CacheResult<()> {
    if header.magic.family() != MagicFamily::Grid {
        return Err(CacheError::format(
            path,
            FormatError::Malformed(format!("{:?} payload is not a grid", header.magic)),
        ));
    }
    let known = ElementType::from_tag(header.element_type).and_then(GridKind::from_element_type);
    if known.is_none() {
        return Err(CacheError::UnknownGridKind {
            path: path.to_path_buf(),
            element_type: header.element_type,
        });
    }
    header.expect_element(path, grid.kind().element_type())?;

    for (axis, field) in ["dimX", "dimY", "dimZ"].into_iter().enumerate() {
        if header.dims[axis] as i64 != grid.resolution[axis] as i64 {
            return Err(header_mismatch(
                path,
                field,
                grid.resolution[axis] as i64,
                header.dims[axis] as i64,
            ));
        }
    }
    if header.element_count != grid.cell_count() {
        return Err(header_mismatch(
            path,
            "element count",
            grid.cell_count() as i64,
            header.element_count as i64,
        ));
    }
    Ok(())
}

/// `.uni`: native container, one grid per file.
pub struct UniGridCodec;

impl GridCodec for UniGridCodec {
    fn extension(&self) -> &'static str {
        EXT_UNI
    }

    fn read(&self, path: &Path, grids: &mut [GridDescriptor<'_>]) -> CacheResult<()> {
        single_grid_only(path, grids.len())?;
        let grid = &mut grids[0];
        let mut reader = container::open_read(path)?;
        let header = ContainerHeader::read_from(&mut reader, path)?;
        validate_grid_header(&header, grid, path)?;
        read_cells(&mut reader, grid, path)
    }

    fn write(&self, path: &Path, grids: &[GridView<'_>]) -> CacheResult<()> {
        single_grid_only(path, grids.len())?;
        let grid = &grids[0];
        let dims = grid.resolution.map(|d| d as i32);
        let header = ContainerHeader::new(
            Magic::Grid,
            grid.cell_count(),
            dims,
            grid.kind().element_type(),
        );
        let mut writer = container::create(path)?;
        header
            .write_to(&mut writer)
            .map_err(|source| CacheError::io(path, source))?;
        write_cells(&mut writer, grid, path)?;
        container::finish(writer, path)
    }
}

/// `.raw`: deflated cell values without any header; the cell count comes
/// from the caller's resolution.
pub struct RawGridCodec;

impl GridCodec for RawGridCodec {
    fn extension(&self) -> &'static str {
        EXT_RAW
    }

    fn read(&self, path: &Path, grids: &mut [GridDescriptor<'_>]) -> CacheResult<()> {
        single_grid_only(path, grids.len())?;
        let mut reader = container::open_read(path)?;
        read_cells(&mut reader, &mut grids[0], path)
    }

    fn write(&self, path: &Path, grids: &[GridView<'_>]) -> CacheResult<()> {
        single_grid_only(path, grids.len())?;
        let mut writer = container::create(path)?;
        write_cells(&mut writer, &grids[0], path)?;
        container::finish(writer, path)
    }
}
