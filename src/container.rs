//! Native compressed container: a gzip stream holding a fixed-size header
//! (magic tag, element count, dimensions, element type, build info,
//! timestamp) followed by a homogeneous payload that is streamed through
//! bounded chunks.

use crate::error::{CacheError, CacheResult, FormatError};
use bytemuck::{Pod, Zeroable};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Elements moved per read/write call for large arrays.
pub const CHUNK_ELEMENTS: usize = 20_000;

const INFO_LEN: usize = 256;
const INFO_LEN_WITH_EXTRA: usize = INFO_LEN - 4;

/// Serialized header size, magic included. Identical for every family.
pub const HEADER_LEN: usize = 4 + 4 * 4 + 4 + 4 + INFO_LEN + 8;

pub type ContainerReader = GzDecoder<BufReader<File>>;
pub type ContainerWriter = GzEncoder<BufWriter<File>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MagicFamily {
    Particle,
    Grid,
    Mesh,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Magic {
    ParticlesV1,
    Particles,
    ParticleData,
    GridV1,
    GridV2,
    Grid,
    MeshV1,
    MeshData,
}

impl Magic {
    pub const fn bytes(self) -> [u8; 4] {
        match self {
            Magic::ParticlesV1 => *b"PB01",
            Magic::Particles => *b"PB02",
            Magic::ParticleData => *b"PD01",
            Magic::GridV1 => *b"MNT1",
            Magic::GridV2 => *b"MNT2",
            Magic::Grid => *b"MNT3",
            Magic::MeshV1 => *b"MB01",
            Magic::MeshData => *b"MD01",
        }
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Result<Self, FormatError> {
        match &bytes {
            b"PB01" => Ok(Magic::ParticlesV1),
            b"PB02" => Ok(Magic::Particles),
            b"PD01" => Ok(Magic::ParticleData),
            b"MNT1" => Ok(Magic::GridV1),
            b"MNT2" => Ok(Magic::GridV2),
            b"MNT3" => Ok(Magic::Grid),
            b"MB01" => Ok(Magic::MeshV1),
            b"MD01" => Ok(Magic::MeshData),
            _ => Err(FormatError::UnknownMagic(bytes)),
        }
    }

    pub fn family(self) -> MagicFamily {
        match self {
            Magic::ParticlesV1 | Magic::Particles | Magic::ParticleData => MagicFamily::Particle,
            Magic::GridV1 | Magic::GridV2 | Magic::Grid => MagicFamily::Grid,
            Magic::MeshV1 | Magic::MeshData => MagicFamily::Mesh,
        }
    }

    pub fn ensure_supported(self) -> Result<(), FormatError> {
        match self {
            Magic::ParticlesV1 | Magic::GridV1 | Magic::GridV2 => {
                Err(FormatError::Unsupported(self.bytes()))
            }
            Magic::MeshV1 => Err(FormatError::Unimplemented(self.bytes())),
            Magic::Particles | Magic::ParticleData | Magic::Grid | Magic::MeshData => Ok(()),
        }
    }

    fn has_extra_field(self) -> bool {
        self.family() != MagicFamily::Particle
    }
}

#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    Int = 0,
    Float = 1,
    Vec3 = 2,
    Particle = 3,
}

impl ElementType {
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(ElementType::Int),
            1 => Some(ElementType::Float),
            2 => Some(ElementType::Vec3),
            3 => Some(ElementType::Particle),
            _ => None,
        }
    }

    pub fn tag(self) -> i32 {
        self as i32
    }

    pub fn byte_size(self) -> usize {
        match self {
            ElementType::Int | ElementType::Float => 4,
            ElementType::Vec3 => 12,
            ElementType::Particle => 16,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerHeader {
    pub magic: Magic,
    pub element_count: usize,
    pub dims: [i32; 3],
    pub element_type: i32,
    pub bytes_per_element: i32,
    pub info: String,
    /// Grid and mesh families only: depth of a 4D grid, 0 otherwise.
    pub extra: i32,
    pub timestamp: u64,
}

impl ContainerHeader {
    pub fn new(
        magic: Magic,
        element_count: usize,
        dims: [i32; 3],
        element_type: ElementType,
    ) -> Self {
        Self {
            magic,
            element_count,
            dims,
            element_type: element_type.tag(),
            bytes_per_element: element_type.byte_size() as i32,
            info: build_info(),
            extra: 0,
            timestamp: now_unix_micros(),
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let count = i32::try_from(self.element_count).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("element count {} does not fit the header", self.element_count),
            )
        })?;
        writer.write_all(&self.magic.bytes())?;
        writer.write_all(&count.to_le_bytes())?;
        for dim in self.dims {
            writer.write_all(&dim.to_le_bytes())?;
        }
        writer.write_all(&self.element_type.to_le_bytes())?;
        writer.write_all(&self.bytes_per_element.to_le_bytes())?;

        let info_len = if self.magic.has_extra_field() {
            INFO_LEN_WITH_EXTRA
        } else {
            INFO_LEN
        };
        let mut info = vec![0u8; info_len];
        let text = self.info.as_bytes();
        // keep a trailing NUL
        let copy_len = text.len().min(info_len - 1);
        info[..copy_len].copy_from_slice(&text[..copy_len]);
        writer.write_all(&info)?;
        if self.magic.has_extra_field() {
            writer.write_all(&self.extra.to_le_bytes())?;
        }
        writer.write_all(&self.timestamp.to_le_bytes())?;
        Ok(())
    }

    /// Reads the magic first and refuses legacy or reserved tags before any
    /// further byte of the file is interpreted.
    pub fn read_from<R: Read>(reader: &mut R, path: &Path) -> CacheResult<Self> {
        let mut magic = [0u8; 4];
        fill(reader, &mut magic, path)?;
        let magic = Magic::from_bytes(magic).map_err(|error| CacheError::format(path, error))?;
        magic
            .ensure_supported()
            .map_err(|error| CacheError::format(path, error))?;

        let mut rest = [0u8; HEADER_LEN - 4];
        fill(reader, &mut rest, path)?;
        let int_at = |offset: usize| {
            i32::from_le_bytes([rest[offset], rest[offset + 1], rest[offset + 2], rest[offset + 3]])
        };

        let count = int_at(0);
        if count < 0 {
            return Err(CacheError::format(
                path,
                FormatError::Malformed(format!("negative element count {count}")),
            ));
        }
        let dims = [int_at(4), int_at(8), int_at(12)];
        let element_type = int_at(16);
        let bytes_per_element = int_at(20);

        let info_start = 24;
        let (info_bytes, extra) = if magic.has_extra_field() {
            let extra_at = info_start + INFO_LEN_WITH_EXTRA;
            (&rest[info_start..extra_at], int_at(extra_at))
        } else {
            (&rest[info_start..info_start + INFO_LEN], 0)
        };
        let info_end = info_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(info_bytes.len());
        let info = String::from_utf8_lossy(&info_bytes[..info_end]).into_owned();

        let ts_at = info_start + INFO_LEN;
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&rest[ts_at..ts_at + 8]);

        Ok(Self {
            magic,
            element_count: count as usize,
            dims,
            element_type,
            bytes_per_element,
            info,
            extra,
            timestamp: u64::from_le_bytes(ts),
        })
    }

    pub fn expect_element(&self, path: &Path, element_type: ElementType) -> CacheResult<()> {
        if self.element_type != element_type.tag() {
            return Err(CacheError::format(
                path,
                FormatError::HeaderMismatch {
                    field: "element type",
                    expected: element_type.tag() as i64,
                    found: self.element_type as i64,
                },
            ));
        }
        if self.bytes_per_element as usize != element_type.byte_size() {
            return Err(CacheError::format(
                path,
                FormatError::HeaderMismatch {
                    field: "bytes per element",
                    expected: element_type.byte_size() as i64,
                    found: self.bytes_per_element as i64,
                },
            ));
        }
        Ok(())
    }
}

pub fn build_info() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

pub fn now_unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

pub fn open_read(path: &Path) -> CacheResult<ContainerReader> {
    let file = File::open(path).map_err(|source| CacheError::open(path, source))?;
    Ok(GzDecoder::new(BufReader::new(file)))
}

pub fn create(path: &Path) -> CacheResult<ContainerWriter> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::io(path, source))?;
        }
    }
    let file = File::create(path).map_err(|source| CacheError::open(path, source))?;
    Ok(GzEncoder::new(BufWriter::new(file), Compression::default()))
}

/// Closes the gzip stream; the write only counts once this succeeds.
pub fn finish(writer: ContainerWriter, path: &Path) -> CacheResult<()> {
    let mut inner = writer.finish().map_err(|source| CacheError::io(path, source))?;
    inner.flush().map_err(|source| CacheError::io(path, source))?;
    Ok(())
}

/// Decodes only the header of a container file.
pub fn inspect(path: &Path) -> CacheResult<ContainerHeader> {
    let mut reader = open_read(path)?;
    ContainerHeader::read_from(&mut reader, path)
}

/// Reads until `buf` is full or the stream ends; returns the byte count.
pub fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(filled)
}

pub fn fill<R: Read>(reader: &mut R, buf: &mut [u8], path: &Path) -> CacheResult<()> {
    let n = read_fully(reader, buf).map_err(|source| CacheError::io(path, source))?;
    if n < buf.len() {
        return Err(CacheError::short_read(path, buf.len(), n));
    }
    Ok(())
}

pub fn read_i32<R: Read>(reader: &mut R, path: &Path) -> CacheResult<i32> {
    let mut buf = [0u8; 4];
    fill(reader, &mut buf, path)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn chunk_count(total: usize, chunk: usize) -> usize {
    total.div_ceil(chunk.max(1))
}

/// Element ranges of at most `chunk` elements covering `0..total` once.
pub fn chunk_spans(total: usize, chunk: usize) -> impl Iterator<Item = Range<usize>> {
    let chunk = chunk.max(1);
    (0..chunk_count(total, chunk)).map(move |index| {
        let start = index * chunk;
        start..(start + chunk).min(total)
    })
}

/// Streams `dest.len()` elements straight into `dest`.
pub fn read_chunked<T: Pod, R: Read>(
    reader: &mut R,
    dest: &mut [T],
    path: &Path,
) -> CacheResult<()> {
    let expected = std::mem::size_of_val(dest);
    let mut done = 0usize;
    for span in chunk_spans(dest.len(), CHUNK_ELEMENTS) {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut dest[span]);
        let n = read_fully(reader, bytes).map_err(|source| CacheError::io(path, source))?;
        done += n;
        if n < bytes.len() {
            return Err(CacheError::short_read(path, expected, done));
        }
    }
    Ok(())
}

/// Streams `count` elements through a chunk-sized scratch buffer, handing
/// each chunk and its starting element index to `sink`.
pub fn read_chunked_with<T, R, F>(
    reader: &mut R,
    count: usize,
    path: &Path,
    mut sink: F,
) -> CacheResult<()>
where
    T: Pod,
    R: Read,
    F: FnMut(usize, &[T]),
{
    let stride = std::mem::size_of::<T>();
    let mut scratch = vec![T::zeroed(); count.min(CHUNK_ELEMENTS)];
    let mut done = 0usize;
    for span in chunk_spans(count, CHUNK_ELEMENTS) {
        let chunk = &mut scratch[..span.len()];
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(chunk);
        let n = read_fully(reader, bytes).map_err(|source| CacheError::io(path, source))?;
        done += n;
        if n < bytes.len() {
            return Err(CacheError::short_read(path, count.saturating_mul(stride), done));
        }
        sink(span.start, &scratch[..span.len()]);
    }
    Ok(())
}

/// Replaces the contents of `dest` with `count` streamed elements. The
/// vector grows one chunk at a time as bytes arrive, so a header count that
/// outruns the payload ends in a short read after at most one chunk. `dest`
/// is left empty on failure.
pub fn read_chunked_into<T: Pod, R: Read>(
    reader: &mut R,
    count: usize,
    dest: &mut Vec<T>,
    path: &Path,
) -> CacheResult<()> {
    dest.clear();
    dest.reserve(count.min(CHUNK_ELEMENTS));
    let result = read_chunked_with(reader, count, path, |_, chunk: &[T]| {
        dest.extend_from_slice(chunk)
    });
    if result.is_err() {
        dest.clear();
    }
    result
}

pub fn write_chunked<T: Pod, W: Write>(writer: &mut W, src: &[T], path: &Path) -> CacheResult<()> {
    for span in chunk_spans(src.len(), CHUNK_ELEMENTS) {
        writer
            .write_all(bytemuck::cast_slice(&src[span]))
            .map_err(|source| CacheError::io(path, source))?;
    }
    Ok(())
}

/// Gathers `count` elements chunk by chunk through `gather` and writes them.
pub fn write_chunked_with<T, W, F>(
    writer: &mut W,
    count: usize,
    path: &Path,
    mut gather: F,
) -> CacheResult<()>
where
    T: Pod + Zeroable,
    W: Write,
    F: FnMut(usize, &mut [T]),
{
    let mut scratch = vec![T::zeroed(); count.min(CHUNK_ELEMENTS)];
    for span in chunk_spans(count, CHUNK_ELEMENTS) {
        let chunk = &mut scratch[..span.len()];
        gather(span.start, &mut *chunk);
        writer
            .write_all(bytemuck::cast_slice(chunk))
            .map_err(|source| CacheError::io(path, source))?;
    }
    Ok(())
}
