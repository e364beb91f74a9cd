//! Surface mesh snapshots: the gzip-compressed binary mesh (`.bobj.gz`),
//! the text geometry format (`.obj`) and the per-vertex velocity stream
//! stored in a native container.

use crate::container::{
    self, read_chunked_into, read_chunked_with, read_i32, write_chunked, write_chunked_with,
    ContainerHeader, ElementType, Magic, MagicFamily, CHUNK_ELEMENTS,
};
use crate::error::{CacheError, CacheResult, FormatError};
use crate::particles::VelocityRecord;
use crate::paths::{self, EXT_BOBJ_GZ, EXT_OBJ};
use bytemuck::{Pod, Zeroable};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshNode {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshTriangle {
    pub indices: [i32; 3],
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshSnapshot {
    pub nodes: Vec<MeshNode>,
    pub triangles: Vec<MeshTriangle>,
    pub velocities: Vec<VelocityRecord>,
}

impl MeshSnapshot {
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.triangles.clear();
        self.velocities.clear();
    }

    fn clear_geometry(&mut self) {
        self.nodes.clear();
        self.triangles.clear();
    }
}

pub trait MeshCodec {
    fn extension(&self) -> &'static str;

    /// Replaces the nodes and triangles of `mesh`; velocities are untouched.
    fn read(&self, path: &Path, mesh: &mut MeshSnapshot) -> CacheResult<()>;

    fn write(&self, path: &Path, mesh: &MeshSnapshot) -> CacheResult<()>;
}

pub struct MeshCodecRegistry {
    codecs: Vec<Box<dyn MeshCodec>>,
}

impl Default for MeshCodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(BinaryObjCodec));
        registry.register(Box::new(ObjCodec));
        registry
    }
}

impl MeshCodecRegistry {
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    pub fn register(&mut self, codec: Box<dyn MeshCodec>) {
        self.codecs
            .retain(|existing| existing.extension() != codec.extension());
        self.codecs.push(codec);
    }

    pub fn extensions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.codecs.iter().map(|codec| codec.extension())
    }

    pub fn codec_for(&self, path: &Path) -> CacheResult<&dyn MeshCodec> {
        let extension = paths::match_extension(path, self.extensions())
            .ok_or_else(|| CacheError::UnknownExtension(path.to_path_buf()))?;
        self.codecs
            .iter()
            .find(|codec| codec.extension() == extension)
            .map(|codec| codec.as_ref())
            .ok_or_else(|| CacheError::UnknownExtension(path.to_path_buf()))
    }

    pub fn read_mesh(&self, path: &Path, mesh: &mut MeshSnapshot) -> CacheResult<()> {
        let result = self.codec_for(path).and_then(|codec| codec.read(path, mesh));
        if let Err(error) = &result {
            mesh.clear_geometry();
            log::error!("mesh read failed: {error}");
        }
        result
    }

    pub fn write_mesh(&self, path: &Path, mesh: &MeshSnapshot) -> CacheResult<()> {
        let result = self.codec_for(path).and_then(|codec| codec.write(path, mesh));
        if let Err(error) = &result {
            log::error!("mesh write failed: {error}");
        }
        result
    }
}

fn section_count<R: Read>(reader: &mut R, path: &Path, section: &str) -> CacheResult<usize> {
    let count = read_i32(reader, path)?;
    usize::try_from(count).map_err(|_| {
        CacheError::format(
            path,
            FormatError::Malformed(format!("negative {section} count {count}")),
        )
    })
}

fn check_triangles(path: &Path, triangles: &[MeshTriangle], node_count: usize) -> CacheResult<()> {
    let bad = triangles
        .iter()
        .flat_map(|triangle| triangle.indices)
        .find(|&index| index < 0 || index as usize >= node_count);
    match bad {
        Some(index) => Err(CacheError::format(
            path,
            FormatError::Malformed(format!(
                "triangle references vertex {index} of {node_count}"
            )),
        )),
        None => Ok(()),
    }
}

/// `.bobj.gz`: gzip stream of three counted sections, vertex positions,
/// vertex normals and triangles.
pub struct BinaryObjCodec;

impl BinaryObjCodec {
    fn decode<R: Read>(reader: &mut R, path: &Path, mesh: &mut MeshSnapshot) -> CacheResult<()> {
        let vertex_count = section_count(reader, path, "vertex")?;
        mesh.nodes.reserve(vertex_count.min(CHUNK_ELEMENTS));
        read_chunked_with(reader, vertex_count, path, |_, chunk: &[[f32; 3]]| {
            mesh.nodes.extend(chunk.iter().map(|&position| MeshNode {
                position,
                normal: [0.0; 3],
            }));
        })?;

        let normal_count = section_count(reader, path, "normal")?;
        if normal_count != mesh.nodes.len() {
            return Err(CacheError::format(
                path,
                FormatError::HeaderMismatch {
                    field: "normal count",
                    expected: mesh.nodes.len() as i64,
                    found: normal_count as i64,
                },
            ));
        }
        read_chunked_with(reader, normal_count, path, |start, chunk: &[[f32; 3]]| {
            for (node, normal) in mesh.nodes[start..].iter_mut().zip(chunk) {
                node.normal = *normal;
            }
        })?;

        let triangle_count = section_count(reader, path, "triangle")?;
        read_chunked_into(reader, triangle_count, &mut mesh.triangles, path)?;
        check_triangles(path, &mesh.triangles, mesh.nodes.len())
    }

    fn encode<W: Write>(writer: &mut W, path: &Path, mesh: &MeshSnapshot) -> CacheResult<()> {
        let nodes = &mesh.nodes;
        let count = count_field(path, nodes.len())?;
        write_count(writer, path, count)?;
        write_chunked_with(writer, nodes.len(), path, |start, chunk: &mut [[f32; 3]]| {
            for (slot, node) in chunk.iter_mut().zip(&nodes[start..]) {
                *slot = node.position;
            }
        })?;
        write_count(writer, path, count)?;
        write_chunked_with(writer, nodes.len(), path, |start, chunk: &mut [[f32; 3]]| {
            for (slot, node) in chunk.iter_mut().zip(&nodes[start..]) {
                *slot = node.normal;
            }
        })?;
        write_count(writer, path, count_field(path, mesh.triangles.len())?)?;
        write_chunked(writer, &mesh.triangles, path)
    }
}

fn count_field(path: &Path, count: usize) -> CacheResult<i32> {
    i32::try_from(count).map_err(|_| {
        CacheError::format(
            path,
            FormatError::Malformed(format!("section of {count} elements is too large")),
        )
    })
}

fn write_count<W: Write>(writer: &mut W, path: &Path, count: i32) -> CacheResult<()> {
    writer
        .write_all(&count.to_le_bytes())
        .map_err(|source| CacheError::io(path, source))
}

impl MeshCodec for BinaryObjCodec {
    fn extension(&self) -> &'static str {
        EXT_BOBJ_GZ
    }

    fn read(&self, path: &Path, mesh: &mut MeshSnapshot) -> CacheResult<()> {
        mesh.clear_geometry();
        let mut reader = container::open_read(path)?;
        Self::decode(&mut reader, path, mesh)
    }

    fn write(&self, path: &Path, mesh: &MeshSnapshot) -> CacheResult<()> {
        let mut writer = container::create(path)?;
        Self::encode(&mut writer, path, mesh)?;
        container::finish(writer, path)
    }
}

/// `.obj`: line oriented text geometry. Only positions, normals and faces
/// are kept; faces with more than three corners are split into a fan.
pub struct ObjCodec;

fn parse_vector(path: &Path, line: usize, fields: &[&str]) -> CacheResult<[f32; 3]> {
    let malformed = |what: String| {
        CacheError::format(path, FormatError::Malformed(format!("line {line}: {what}")))
    };
    if fields.len() < 3 {
        return Err(malformed(format!("expected 3 components, got {}", fields.len())));
    }
    let mut out = [0.0f32; 3];
    for (slot, text) in out.iter_mut().zip(fields) {
        *slot = text
            .parse()
            .map_err(|_| malformed(format!("invalid number {text:?}")))?;
    }
    Ok(out)
}

fn parse_face_corner(path: &Path, line: usize, token: &str) -> CacheResult<i32> {
    // "7", "7/2", "7//3" and "7/2/3" all name vertex 7
    let vertex = token.split('/').next().unwrap_or(token);
    let index: i64 = vertex.parse().map_err(|_| {
        CacheError::format(
            path,
            FormatError::Malformed(format!("line {line}: invalid face index {token:?}")),
        )
    })?;
    if index <= 0 || index > i32::MAX as i64 {
        return Err(CacheError::FaceIndex {
            path: path.to_path_buf(),
            line,
            index,
        });
    }
    Ok((index - 1) as i32)
}

impl ObjCodec {
    fn decode<R: BufRead>(reader: R, path: &Path, mesh: &mut MeshSnapshot) -> CacheResult<()> {
        let mut normal_count = 0usize;
        for (number, line) in reader.lines().enumerate() {
            let line_number = number + 1;
            let line = line.map_err(|source| CacheError::io(path, source))?;
            let mut fields = line.split_whitespace();
            let Some(record) = fields.next() else {
                continue;
            };
            let rest: Vec<&str> = fields.collect();
            match record {
                "v" => {
                    let position = parse_vector(path, line_number, &rest)?;
                    mesh.nodes.push(MeshNode {
                        position,
                        normal: [0.0; 3],
                    });
                }
                "vn" => {
                    let normal = parse_vector(path, line_number, &rest)?;
                    let Some(node) = mesh.nodes.get_mut(normal_count) else {
                        return Err(CacheError::format(
                            path,
                            FormatError::Malformed(format!(
                                "line {line_number}: normal {} has no matching vertex",
                                normal_count + 1
                            )),
                        ));
                    };
                    node.normal = normal;
                    normal_count += 1;
                }
                "f" => {
                    if rest.len() < 3 {
                        return Err(CacheError::format(
                            path,
                            FormatError::Malformed(format!(
                                "line {line_number}: face with {} corners",
                                rest.len()
                            )),
                        ));
                    }
                    let corners = rest
                        .iter()
                        .map(|token| parse_face_corner(path, line_number, token))
                        .collect::<CacheResult<Vec<i32>>>()?;
                    for pair in corners[1..].windows(2) {
                        mesh.triangles.push(MeshTriangle {
                            indices: [corners[0], pair[0], pair[1]],
                        });
                    }
                }
                record if record.starts_with('#') => {}
                "g" | "o" | "s" | "vt" | "usemtl" | "mtllib" => {}
                other => log::debug!("{}:{line_number}: skipping {other:?} record", path.display()),
            }
        }
        check_triangles(path, &mesh.triangles, mesh.nodes.len())
    }

    fn encode<W: Write>(writer: &mut W, mesh: &MeshSnapshot) -> std::io::Result<()> {
        writeln!(writer, "# {}", container::build_info())?;
        writeln!(writer, "g surface")?;
        for node in &mesh.nodes {
            let [x, y, z] = node.position;
            writeln!(writer, "v {x} {y} {z}")?;
        }
        for node in &mesh.nodes {
            let [x, y, z] = node.normal;
            writeln!(writer, "vn {x} {y} {z}")?;
        }
        for triangle in &mesh.triangles {
            let [a, b, c] = triangle.indices.map(|index| index + 1);
            writeln!(writer, "f {a}//{a} {b}//{b} {c}//{c}")?;
        }
        writer.flush()
    }
}

impl MeshCodec for ObjCodec {
    fn extension(&self) -> &'static str {
        EXT_OBJ
    }

    fn read(&self, path: &Path, mesh: &mut MeshSnapshot) -> CacheResult<()> {
        mesh.clear_geometry();
        let file = File::open(path).map_err(|source| CacheError::open(path, source))?;
        Self::decode(BufReader::new(file), path, mesh)
    }

    fn write(&self, path: &Path, mesh: &MeshSnapshot) -> CacheResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::io(path, source))?;
        }
        let file = File::create(path).map_err(|source| CacheError::open(path, source))?;
        let mut writer = BufWriter::new(file);
        Self::encode(&mut writer, mesh).map_err(|source| CacheError::io(path, source))
    }
}

/// Reads a per-vertex velocity stream (`MD01` container) into `dest`,
/// returning the vertex count.
pub fn read_mesh_velocities(path: &Path, dest: &mut Vec<VelocityRecord>) -> CacheResult<usize> {
    dest.clear();
    let result = decode_velocities(path, dest);
    if let Err(error) = &result {
        dest.clear();
        log::error!("mesh velocity read failed: {error}");
    }
    result
}

fn decode_velocities(path: &Path, dest: &mut Vec<VelocityRecord>) -> CacheResult<usize> {
    let mut reader = container::open_read(path)?;
    let header = ContainerHeader::read_from(&mut reader, path)?;
    if header.magic.family() != MagicFamily::Mesh {
        return Err(CacheError::format(
            path,
            FormatError::Malformed(format!("{:?} payload is not mesh data", header.magic)),
        ));
    }
    header.expect_element(path, ElementType::Vec3)?;
    read_chunked_into(&mut reader, header.element_count, dest, path)?;
    Ok(header.element_count)
}

pub fn write_mesh_velocities(path: &Path, velocities: &[VelocityRecord]) -> CacheResult<()> {
    let result = encode_velocities(path, velocities);
    if let Err(error) = &result {
        log::error!("mesh velocity write failed: {error}");
    }
    result
}

fn encode_velocities(path: &Path, velocities: &[VelocityRecord]) -> CacheResult<()> {
    let count = velocities.len();
    let header = ContainerHeader::new(Magic::MeshData, count, [0; 3], ElementType::Vec3);
    let mut writer = container::create(path)?;
    header
        .write_to(&mut writer)
        .map_err(|source| CacheError::io(path, source))?;
    write_chunked(&mut writer, velocities, path)?;
    container::finish(writer, path)
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
        path.push(format!("flowcache-mesh-{name}-{}-{}", std::process::id(), serial));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).expect("create test root");
        path
    }

    fn strip_mesh(node_count: usize) -> MeshSnapshot {
        let nodes: Vec<MeshNode> = (0..node_count)
            .map(|i| MeshNode {
                position: [i as f32, (i % 2) as f32, 0.25],
                normal: [0.0, 0.0, if i % 3 == 0 { 1.0 } else { -1.0 }],
            })
            .collect();
        let triangles = (0..node_count.saturating_sub(2))
            .map(|i| MeshTriangle {
                indices: [i as i32, i as i32 + 1, i as i32 + 2],
            })
            .collect();
        MeshSnapshot {
            nodes,
            triangles,
            velocities: Vec::new(),
        }
    }

    #[test]
    fn text_face_indices_become_zero_based() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let mut mesh = MeshSnapshot::default();
        ObjCodec::decode(text.as_bytes(), Path::new("tri.obj"), &mut mesh).unwrap();
        assert_eq!(mesh.nodes.len(), 3);
        assert_eq!(mesh.nodes[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(mesh.triangles, vec![MeshTriangle { indices: [0, 1, 2] }]);
    }

    #[test]
    fn text_records_drop_slash_attributes_and_fan_quads() {
        let text = "# exported\ng surface\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\n\
                    vn 0 0 1\nvn 0 0 1\nvt 0.5 0.5\nf 1/1/1 2//2 3/4 4\n";
        let mut mesh = MeshSnapshot::default();
        ObjCodec::decode(text.as_bytes(), Path::new("quad.obj"), &mut mesh).unwrap();
        assert_eq!(mesh.nodes[0].normal, [0.0, 0.0, 1.0]);
        assert_eq!(mesh.nodes[3].normal, [0.0, 0.0, 0.0]);
        assert_eq!(
            mesh.triangles,
            vec![
                MeshTriangle { indices: [0, 1, 2] },
                MeshTriangle { indices: [0, 2, 3] },
            ]
        );
    }

    #[test]
    fn text_rejects_non_positive_face_index() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 0 3\n";
        let mut mesh = MeshSnapshot::default();
        let err = ObjCodec::decode(text.as_bytes(), Path::new("bad.obj"), &mut mesh).unwrap_err();
        assert!(matches!(err, CacheError::FaceIndex { line: 4, index: 0, .. }));

        let text = "v 0 0 0\nf -1 1 1\n";
        let mut mesh = MeshSnapshot::default();
        let err = ObjCodec::decode(text.as_bytes(), Path::new("bad.obj"), &mut mesh).unwrap_err();
        assert!(matches!(err, CacheError::FaceIndex { line: 2, index: -1, .. }));
    }

    #[test]
    fn text_rejects_more_normals_than_vertices() {
        let text = "v 0 0 0\nvn 0 0 1\nvn 0 1 0\n";
        let mut mesh = MeshSnapshot::default();
        let err = ObjCodec::decode(text.as_bytes(), Path::new("n.obj"), &mut mesh).unwrap_err();
        assert!(matches!(err.format_error(), Some(FormatError::Malformed(_))));
    }

    #[test]
    fn text_rejects_out_of_range_face() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 9\n";
        let mut mesh = MeshSnapshot::default();
        let err = ObjCodec::decode(text.as_bytes(), Path::new("r.obj"), &mut mesh).unwrap_err();
        assert!(matches!(err.format_error(), Some(FormatError::Malformed(_))));
    }

    #[test]
    fn obj_file_roundtrip() {
        let root = test_root("obj");
        let path = root.join("mesh").join("lmesh_0003.obj");
        let mesh = strip_mesh(40);
        let registry = MeshCodecRegistry::default();
        registry.write_mesh(&path, &mesh).unwrap();

        let mut back = MeshSnapshot::default();
        registry.read_mesh(&path, &mut back).unwrap();
        assert_eq!(back, mesh);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn binary_roundtrip_at_chunk_edges() {
        let root = test_root("bobj");
        let registry = MeshCodecRegistry::default();
        let counts = [
            0,
            1,
            CHUNK_ELEMENTS - 1,
            CHUNK_ELEMENTS,
            CHUNK_ELEMENTS + 1,
            3 * CHUNK_ELEMENTS + 7,
        ];
        for count in counts {
            let path = root.join(format!("lmesh_{count}.bobj.gz"));
            let mesh = strip_mesh(count);
            registry.write_mesh(&path, &mesh).unwrap();

            let mut back = strip_mesh(3);
            registry.read_mesh(&path, &mut back).unwrap();
            assert_eq!(back.nodes, mesh.nodes);
            assert_eq!(back.triangles, mesh.triangles);
        }
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn binary_normal_count_must_match_nodes() {
        let root = test_root("normals");
        let path = root.join("lmesh_0001.bobj.gz");
        let mut writer = container::create(&path).unwrap();
        write_count(&mut writer, &path, 2).unwrap();
        write_chunked(&mut writer, &[[0.0f32; 3]; 2], &path).unwrap();
        write_count(&mut writer, &path, 3).unwrap();
        write_chunked(&mut writer, &[[0.0f32; 3]; 3], &path).unwrap();
        write_count(&mut writer, &path, 0).unwrap();
        container::finish(writer, &path).unwrap();

        let mut mesh = MeshSnapshot::default();
        let err = MeshCodecRegistry::default().read_mesh(&path, &mut mesh).unwrap_err();
        assert!(matches!(
            err.format_error(),
            Some(FormatError::HeaderMismatch { field: "normal count", expected: 2, found: 3 })
        ));
        assert!(mesh.nodes.is_empty());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn binary_truncation_is_short_read() {
        let root = test_root("short");
        let path = root.join("lmesh_0002.bobj.gz");
        let mut writer = container::create(&path).unwrap();
        write_count(&mut writer, &path, 4).unwrap();
        write_chunked(&mut writer, &[[1.0f32; 3]; 2], &path).unwrap();
        container::finish(writer, &path).unwrap();

        let err = MeshCodecRegistry::default()
            .read_mesh(&path, &mut MeshSnapshot::default())
            .unwrap_err();
        assert!(matches!(err, CacheError::ShortRead { expected: 48, actual: 24, .. }));
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn binary_oversized_sections_fail_as_short_read() {
        let root = test_root("oversized");
        let claimed = i32::MAX;
        let registry = MeshCodecRegistry::default();

        let vertices = root.join("lmesh_0003.bobj.gz");
        let mut writer = container::create(&vertices).unwrap();
        write_count(&mut writer, &vertices, claimed).unwrap();
        write_chunked(&mut writer, &[[1.0f32; 3]; 2], &vertices).unwrap();
        container::finish(writer, &vertices).unwrap();

        let mut mesh = strip_mesh(4);
        let err = registry.read_mesh(&vertices, &mut mesh).unwrap_err();
        assert!(matches!(
            err,
            CacheError::ShortRead { expected, actual: 24, .. } if expected == claimed as usize * 12
        ));
        assert!(mesh.nodes.is_empty() && mesh.triangles.is_empty());

        let triangles = root.join("lmesh_0004.bobj.gz");
        let mut writer = container::create(&triangles).unwrap();
        for _ in 0..2 {
            write_count(&mut writer, &triangles, 3).unwrap();
            write_chunked(&mut writer, &[[0.0f32; 3]; 3], &triangles).unwrap();
        }
        write_count(&mut writer, &triangles, claimed).unwrap();
        container::finish(writer, &triangles).unwrap();

        let mut mesh = strip_mesh(4);
        let err = registry.read_mesh(&triangles, &mut mesh).unwrap_err();
        assert!(matches!(
            err,
            CacheError::ShortRead { expected, actual: 0, .. } if expected == claimed as usize * 12
        ));
        assert!(mesh.nodes.is_empty() && mesh.triangles.is_empty());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn unknown_mesh_extension() {
        let err = MeshCodecRegistry::default()
            .read_mesh(Path::new("/tmp/lmesh_0001.ply"), &mut MeshSnapshot::default())
            .unwrap_err();
        assert!(matches!(err, CacheError::UnknownExtension(_)));
    }

    #[test]
    fn velocity_stream_roundtrip() {
        let root = test_root("vel");
        let path = root.join("lvelmesh_0001.uni");
        let velocities: Vec<_> = (0..CHUNK_ELEMENTS + 1)
            .map(|i| VelocityRecord {
                vector: [0.5, i as f32, -1.0],
            })
            .collect();
        write_mesh_velocities(&path, &velocities).unwrap();
        assert_eq!(container::inspect(&path).unwrap().magic, Magic::MeshData);

        let mut back = Vec::new();
        assert_eq!(read_mesh_velocities(&path, &mut back).unwrap(), velocities.len());
        assert_eq!(back, velocities);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn velocity_stream_with_oversized_count_is_short_read() {
        let root = test_root("vel-oversized");
        let path = root.join("lvelmesh_0002.uni");
        let claimed = i32::MAX as usize;
        let header = ContainerHeader::new(Magic::MeshData, claimed, [0; 3], ElementType::Vec3);
        let mut writer = container::create(&path).unwrap();
        header.write_to(&mut writer).unwrap();
        container::finish(writer, &path).unwrap();

        let mut back = vec![VelocityRecord::default(); 4];
        let err = read_mesh_velocities(&path, &mut back).unwrap_err();
        assert!(matches!(
            err,
            CacheError::ShortRead { expected, actual: 0, .. } if expected == claimed * 12
        ));
        assert!(back.is_empty());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn vertex_only_dump_is_unimplemented() {
        let root = test_root("mb01");
        let path = root.join("lvelmesh_0001.uni");
        let mut header = ContainerHeader::new(Magic::MeshData, 1, [0; 3], ElementType::Vec3);
        header.magic = Magic::MeshV1;
        let mut writer = container::create(&path).unwrap();
        header.write_to(&mut writer).unwrap();
        write_chunked(&mut writer, &[[0.0f32; 3]], &path).unwrap();
        container::finish(writer, &path).unwrap();

        let mut back = vec![VelocityRecord::default()];
        let err = read_mesh_velocities(&path, &mut back).unwrap_err();
        assert_eq!(err.format_error(), Some(&FormatError::Unimplemented(*b"MB01")));
        assert!(back.is_empty());
        let _ = std::fs::remove_dir_all(root);
    }
}
