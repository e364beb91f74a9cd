use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    UnknownMagic([u8; 4]),
    /// A magic value from an older writer that can no longer be decoded.
    Unsupported([u8; 4]),
    /// A magic value reserved for a payload this crate does not decode yet.
    Unimplemented([u8; 4]),
    HeaderMismatch {
        field: &'static str,
        expected: i64,
        found: i64,
    },
    Malformed(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMagic(magic) => write!(f, "unknown magic {}", magic_text(magic)),
            Self::Unsupported(magic) => {
                write!(f, "file format {} is not supported anymore", magic_text(magic))
            }
            Self::Unimplemented(magic) => {
                write!(f, "file format {} is reserved and not implemented", magic_text(magic))
            }
            Self::HeaderMismatch {
                field,
                expected,
                found,
            } => write!(f, "header field {field}: expected {expected}, found {found}"),
            Self::Malformed(message) => write!(f, "malformed payload: {message}"),
        }
    }
}

impl std::error::Error for FormatError {}

fn magic_text(magic: &[u8; 4]) -> String {
    magic
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() {
                (b as char).to_string()
            } else {
                format!("\\x{b:02x}")
            }
        })
        .collect()
}

#[derive(Debug)]
pub enum CacheError {
    Open {
        path: PathBuf,
        source: io::Error,
    },
    Format {
        path: PathBuf,
        error: FormatError,
    },
    ShortRead {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    UnknownExtension(PathBuf),
    ResolutionMismatch {
        name: String,
        expected: [usize; 3],
        found: [usize; 3],
    },
    FaceIndex {
        path: PathBuf,
        line: usize,
        index: i64,
    },
    UnknownGridKind {
        path: PathBuf,
        element_type: i32,
    },
    Io {
        path: PathBuf,
        source: io::Error,
    },
    /// The cache root is relative to a host document and cannot be used yet.
    UnresolvedRoot(PathBuf),
}

impl CacheError {
    pub fn open(path: &Path, source: io::Error) -> Self {
        Self::Open {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn format(path: &Path, error: FormatError) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            error,
        }
    }

    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn short_read(path: &Path, expected: usize, actual: usize) -> Self {
        Self::ShortRead {
            path: path.to_path_buf(),
            expected,
            actual,
        }
    }

    /// The format-level cause, if this is a format failure.
    pub fn format_error(&self) -> Option<&FormatError> {
        match self {
            Self::Format { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Open { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "unable to open file {}: {source}", path.display())
            }
            Self::Format { path, error } => write!(f, "{}: {error}", path.display()),
            Self::ShortRead {
                path,
                expected,
                actual,
            } => write!(
                f,
                "{}: short read, expected {expected} bytes, got {actual}",
                path.display()
            ),
            Self::UnknownExtension(path) => {
                write!(f, "no codec registered for file {}", path.display())
            }
            Self::ResolutionMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "grid {name}: resolution {found:?} does not match {expected:?}"
            ),
            Self::FaceIndex { path, line, index } => write!(
                f,
                "{}:{line}: face references invalid vertex index {index}",
                path.display()
            ),
            Self::UnknownGridKind { path, element_type } => write!(
                f,
                "{}: unknown grid element type {element_type}",
                path.display()
            ),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::UnresolvedRoot(root) => {
                write!(f, "cache root {} is not an absolute path", root.display())
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Io { source, .. } => Some(source),
            Self::Format { error, .. } => Some(error),
            _ => None,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
