use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while decoding, encoding or reflecting over resources.
///
/// Structural variants carry the offending value and the stream offset at
/// which it was found; a parse never continues past one of these, since the
/// cursor would be desynchronized for every following field.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown element tag 0x{tag:04X} at offset 0x{offset:X}")]
    UnknownTag { tag: u32, offset: u64 },

    #[error("declared size 0x{declared:X} does not match actual size 0x{actual:X}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("cursor at offset 0x{actual:X}, expected offset 0x{expected:X}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("requested {requested} bytes but only {available} remain at offset 0x{offset:X}")]
    ShortRead {
        requested: usize,
        available: usize,
        offset: u64,
    },

    #[error("{remaining} trailing bytes left at offset 0x{offset:X}")]
    TrailingBytes { remaining: u64, offset: u64 },

    #[error("malformed 7-bit length prefix at offset 0x{offset:X}")]
    MalformedVarint { offset: u64 },

    #[error("undecodable string payload at offset 0x{offset:X}")]
    MalformedString { offset: u64 },

    #[error("unsupported format version 0x{version:X} at offset 0x{offset:X}")]
    UnsupportedVersion { version: u32, offset: u64 },

    #[error("invalid TGI order {0:?}, expected a permutation of \"TGI\"")]
    InvalidKeyOrder(String),

    #[error("field {field:?} is not available at version 0x{version:X}")]
    VersionGated { field: &'static str, version: u32 },

    #[error("no such field {0:?}")]
    UnknownField(String),

    #[error("field {field:?} holds {expected}, cannot assign {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("binary codec error: {0}")]
    Codec(#[from] binrw::Error),
}
