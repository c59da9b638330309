//! Error types for chapter pagination and its storage formats.
//!
//! Two severities exist. [`PaginateError`] aborts a whole chapter and no
//! partial output is valid. Image problems are local: they are logged and
//! the image is dropped (see [`crate::image_cache`]), so [`BitmapError`],
//! [`ArchiveError`] and [`CodecError`] never reach the chapter caller.

use core::fmt;
use std::io;

/// Fatal chapter pagination failure.
#[derive(Debug)]
pub enum PaginateError {
    /// Reading the chapter byte stream failed.
    Io(io::Error),
    /// Markup was not well formed.
    Markup {
        /// Tokenizer message.
        message: String,
        /// Byte offset into the chapter where tokenizing stopped.
        offset: u64,
    },
    /// The page output collaborator rejected a completed page.
    Sink(PageCacheError),
}

impl fmt::Display for PaginateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "chapter read failed: {}", err),
            Self::Markup { message, offset } => {
                write!(f, "markup error at byte {}: {}", offset, message)
            }
            Self::Sink(err) => write!(f, "page output failed: {}", err),
        }
    }
}

impl std::error::Error for PaginateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Sink(err) => Some(err),
            Self::Markup { .. } => None,
        }
    }
}

impl From<io::Error> for PaginateError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<PageCacheError> for PaginateError {
    fn from(value: PageCacheError) -> Self {
        Self::Sink(value)
    }
}

/// Page and section cache (de)serialization failure.
#[derive(Debug)]
pub enum PageCacheError {
    /// Storage read/write failed.
    Io(io::Error),
    /// Element tag byte is not a known page element.
    UnknownElementTag(u8),
    /// Stored word style byte is out of range.
    InvalidStyle(u8),
    /// Stored alignment byte is out of range.
    InvalidAlignment(u8),
    /// Stored string is not UTF-8.
    InvalidUtf8,
    /// Section file was written by another format version.
    VersionMismatch { found: u8, expected: u8 },
    /// Section file was laid out with different settings.
    ProfileMismatch { found: u32, expected: u32 },
    /// Requested page does not exist in the section.
    PageIndexOutOfRange { index: usize, page_count: usize },
    /// Section cannot index more pages.
    TooManyPages,
}

impl fmt::Display for PageCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "page cache I/O failed: {}", err),
            Self::UnknownElementTag(tag) => write!(f, "unknown page element tag {}", tag),
            Self::InvalidStyle(v) => write!(f, "invalid word style byte {}", v),
            Self::InvalidAlignment(v) => write!(f, "invalid alignment byte {}", v),
            Self::InvalidUtf8 => write!(f, "stored string is not valid UTF-8"),
            Self::VersionMismatch { found, expected } => write!(
                f,
                "section version mismatch (found={} expected={})",
                found, expected
            ),
            Self::ProfileMismatch { found, expected } => write!(
                f,
                "section layout profile mismatch (found={:08x} expected={:08x})",
                found, expected
            ),
            Self::PageIndexOutOfRange { index, page_count } => write!(
                f,
                "page index {} out of range (page_count={})",
                index, page_count
            ),
            Self::TooManyPages => write!(f, "section page table is full"),
        }
    }
}

impl std::error::Error for PageCacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for PageCacheError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Cached raster header could not be parsed.
#[derive(Debug)]
pub enum BitmapError {
    Io(io::Error),
    BadSignature,
    UnsupportedHeader(u32),
    BadDimensions { width: i32, height: i32 },
    UnsupportedDepth(u16),
    Compressed(u32),
}

impl fmt::Display for BitmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "bitmap read failed: {}", err),
            Self::BadSignature => write!(f, "missing BM signature"),
            Self::UnsupportedHeader(size) => write!(f, "unsupported DIB header size {}", size),
            Self::BadDimensions { width, height } => {
                write!(f, "bad bitmap dimensions {}x{}", width, height)
            }
            Self::UnsupportedDepth(bpp) => write!(f, "unsupported bit depth {}", bpp),
            Self::Compressed(kind) => write!(f, "compressed bitmaps unsupported ({})", kind),
        }
    }
}

impl std::error::Error for BitmapError {}

impl From<io::Error> for BitmapError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Resource archive lookup or extraction failure.
#[derive(Debug)]
pub enum ArchiveError {
    Io(io::Error),
    /// No entry with this path.
    NotFound(String),
    /// Container structure is broken.
    Corrupt(&'static str),
    /// Entry uses a compression method other than stored/deflate.
    UnsupportedCompression(u16),
    /// Extracted bytes do not match the stored CRC-32.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "archive I/O failed: {}", err),
            Self::NotFound(path) => write!(f, "archive entry not found: {}", path),
            Self::Corrupt(what) => write!(f, "archive is corrupt: {}", what),
            Self::UnsupportedCompression(method) => {
                write!(f, "unsupported compression method {}", method)
            }
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "crc32 mismatch (expected={:08x} actual={:08x})",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for ArchiveError {}

impl From<io::Error> for ArchiveError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// External image codec failure.
#[derive(Debug)]
pub enum CodecError {
    Io(io::Error),
    /// Source bytes could not be decoded.
    Decode(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "codec I/O failed: {}", err),
            Self::Decode(msg) => write!(f, "image decode failed: {}", msg),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<io::Error> for CodecError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
