//! Backing archives that hold a book's resources.
//!
//! Image extraction streams an entry into a writer so encoded image bytes
//! never have to be fully resident. Two backends exist: an unpacked book
//! directory and a ZIP container (EPUB). ZIP entries may be stored or
//! deflated; deflate streams are inflated chunk by chunk and CRC-checked.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use miniz_oxide::inflate::stream::{inflate, InflateState};
use miniz_oxide::{DataFormat, MZError, MZFlush, MZStatus};

use crate::error::ArchiveError;

const COPY_CHUNK_BYTES: usize = 4096;

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const CENTRAL_SIGNATURE: u32 = 0x0201_4b50;
const LOCAL_SIGNATURE: u32 = 0x0403_4b50;
const EOCD_MIN_BYTES: u64 = 22;
const MAX_COMMENT_BYTES: u64 = u16::MAX as u64;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

/// Source of resource bytes addressed by archive-relative paths.
pub trait ResourceArchive {
    /// Stream the entry at `path` into `out`, returning the byte count.
    fn copy_entry(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, ArchiveError>;
}

impl<A: ResourceArchive + ?Sized> ResourceArchive for &mut A {
    fn copy_entry(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, ArchiveError> {
        (**self).copy_entry(path, out)
    }
}

impl<A: ResourceArchive + ?Sized> ResourceArchive for Box<A> {
    fn copy_entry(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, ArchiveError> {
        (**self).copy_entry(path, out)
    }
}

/// Unpacked book rooted at a directory.
#[derive(Clone, Debug)]
pub struct DirArchive {
    root: PathBuf,
}

impl DirArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ArchiveError> {
        let rel = Path::new(path.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ArchiveError::NotFound(path.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

impl ResourceArchive for DirArchive {
    fn copy_entry(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, ArchiveError> {
        let full = self.resolve(path)?;
        let mut file = match File::open(&full) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound(path.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(io::copy(&mut file, out)?)
    }
}

#[derive(Clone, Debug)]
struct ZipEntry {
    name: String,
    method: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
}

/// Read-only ZIP container (stored and deflate entries, no ZIP64).
#[derive(Debug)]
pub struct ZipArchive<R> {
    reader: R,
    entries: Vec<ZipEntry>,
}

impl ZipArchive<File> {
    /// Open a ZIP file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> ZipArchive<R> {
    /// Index the central directory of `reader`.
    pub fn new(mut reader: R) -> Result<Self, ArchiveError> {
        let (cd_offset, cd_entries) = find_central_directory(&mut reader)?;
        reader.seek(SeekFrom::Start(cd_offset))?;
        let mut entries = Vec::with_capacity(cd_entries.min(256));
        for _ in 0..cd_entries {
            entries.push(read_central_entry(&mut reader)?);
        }
        Ok(Self { reader, entries })
    }

    /// Number of entries in the container.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry names in central-directory order.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    fn find(&self, path: &str) -> Option<&ZipEntry> {
        let wanted = path.trim_start_matches('/');
        self.entries.iter().find(|e| e.name == wanted)
    }
}

impl<R: Read + Seek> ResourceArchive for ZipArchive<R> {
    fn copy_entry(&mut self, path: &str, out: &mut dyn Write) -> Result<u64, ArchiveError> {
        let entry = self
            .find(path)
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(path.to_string()))?;

        self.reader.seek(SeekFrom::Start(entry.local_header_offset))?;
        let mut local = [0u8; 30];
        self.reader.read_exact(&mut local)?;
        if le_u32(&local[0..4]) != LOCAL_SIGNATURE {
            return Err(ArchiveError::Corrupt("bad local header signature"));
        }
        let skip = i64::from(le_u16(&local[26..28])) + i64::from(le_u16(&local[28..30]));
        self.reader.seek(SeekFrom::Current(skip))?;

        let mut source = (&mut self.reader).take(entry.compressed_size);
        let mut crc = crc32fast::Hasher::new();
        let written = match entry.method {
            METHOD_STORED => copy_stored(&mut source, out, &mut crc)?,
            METHOD_DEFLATE => copy_inflated(&mut source, out, &mut crc)?,
            other => return Err(ArchiveError::UnsupportedCompression(other)),
        };

        let actual = crc.finalize();
        if actual != entry.crc32 {
            return Err(ArchiveError::ChecksumMismatch {
                expected: entry.crc32,
                actual,
            });
        }
        if written != entry.uncompressed_size {
            return Err(ArchiveError::Corrupt("entry size mismatch"));
        }
        Ok(written)
    }
}

fn find_central_directory<R: Read + Seek>(reader: &mut R) -> Result<(u64, usize), ArchiveError> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    if file_len < EOCD_MIN_BYTES {
        return Err(ArchiveError::Corrupt("file too small"));
    }
    let tail_len = file_len.min(EOCD_MIN_BYTES + MAX_COMMENT_BYTES);
    reader.seek(SeekFrom::Start(file_len - tail_len))?;
    let mut tail = vec![0u8; tail_len as usize];
    reader.read_exact(&mut tail)?;

    let eocd_pos = (0..=tail.len() - EOCD_MIN_BYTES as usize)
        .rev()
        .find(|&pos| le_u32(&tail[pos..pos + 4]) == EOCD_SIGNATURE)
        .ok_or(ArchiveError::Corrupt("end of central directory not found"))?;
    let eocd = &tail[eocd_pos..];
    let total_entries = le_u16(&eocd[10..12]);
    let cd_offset = le_u32(&eocd[16..20]);
    if cd_offset == u32::MAX || total_entries == u16::MAX {
        return Err(ArchiveError::Corrupt("zip64 containers are not supported"));
    }
    Ok((u64::from(cd_offset), usize::from(total_entries)))
}

fn read_central_entry<R: Read>(reader: &mut R) -> Result<ZipEntry, ArchiveError> {
    let mut fixed = [0u8; 46];
    reader.read_exact(&mut fixed)?;
    if le_u32(&fixed[0..4]) != CENTRAL_SIGNATURE {
        return Err(ArchiveError::Corrupt("bad central directory signature"));
    }
    let method = le_u16(&fixed[10..12]);
    let crc32 = le_u32(&fixed[16..20]);
    let compressed_size = le_u32(&fixed[20..24]);
    let uncompressed_size = le_u32(&fixed[24..28]);
    let name_len = usize::from(le_u16(&fixed[28..30]));
    let extra_len = u64::from(le_u16(&fixed[30..32]));
    let comment_len = u64::from(le_u16(&fixed[32..34]));
    let local_header_offset = le_u32(&fixed[42..46]);
    if compressed_size == u32::MAX
        || uncompressed_size == u32::MAX
        || local_header_offset == u32::MAX
    {
        return Err(ArchiveError::Corrupt("zip64 entries are not supported"));
    }

    let mut name = vec![0u8; name_len];
    reader.read_exact(&mut name)?;
    io::copy(&mut reader.take(extra_len + comment_len), &mut io::sink())?;
    let name =
        String::from_utf8(name).map_err(|_| ArchiveError::Corrupt("entry name is not UTF-8"))?;

    Ok(ZipEntry {
        name,
        method,
        crc32,
        compressed_size: u64::from(compressed_size),
        uncompressed_size: u64::from(uncompressed_size),
        local_header_offset: u64::from(local_header_offset),
    })
}

fn copy_stored<R: Read>(
    source: &mut R,
    out: &mut dyn Write,
    crc: &mut crc32fast::Hasher,
) -> Result<u64, ArchiveError> {
    let mut buf = [0u8; COPY_CHUNK_BYTES];
    let mut written = 0u64;
    loop {
        let n = source.read(&mut buf)?;
        if n == 0 {
            return Ok(written);
        }
        crc.update(&buf[..n]);
        out.write_all(&buf[..n])?;
        written += n as u64;
    }
}

fn copy_inflated<R: Read>(
    source: &mut R,
    out: &mut dyn Write,
    crc: &mut crc32fast::Hasher,
) -> Result<u64, ArchiveError> {
    let mut state = InflateState::new_boxed(DataFormat::Raw);
    let mut input = vec![0u8; COPY_CHUNK_BYTES];
    let mut output = vec![0u8; COPY_CHUNK_BYTES];
    let mut in_pos = 0usize;
    let mut in_len = 0usize;
    let mut eof = false;
    let mut written = 0u64;

    loop {
        if in_pos == in_len && !eof {
            in_len = source.read(&mut input)?;
            in_pos = 0;
            eof = in_len == 0;
        }
        let flush = if eof { MZFlush::Finish } else { MZFlush::None };
        let result = inflate(&mut state, &input[in_pos..in_len], &mut output, flush);
        in_pos += result.bytes_consumed;
        if result.bytes_written > 0 {
            let chunk = &output[..result.bytes_written];
            crc.update(chunk);
            out.write_all(chunk)?;
            written += result.bytes_written as u64;
        }
        let progressed = result.bytes_consumed > 0 || result.bytes_written > 0;
        match result.status {
            Ok(MZStatus::StreamEnd) => return Ok(written),
            Ok(_) | Err(MZError::Buf) => {
                if !progressed && (eof || in_pos < in_len) {
                    return Err(ArchiveError::Corrupt("truncated deflate stream"));
                }
            }
            Err(_) => return Err(ArchiveError::Corrupt("invalid deflate stream")),
        }
    }
}

fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
