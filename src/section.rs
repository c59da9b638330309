//! Per-chapter section cache files.
//!
//! A section file stores every page of one paginated chapter so it can be
//! reopened without touching the markup again:
//!
//! ```text
//! u8 version | u32 profile | u16 page_count | u32 table_offset
//! page 0 | page 1 | ... | page_count * u32 page offset
//! ```
//!
//! Pages use the [`Page::serialize`] format. Files are written to a
//! temporary sibling and renamed into place on commit, so a crash or a
//! failed pagination never leaves a half-written section behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{PageCacheError, PaginateError};
use crate::page::{read_u16, read_u32, read_u8, write_u16, write_u32, write_u8, Page};

/// Current section file layout version.
pub const SECTION_FORMAT_VERSION: u8 = 1;

const HEADER_BYTES: u32 = 1 + 4 + 2 + 4;

static SECTION_WRITE_NONCE: AtomicU64 = AtomicU64::new(0);

/// Streaming writer for one section file.
///
/// Dropping the writer without [`commit`](Self::commit) deletes the
/// temporary file.
#[derive(Debug)]
pub struct SectionWriter {
    out: Option<BufWriter<File>>,
    temp_path: PathBuf,
    final_path: PathBuf,
    profile: u32,
    offsets: Vec<u32>,
    position: u32,
    scratch: Vec<u8>,
}

impl SectionWriter {
    /// Start a section that will replace `path` on commit.
    pub fn create(path: impl AsRef<Path>, profile: u32) -> Result<Self, PageCacheError> {
        let final_path = path.as_ref().to_path_buf();
        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let nonce = SECTION_WRITE_NONCE.fetch_add(1, Ordering::Relaxed);
        let mut temp_name = final_path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        temp_name.push(format!(".tmp-{}-{}", std::process::id(), nonce));
        let temp_path = final_path.with_file_name(temp_name);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        let mut writer = Self {
            out: Some(BufWriter::new(file)),
            temp_path,
            final_path,
            profile,
            offsets: Vec::with_capacity(16),
            position: 0,
            scratch: Vec::with_capacity(1024),
        };
        // placeholder header, patched on commit
        writer.write_header(0, 0)?;
        writer.position = HEADER_BYTES;
        Ok(writer)
    }

    /// Append one page.
    pub fn write_page(&mut self, page: &Page) -> Result<(), PageCacheError> {
        if self.offsets.len() >= usize::from(u16::MAX) {
            return Err(PageCacheError::TooManyPages);
        }
        self.scratch.clear();
        page.serialize(&mut self.scratch)?;
        let len = u32::try_from(self.scratch.len()).map_err(|_| PageCacheError::TooManyPages)?;
        let next = self
            .position
            .checked_add(len)
            .ok_or(PageCacheError::TooManyPages)?;
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| io::Error::other("section writer already closed"))?;
        out.write_all(&self.scratch)?;
        self.offsets.push(self.position);
        self.position = next;
        Ok(())
    }

    /// Pages written so far.
    pub fn page_count(&self) -> usize {
        self.offsets.len()
    }

    /// Write the page table, patch the header and move the file into place.
    pub fn commit(mut self) -> Result<u16, PageCacheError> {
        let page_count =
            u16::try_from(self.offsets.len()).map_err(|_| PageCacheError::TooManyPages)?;
        let table_offset = self.position;
        let offsets = core::mem::take(&mut self.offsets);
        {
            let out = self.out_mut()?;
            for offset in &offsets {
                write_u32(out, *offset)?;
            }
            out.seek(SeekFrom::Start(0))?;
        }
        self.write_header(page_count, table_offset)?;

        let out = self
            .out
            .take()
            .ok_or_else(|| io::Error::other("section writer already closed"))?;
        if let Err(err) = persist(out, &self.temp_path, &self.final_path) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(err.into());
        }
        Ok(page_count)
    }

    fn write_header(&mut self, page_count: u16, table_offset: u32) -> Result<(), PageCacheError> {
        let profile = self.profile;
        let out = self.out_mut()?;
        write_u8(out, SECTION_FORMAT_VERSION)?;
        write_u32(out, profile)?;
        write_u16(out, page_count)?;
        write_u32(out, table_offset)?;
        Ok(())
    }

    fn out_mut(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.out
            .as_mut()
            .ok_or_else(|| io::Error::other("section writer already closed"))
    }
}

fn persist(out: BufWriter<File>, temp_path: &Path, final_path: &Path) -> io::Result<()> {
    let file = out.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    drop(file);
    fs::rename(temp_path, final_path)
}

impl Drop for SectionWriter {
    fn drop(&mut self) {
        if self.out.take().is_some() {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Random access to the pages of a section file.
#[derive(Debug)]
pub struct SectionReader<R> {
    input: R,
    profile: u32,
    page_count: u16,
    table_offset: u32,
}

impl SectionReader<BufReader<File>> {
    /// Open `path`, rejecting files built for another layout profile.
    pub fn open(path: impl AsRef<Path>, expected_profile: u32) -> Result<Self, PageCacheError> {
        Self::new(BufReader::new(File::open(path)?), expected_profile)
    }
}

impl<R: Read + Seek> SectionReader<R> {
    pub fn new(mut input: R, expected_profile: u32) -> Result<Self, PageCacheError> {
        input.seek(SeekFrom::Start(0))?;
        let version = read_u8(&mut input)?;
        if version != SECTION_FORMAT_VERSION {
            return Err(PageCacheError::VersionMismatch {
                found: version,
                expected: SECTION_FORMAT_VERSION,
            });
        }
        let profile = read_u32(&mut input)?;
        if profile != expected_profile {
            return Err(PageCacheError::ProfileMismatch {
                found: profile,
                expected: expected_profile,
            });
        }
        let page_count = read_u16(&mut input)?;
        let table_offset = read_u32(&mut input)?;
        if table_offset < HEADER_BYTES {
            let err = io::Error::new(io::ErrorKind::InvalidData, "bad page table offset");
            return Err(err.into());
        }
        Ok(Self {
            input,
            profile,
            page_count,
            table_offset,
        })
    }

    pub fn page_count(&self) -> usize {
        usize::from(self.page_count)
    }

    pub fn profile(&self) -> u32 {
        self.profile
    }

    /// Load page `index` without reading the others.
    pub fn load_page(&mut self, index: usize) -> Result<Page, PageCacheError> {
        if index >= self.page_count() {
            return Err(PageCacheError::PageIndexOutOfRange {
                index,
                page_count: self.page_count(),
            });
        }
        let slot = u64::from(self.table_offset) + 4 * index as u64;
        self.input.seek(SeekFrom::Start(slot))?;
        let offset = read_u32(&mut self.input)?;
        if offset < HEADER_BYTES || offset >= self.table_offset {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad page offset").into());
        }
        self.input.seek(SeekFrom::Start(u64::from(offset)))?;
        Page::deserialize(&mut self.input)
    }
}

/// Open a cached section, deleting it when it is stale or unreadable.
///
/// Returns `None` when no usable section exists and the chapter has to be
/// paginated again.
pub fn load_section(
    path: impl AsRef<Path>,
    expected_profile: u32,
) -> Option<SectionReader<BufReader<File>>> {
    let path = path.as_ref();
    match SectionReader::open(path, expected_profile) {
        Ok(reader) => Some(reader),
        Err(PageCacheError::Io(err)) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            log::info!("section cache {} invalidated: {}", path.display(), err);
            let _ = fs::remove_file(path);
            None
        }
    }
}

/// Write every page of `pages` into a new section at `path`.
///
/// `path` is replaced only once every page was produced and written.
pub fn write_section<I>(
    path: impl AsRef<Path>,
    profile: u32,
    pages: I,
) -> Result<u16, PaginateError>
where
    I: IntoIterator<Item = Result<Page, PaginateError>>,
{
    let mut writer = SectionWriter::create(path, profile)?;
    for page in pages {
        writer.write_page(&page?)?;
    }
    Ok(writer.commit()?)
}
