//! Content-addressed cache of pre-scaled grayscale image rasters.
//!
//! Each `(reference, max width, max height)` request maps to one BMP file in
//! the cache directory. A hit only reads the stored header back; a miss
//! extracts the encoded image from the book archive into a scratch file and
//! runs the [`RasterCodec`] collaborator over it. Failures are local: the
//! image is dropped from the page and pagination carries on.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::archive::ResourceArchive;
use crate::bitmap::BitmapHeader;
use crate::error::{ArchiveError, BitmapError, CodecError};

static SCRATCH_NONCE: AtomicU64 = AtomicU64::new(0);

/// A cached raster ready for placement.
///
/// `width`/`height` are the stored, already scaled dimensions. Renderers
/// draw the file as is.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ImageAsset {
    pub cache_path: String,
    pub width: u16,
    pub height: u16,
}

impl ImageAsset {
    /// True when the asset has no drawable area.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Encoded source formats accepted for conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Detect the format from the file extension, ignoring case.
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit_once('.')?.1;
        if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") {
            Some(Self::Jpeg)
        } else if ext.eq_ignore_ascii_case("png") {
            Some(Self::Png)
        } else {
            None
        }
    }
}

/// Decode, downscale and dither collaborator.
///
/// Reads one encoded image from `source` and writes an uncompressed
/// grayscale BMP to `out` (see [`crate::bitmap::write_grayscale_header`]).
/// The result keeps the source aspect ratio, fits inside
/// `max_width` x `max_height`, and is never larger than the source.
pub trait RasterCodec {
    fn convert(
        &mut self,
        format: ImageFormat,
        source: &mut dyn Read,
        out: &mut dyn Write,
        max_width: u16,
        max_height: u16,
    ) -> Result<(), CodecError>;
}

impl<C: RasterCodec + ?Sized> RasterCodec for &mut C {
    fn convert(
        &mut self,
        format: ImageFormat,
        source: &mut dyn Read,
        out: &mut dyn Write,
        max_width: u16,
        max_height: u16,
    ) -> Result<(), CodecError> {
        (**self).convert(format, source, out, max_width, max_height)
    }
}

/// Seam between the chapter engine and whatever produces image assets.
pub trait ImageResolver {
    /// Resolve an archive path to a placed asset, or `None` to omit it.
    fn resolve(&mut self, href: &str, max_width: u16, max_height: u16) -> Option<ImageAsset>;
}

impl<R: ImageResolver + ?Sized> ImageResolver for &mut R {
    fn resolve(&mut self, href: &str, max_width: u16, max_height: u16) -> Option<ImageAsset> {
        (**self).resolve(href, max_width, max_height)
    }
}

/// Aspect-preserving fit of `width` x `height` inside the bounds, without
/// upscaling. A zero-sized source yields `(0, 0)`; otherwise both results
/// are at least 1.
pub fn fit_within(width: u16, height: u16, max_width: u16, max_height: u16) -> (u16, u16) {
    if width == 0 || height == 0 {
        return (0, 0);
    }
    let (w, h) = (u64::from(width), u64::from(height));
    let (mw, mh) = (u64::from(max_width.max(1)), u64::from(max_height.max(1)));
    if w <= mw && h <= mh {
        return (width, height);
    }
    // compare w/mw against h/mh without floats
    let (out_w, out_h) = if w * mh >= h * mw {
        (mw, (h * mw / w).max(1))
    } else {
        ((w * mh / h).max(1), mh)
    };
    (out_w as u16, out_h as u16)
}

/// Cache key for a request: CRC-32 over the reference and target bounds.
pub fn cache_key(href: &str, max_width: u16, max_height: u16) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(href.as_bytes());
    hasher.update(&max_width.to_le_bytes());
    hasher.update(&max_height.to_le_bytes());
    hasher.finalize()
}

/// File name of a cache entry.
///
/// The bounds are spelled out next to the hash so two sizes of one image can
/// never share a file.
pub fn cache_file_name(href: &str, max_width: u16, max_height: u16) -> String {
    format!(
        "img_{:08x}_{}x{}.bmp",
        cache_key(href, max_width, max_height),
        max_width,
        max_height
    )
}

#[derive(Debug)]
enum ImageFailure {
    Io(io::Error),
    Archive(ArchiveError),
    Codec(CodecError),
    Bitmap(BitmapError),
}

impl fmt::Display for ImageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cache io: {}", err),
            Self::Archive(err) => write!(f, "extract: {}", err),
            Self::Codec(err) => write!(f, "convert: {}", err),
            Self::Bitmap(err) => write!(f, "converted raster: {}", err),
        }
    }
}

impl From<io::Error> for ImageFailure {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ArchiveError> for ImageFailure {
    fn from(value: ArchiveError) -> Self {
        Self::Archive(value)
    }
}

impl From<CodecError> for ImageFailure {
    fn from(value: CodecError) -> Self {
        Self::Codec(value)
    }
}

impl From<BitmapError> for ImageFailure {
    fn from(value: BitmapError) -> Self {
        Self::Bitmap(value)
    }
}

/// Removes its file when dropped unless [`keep`](Self::keep) was called.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            remove_file_quiet(&self.path);
        }
    }
}

/// Image asset cache over a book archive and a raster codec.
#[derive(Debug)]
pub struct ImageAssetCache<A, C> {
    archive: A,
    codec: C,
    cache_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl<A: ResourceArchive, C: RasterCodec> ImageAssetCache<A, C> {
    /// Create a cache writing into `cache_dir`; scratch files go there too.
    pub fn new(archive: A, codec: C, cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            archive,
            codec,
            scratch_dir: cache_dir.clone(),
            cache_dir,
        }
    }

    /// Put extracted source images somewhere other than the cache directory.
    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn archive_mut(&mut self) -> &mut A {
        &mut self.archive
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Path of the cache entry for a request, whether or not it exists.
    pub fn entry_path(&self, href: &str, max_width: u16, max_height: u16) -> PathBuf {
        self.cache_dir
            .join(cache_file_name(href, max_width, max_height))
    }

    /// Fetch or build the asset for `href` scaled to fit the bounds.
    ///
    /// An existing entry whose header no longer parses is deleted and built
    /// again. Every failure is logged and yields `None`.
    pub fn get(&mut self, href: &str, max_width: u16, max_height: u16) -> Option<ImageAsset> {
        let path = self.entry_path(href, max_width, max_height);
        if path.exists() {
            match read_asset(&path) {
                Ok(asset) => {
                    log::debug!(
                        "image cache hit {} ({}x{})",
                        asset.cache_path,
                        asset.width,
                        asset.height
                    );
                    return Some(asset);
                }
                Err(err) => {
                    log::warn!(
                        "discarding unreadable cached image {}: {}",
                        path.display(),
                        err
                    );
                    remove_file_quiet(&path);
                }
            }
        }

        let Some(format) = ImageFormat::from_path(href) else {
            log::warn!("unsupported image format: {}", href);
            return None;
        };

        match self.generate(href, format, &path, max_width, max_height) {
            Ok(asset) => {
                log::debug!(
                    "image cached {} ({}x{})",
                    asset.cache_path,
                    asset.width,
                    asset.height
                );
                Some(asset)
            }
            Err(err) => {
                log::warn!("image {} skipped: {}", href, err);
                None
            }
        }
    }

    fn generate(
        &mut self,
        href: &str,
        format: ImageFormat,
        path: &Path,
        max_width: u16,
        max_height: u16,
    ) -> Result<ImageAsset, ImageFailure> {
        fs::create_dir_all(&self.cache_dir)?;
        fs::create_dir_all(&self.scratch_dir)?;

        let nonce = SCRATCH_NONCE.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        let scratch = TempFileGuard::new(
            self.scratch_dir
                .join(format!(".img-src-{}-{}.tmp", pid, nonce)),
        );
        {
            let mut writer = BufWriter::new(File::create(&scratch.path)?);
            self.archive.copy_entry(href, &mut writer)?;
            writer.flush()?;
        }

        let partial =
            TempFileGuard::new(path.with_extension(format!("bmp.tmp-{}-{}", pid, nonce)));
        {
            let mut source = BufReader::new(File::open(&scratch.path)?);
            let mut out = BufWriter::new(File::create(&partial.path)?);
            self.codec
                .convert(format, &mut source, &mut out, max_width, max_height)?;
            out.flush()?;
        }

        let mut asset = read_asset(&partial.path)?;
        fs::rename(&partial.path, path)?;
        partial.keep();
        asset.cache_path = path.to_string_lossy().into_owned();
        Ok(asset)
    }
}

impl<A: ResourceArchive, C: RasterCodec> ImageResolver for ImageAssetCache<A, C> {
    fn resolve(&mut self, href: &str, max_width: u16, max_height: u16) -> Option<ImageAsset> {
        self.get(href, max_width, max_height)
    }
}

fn read_asset(path: &Path) -> Result<ImageAsset, ImageFailure> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = BitmapHeader::parse(&mut reader)?;
    Ok(ImageAsset {
        cache_path: path.to_string_lossy().into_owned(),
        width: header.width,
        height: header.height,
    })
}

fn remove_file_quiet(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            log::warn!("failed to remove {}: {}", path.display(), err);
        }
    }
}
