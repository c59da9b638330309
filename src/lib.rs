//! Memory-bounded chapter layout and pagination for e-ink readers.
//!
//! `epub-pager` turns one chapter of simplified XHTML into fixed-size,
//! pre-positioned pages while holding only a bounded amount of text in RAM:
//!
//! - [`text_flow`] buffers styled words and breaks them into lines.
//! - [`page_assembler`] packs lines and images into viewport-sized pages.
//! - [`image_cache`] turns image references into pre-scaled grayscale rasters.
//! - [`chapter`] is the markup state machine driving the three above.
//! - [`markup`] tokenizes XHTML and yields pages lazily.
//! - [`section`] persists a paginated chapter for instant reopen.
//!
//! ```
//! use epub_pager::{ChapterLayoutEngine, ChapterPages, FixedAdvanceMetrics, LayoutConfig};
//!
//! let metrics = FixedAdvanceMetrics::default();
//! let engine = ChapterLayoutEngine::new(LayoutConfig::default(), &metrics);
//! let markup = "<html><body><h1>Chapter One</h1><p>It was a dark night.</p></body></html>";
//! let pages: Result<Vec<_>, _> = ChapterPages::new(engine, markup.as_bytes(), 0).collect();
//! assert_eq!(pages.unwrap().len(), 1);
//! ```

#![cfg_attr(
    not(test),
    deny(
        clippy::disallowed_methods,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::todo,
        clippy::unimplemented
    )
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod archive;
pub mod bitmap;
pub mod chapter;
mod chunked_input;
pub mod config;
pub mod error;
pub mod image_cache;
pub mod markup;
pub mod metrics;
pub mod page;
pub mod page_assembler;
pub mod section;
pub mod text_flow;

#[cfg(feature = "async")]
#[cfg_attr(docsrs, doc(cfg(feature = "async")))]
pub mod worker;

pub use archive::{DirArchive, ResourceArchive, ZipArchive};
pub use chapter::{resolve_href, ChapterLayoutEngine};
pub use config::{LayoutConfig, MAX_WORD_BYTES};
pub use error::{ArchiveError, BitmapError, CodecError, PageCacheError, PaginateError};
pub use image_cache::{ImageAsset, ImageAssetCache, ImageFormat, ImageResolver, RasterCodec};
pub use markup::{paginate_chapter, ChapterPages};
pub use metrics::{FixedAdvanceMetrics, FontMetrics, HeuristicMetrics};
pub use page::{Page, PageElement};
pub use page_assembler::PageAssembler;
pub use section::{load_section, write_section, SectionReader, SectionWriter};
pub use text_flow::{Alignment, Line, LineWord, TextRun, Word, WordStyle};
#[cfg(feature = "async")]
pub use worker::{spawn_pagination, ChapterJob, PageReceiver};
