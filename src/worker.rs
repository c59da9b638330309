//! Off-thread chapter pagination.
//!
//! Layout is synchronous and CPU/storage bound. [`spawn_pagination`] moves a
//! whole chapter onto tokio's blocking pool and streams its pages back over
//! a bounded channel, so the caller's runtime keeps serving input and display
//! work while a chapter is built. Dropping the receiver stops the chapter at
//! the next completed page.

use std::io::BufRead;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chapter::ChapterLayoutEngine;
use crate::config::LayoutConfig;
use crate::error::PaginateError;
use crate::image_cache::ImageResolver;
use crate::markup::ChapterPages;
use crate::metrics::FontMetrics;
use crate::page::Page;

/// Everything needed to paginate one chapter away from the caller.
pub struct ChapterJob<M> {
    pub config: LayoutConfig,
    pub metrics: M,
    pub images: Option<Box<dyn ImageResolver + Send>>,
    pub base_path: String,
    pub input: Box<dyn BufRead + Send>,
    pub total_bytes: u64,
    pub on_progress: Option<Box<dyn FnMut(u8) + Send>>,
}

impl<M> ChapterJob<M> {
    /// Job without images or progress reporting.
    pub fn new(config: LayoutConfig, metrics: M, input: Box<dyn BufRead + Send>) -> Self {
        Self {
            config,
            metrics,
            images: None,
            base_path: String::new(),
            input,
            total_bytes: 0,
            on_progress: None,
        }
    }
}

/// Paginated chapter items as they arrive from the worker.
pub type PageReceiver = mpsc::Receiver<Result<Page, PaginateError>>;

/// Run `job` on the blocking pool.
///
/// Returns the page receiver and a handle resolving to the number of pages
/// delivered. A fatal error is sent as the last item.
pub fn spawn_pagination<M>(
    job: ChapterJob<M>,
    capacity: usize,
) -> (PageReceiver, JoinHandle<usize>)
where
    M: FontMetrics + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::task::spawn_blocking(move || run_job(job, &tx));
    (rx, handle)
}

fn run_job<M: FontMetrics>(
    job: ChapterJob<M>,
    tx: &mpsc::Sender<Result<Page, PaginateError>>,
) -> usize {
    let ChapterJob {
        config,
        metrics,
        mut images,
        base_path,
        input,
        total_bytes,
        on_progress,
    } = job;

    let mut engine = ChapterLayoutEngine::new(config, &metrics).with_base_path(base_path);
    if let Some(images) = images.as_deref_mut() {
        engine = engine.with_images(images);
    }
    let mut pages = ChapterPages::new(engine, input, total_bytes);
    if let Some(on_progress) = on_progress {
        pages = pages.with_progress(on_progress);
    }

    let mut delivered = 0usize;
    for item in pages {
        let is_err = item.is_err();
        if tx.blocking_send(item).is_err() {
            log::debug!("page receiver dropped after {} pages", delivered);
            break;
        }
        if is_err {
            break;
        }
        delivered += 1;
    }
    delivered
}
