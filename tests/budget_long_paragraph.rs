mod common;

use common::budget_alloc::PeakAlloc;
use common::fixtures::long_paragraph_chapter;
use epub_pager::{ChapterLayoutEngine, ChapterPages, FixedAdvanceMetrics, LayoutConfig};

#[global_allocator]
static ALLOC: PeakAlloc = PeakAlloc::new();

const WORDS: usize = 40_000;

struct Run {
    peak: usize,
    pages: usize,
    forced_flushes: usize,
}

fn paginate_measured(markup: &[u8], forced_flush_words: usize) -> Run {
    let metrics = FixedAdvanceMetrics::default();
    let config = LayoutConfig {
        forced_flush_words,
        ..LayoutConfig::default()
    };

    ALLOC.begin();
    let mut pages = ChapterPages::new(ChapterLayoutEngine::new(config, &metrics), markup, 0);
    let mut count = 0usize;
    for page in pages.by_ref() {
        let page = page.unwrap_or_else(|e| panic!("paginate: {}", e));
        assert!(!page.is_empty());
        count += 1;
    }
    let forced_flushes = pages.engine().forced_flushes();
    drop(pages);
    Run {
        peak: ALLOC.peak_since_begin(),
        pages: count,
        forced_flushes,
    }
}

#[test]
fn forced_flush_bounds_memory_for_one_huge_paragraph() {
    let markup = long_paragraph_chapter(WORDS, 40);

    let flushed = paginate_measured(markup.as_bytes(), LayoutConfig::default().forced_flush_words);
    let unflushed = paginate_measured(markup.as_bytes(), usize::MAX);

    println!(
        "long paragraph words={} flushed_peak_kib={:.1} unflushed_peak_kib={:.1} pages={}",
        WORDS,
        flushed.peak as f64 / 1024.0,
        unflushed.peak as f64 / 1024.0,
        flushed.pages
    );

    assert!(flushed.forced_flushes > 0);
    assert_eq!(unflushed.forced_flushes, 0);
    assert_eq!(flushed.pages, unflushed.pages);
    assert!(
        flushed.peak * 2 < unflushed.peak,
        "forced flushing should cap buffering: flushed {} bytes, unflushed {} bytes",
        flushed.peak,
        unflushed.peak
    );
}
