use std::alloc::{GlobalAlloc, Layout, System};
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use epub_pager::{
    load_section, write_section, ChapterLayoutEngine, ChapterPages, HeuristicMetrics,
    LayoutConfig,
};

const DISPLAY_WIDTH: u16 = 480;
const DISPLAY_HEIGHT: u16 = 800;

struct TrackingAllocator;

static CURRENT_ALLOC_BYTES: AtomicUsize = AtomicUsize::new(0);
static PEAK_ALLOC_BYTES: AtomicUsize = AtomicUsize::new(0);

#[global_allocator]
static GLOBAL_ALLOCATOR: TrackingAllocator = TrackingAllocator;

fn current_alloc_bytes() -> usize {
    CURRENT_ALLOC_BYTES.load(Ordering::Relaxed)
}

fn add_current_alloc_bytes(delta: usize) {
    let current = CURRENT_ALLOC_BYTES.fetch_add(delta, Ordering::Relaxed) + delta;
    PEAK_ALLOC_BYTES.fetch_max(current, Ordering::Relaxed);
}

fn sub_current_alloc_bytes(delta: usize) {
    let _ = CURRENT_ALLOC_BYTES.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(delta))
    });
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            add_current_alloc_bytes(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        sub_current_alloc_bytes(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            if new_size >= layout.size() {
                add_current_alloc_bytes(new_size - layout.size());
            } else {
                sub_current_alloc_bytes(layout.size() - new_size);
            }
        }
        new_ptr
    }
}

struct CaseResult {
    chapter: &'static str,
    case: &'static str,
    iterations: usize,
    min_ns: u128,
    median_ns: u128,
    max_ns: u128,
    median_peak_heap_bytes: usize,
    max_peak_heap_bytes: usize,
}

fn median<T: Copy>(sorted: &[T]) -> T {
    sorted[sorted.len() / 2]
}

fn run_case<F>(
    chapter: &'static str,
    case: &'static str,
    warmup_iters: usize,
    measure_iters: usize,
    mut op: F,
) -> CaseResult
where
    F: FnMut() -> usize,
{
    for _ in 0..warmup_iters {
        black_box(op());
    }

    let mut time_samples = Vec::with_capacity(measure_iters);
    let mut mem_samples = Vec::with_capacity(measure_iters);
    for _ in 0..measure_iters {
        let baseline = current_alloc_bytes();
        PEAK_ALLOC_BYTES.store(baseline, Ordering::Relaxed);
        let start = Instant::now();
        black_box(op());
        time_samples.push(start.elapsed().as_nanos());
        mem_samples.push(PEAK_ALLOC_BYTES.load(Ordering::Relaxed).saturating_sub(baseline));
    }
    time_samples.sort_unstable();
    mem_samples.sort_unstable();

    CaseResult {
        chapter,
        case,
        iterations: measure_iters,
        min_ns: time_samples[0],
        median_ns: median(&time_samples),
        max_ns: time_samples[time_samples.len() - 1],
        median_peak_heap_bytes: median(&mem_samples),
        max_peak_heap_bytes: mem_samples[mem_samples.len() - 1],
    }
}

/// Novel-like chapter: many short paragraphs with some inline styling.
fn prose_chapter(paragraphs: usize) -> String {
    let mut out = String::from("<html><head><title>x</title></head><body><h2>Chapter</h2>");
    for i in 0..paragraphs {
        out.push_str("<p>It was the <i>best</i> of times, it was the <b>worst</b> of times; ");
        out.push_str("it was the age of wisdom &#8212; it was the age of foolishness ");
        out.push_str(&format!("({i}).</p>\n"));
    }
    out.push_str("</body></html>");
    out
}

/// One paragraph with no block boundaries at all.
fn wall_of_text(words: usize) -> String {
    let mut out = String::from("<html><body><div>");
    for i in 0..words {
        out.push_str(["lorem ", "ipsum ", "dolor ", "sit ", "amet "][i % 5]);
    }
    out.push_str("</div></body></html>");
    out
}

fn paginate(config: LayoutConfig, metrics: &HeuristicMetrics, markup: &str) -> usize {
    let engine = ChapterLayoutEngine::new(config, metrics);
    ChapterPages::new(engine, markup.as_bytes(), markup.len() as u64)
        .map(|page| page.unwrap_or_else(|e| panic!("paginate failed: {}", e)))
        .map(|page| page.len())
        .sum()
}

fn main() {
    let quick = std::env::args().any(|arg| arg == "--quick");
    let warmup_iters = if quick { 1 } else { 2 };
    let measure_iters = if quick { 3 } else { 10 };

    println!("# epub-pager benchmark");
    println!(
        "# mode={} warmup_iters={} measure_iters={}",
        if quick { "quick" } else { "full" },
        warmup_iters,
        measure_iters
    );
    println!("chapter,case,iterations,min_ns,median_ns,max_ns,median_peak_heap_bytes,max_peak_heap_bytes");

    let config = LayoutConfig::for_viewport(DISPLAY_WIDTH, DISPLAY_HEIGHT);
    let metrics = HeuristicMetrics::default();
    let chapters: [(&'static str, String); 2] = [
        ("prose-2000", prose_chapter(2000)),
        ("wall-50k", wall_of_text(50_000)),
    ];
    let section_dir = std::env::temp_dir().join(format!("epub-pager-bench-{}", std::process::id()));
    if let Err(e) = std::fs::create_dir_all(&section_dir) {
        panic!("create {}: {}", section_dir.display(), e);
    }

    let mut results = Vec::new();
    for (key, markup) in &chapters {
        let key = *key;
        results.push(run_case(key, "paginate", warmup_iters, measure_iters, || {
            paginate(config, &metrics, markup)
        }));

        let section = section_dir.join(format!("{key}.bin"));
        results.push(run_case(key, "write_section", warmup_iters, measure_iters, || {
            let engine = ChapterLayoutEngine::new(config, &metrics);
            let pages = ChapterPages::new(engine, markup.as_bytes(), 0);
            write_section(&section, config.profile_id_with(&metrics), pages)
                .unwrap_or_else(|e| panic!("write failed: {}", e)) as usize
        }));

        results.push(run_case(key, "reopen_middle_page", warmup_iters, measure_iters, || {
            let mut reader = load_section(&section, config.profile_id_with(&metrics))
                .unwrap_or_else(|| panic!("section {} missing", section.display()));
            let middle = reader.page_count() / 2;
            reader
                .load_page(middle)
                .unwrap_or_else(|e| panic!("load failed: {}", e))
                .len()
        }));
    }
    let _ = std::fs::remove_dir_all(&section_dir);

    for result in &results {
        println!(
            "{},{},{},{},{},{},{},{}",
            result.chapter,
            result.case,
            result.iterations,
            result.min_ns,
            result.median_ns,
            result.max_ns,
            result.median_peak_heap_bytes,
            result.max_peak_heap_bytes
        );
    }
}
