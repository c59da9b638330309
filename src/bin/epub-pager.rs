//! Command-line chapter paginator.
//!
//! Paginates one chapter of an unpacked book directory or an `.epub` file and
//! prints a per-page summary. Images are not decoded here (there is no raster
//! codec in the CLI), so `<img>` elements are dropped from the output.
//!
//! Usage:
//!   epub-pager [OPTIONS] <BOOK> <CHAPTER>
//!
//! Heap profiles (`--heap-profile`) open in
//! https://nnethercote.github.io/dh_view/dh_view.html

#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use epub_pager::{
    load_section, write_section, ChapterLayoutEngine, ChapterPages, HeuristicMetrics,
    LayoutConfig, Page, ResourceArchive, ZipArchive,
};
use serde::Serialize;

#[derive(Debug)]
struct Options {
    book: PathBuf,
    chapter: String,
    config: LayoutConfig,
    font_size: f32,
    base_path: Option<String>,
    section: Option<PathBuf>,
    heap_profile: Option<PathBuf>,
    json: bool,
}

#[derive(Serialize)]
struct PageSummary {
    index: usize,
    lines: usize,
    images: usize,
    first_line: String,
}

#[derive(Serialize)]
struct Report<'a> {
    chapter: &'a str,
    config: &'a LayoutConfig,
    profile_id: u32,
    pages: Vec<PageSummary>,
}

fn usage() {
    eprintln!("Usage: epub-pager [OPTIONS] <BOOK> <CHAPTER>");
    eprintln!();
    eprintln!("  BOOK      unpacked book directory or .epub file");
    eprintln!("  CHAPTER   archive path of the chapter XHTML");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --width <PX>           viewport width (default: 480)");
    eprintln!("  --height <PX>          viewport height (default: 800)");
    eprintln!("  --font-size <PX>       heuristic font size (default: 18)");
    eprintln!("  --config <FILE>        layout config as JSON");
    eprintln!("  --base <PATH>          base path for image references");
    eprintln!("  --section <FILE>       write a section cache and read it back");
    eprintln!("  --heap-profile <FILE>  write a dhat heap profile");
    eprintln!("  --json                 print a JSON report");
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut width = None;
    let mut height = None;
    let mut config = LayoutConfig::default();
    let mut font_size = HeuristicMetrics::default().size_px;
    let mut base_path = None;
    let mut section = None;
    let mut heap_profile = None;
    let mut json = false;
    let mut positional = Vec::with_capacity(2);

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("{} needs a value", flag))
        };
        match flag {
            "--width" => width = Some(parse_number(&value()?, flag)?),
            "--height" => height = Some(parse_number(&value()?, flag)?),
            "--font-size" => {
                font_size = value()?
                    .parse::<f32>()
                    .map_err(|e| format!("{}: {}", flag, e))?
            }
            "--config" => {
                let path = value()?;
                let raw = std::fs::read(&path).map_err(|e| format!("{}: {}", path, e))?;
                config = serde_json::from_slice(&raw).map_err(|e| format!("{}: {}", path, e))?;
            }
            "--base" => base_path = Some(value()?),
            "--section" => section = Some(PathBuf::from(value()?)),
            "--heap-profile" => heap_profile = Some(PathBuf::from(value()?)),
            "--json" => json = true,
            other if other.starts_with("--") => return Err(format!("unknown option {}", other)),
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    if let Some(width) = width {
        config.viewport_width = width;
    }
    if let Some(height) = height {
        config.viewport_height = height;
    }
    let mut positional = positional.into_iter();
    let (Some(book), Some(chapter), None) =
        (positional.next(), positional.next(), positional.next())
    else {
        return Err("expected <BOOK> and <CHAPTER>".to_string());
    };

    Ok(Options {
        book: PathBuf::from(book),
        chapter,
        config,
        font_size,
        base_path,
        section,
        heap_profile,
        json,
    })
}

fn parse_number(raw: &str, flag: &str) -> Result<u16, String> {
    raw.parse::<u16>()
        .map_err(|e| format!("{} {}: {}", flag, raw, e))
}

/// Chapter bytes plus their size for progress reporting.
fn open_chapter(book: &Path, chapter: &str) -> Result<(Box<dyn std::io::BufRead>, u64), String> {
    if book.is_dir() {
        let path = book.join(chapter.trim_start_matches('/'));
        let file = File::open(&path).map_err(|e| format!("{}: {}", path.display(), e))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        return Ok((Box::new(BufReader::new(file)), size));
    }
    let mut archive = ZipArchive::open(book).map_err(|e| format!("{}: {}", book.display(), e))?;
    let mut bytes = Vec::with_capacity(64 * 1024);
    archive
        .copy_entry(chapter, &mut bytes)
        .map_err(|e| format!("{}: {}", chapter, e))?;
    let size = bytes.len() as u64;
    Ok((Box::new(Cursor::new(bytes)), size))
}

fn default_base_path(chapter: &str) -> String {
    match chapter.rsplit_once('/') {
        Some((dir, _)) => format!("{}/", dir),
        None => String::new(),
    }
}

fn summarize(index: usize, page: &Page) -> PageSummary {
    PageSummary {
        index,
        lines: page.lines().count(),
        images: page.images().count(),
        first_line: page.lines().next().map(|l| l.text()).unwrap_or_default(),
    }
}

fn run(opts: &Options) -> Result<(), String> {
    let metrics = HeuristicMetrics {
        size_px: opts.font_size,
        ..HeuristicMetrics::default()
    };
    let (input, size) = open_chapter(&opts.book, &opts.chapter)?;
    let base_path = opts
        .base_path
        .clone()
        .unwrap_or_else(|| default_base_path(&opts.chapter));
    let engine = ChapterLayoutEngine::new(opts.config, &metrics).with_base_path(base_path);

    let show_progress = !opts.json;
    let pages = ChapterPages::new(engine, input, size).with_progress(move |percent| {
        if show_progress {
            eprintln!("  {}%", percent);
        }
    });

    let profile = opts.config.profile_id_with(&metrics);
    let mut summaries = Vec::with_capacity(16);
    if let Some(section) = &opts.section {
        let mut index = 0usize;
        let summarized = pages.inspect(|item| {
            if let Ok(page) = item {
                summaries.push(summarize(index, page));
                index += 1;
            }
        });
        let count = write_section(section, profile, summarized).map_err(|e| e.to_string())?;
        let reader = load_section(section, profile)
            .ok_or_else(|| format!("{}: section did not reopen", section.display()))?;
        if reader.page_count() != usize::from(count) {
            return Err(format!(
                "{}: wrote {} pages, read back {}",
                section.display(),
                count,
                reader.page_count()
            ));
        }
        eprintln!("section {} ({} pages)", section.display(), count);
    } else {
        for (index, page) in pages.enumerate() {
            let page = page.map_err(|e| e.to_string())?;
            summaries.push(summarize(index, &page));
        }
    }

    if opts.json {
        let report = Report {
            chapter: &opts.chapter,
            config: &opts.config,
            profile_id: profile,
            pages: summaries,
        };
        let out = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{}", out);
    } else {
        for summary in &summaries {
            println!(
                "page {:>4}: {:>3} lines {:>2} images  {}",
                summary.index, summary.lines, summary.images, summary.first_line
            );
        }
        println!("{} pages", summaries.len());
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        usage();
        return ExitCode::SUCCESS;
    }
    let opts = match parse_args(&args) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("{}", err);
            usage();
            return ExitCode::FAILURE;
        }
    };

    let _profiler = opts
        .heap_profile
        .as_ref()
        .map(|path| dhat::Profiler::builder().file_name(path).build());

    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
