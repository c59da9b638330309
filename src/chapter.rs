//! Chapter layout state machine.
//!
//! [`ChapterLayoutEngine`] consumes start/characters/end events for one
//! chapter and drives text flow, image resolution and page assembly. It does
//! no I/O of its own: the markup driver in [`crate::markup`] feeds it and
//! drains completed pages after every event.

use crate::config::{LayoutConfig, MAX_WORD_BYTES};
use crate::image_cache::ImageResolver;
use crate::metrics::FontMetrics;
use crate::page::Page;
use crate::page_assembler::PageAssembler;
use crate::text_flow::{Alignment, TextRun, WordStyle};

/// Prefix word added at the start of every table row.
pub const ROW_BULLET: &str = "\u{25B8}";
/// Separator word placed between table cells.
pub const CELL_SEPARATOR: &str = "\u{00B7}";

const SOFT_HYPHEN: char = '\u{00AD}';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TagKind {
    Header,
    Block,
    LineBreak,
    TableRow,
    Bold,
    Italic,
    DataCell,
    HeaderCell,
    Image,
    Skip,
    Other,
}

impl TagKind {
    fn classify(name: &str) -> Self {
        let local = name.rsplit(':').next().unwrap_or(name);
        let lower = |tag: &str| local.eq_ignore_ascii_case(tag);
        if ["h1", "h2", "h3", "h4", "h5", "h6"].into_iter().any(lower) {
            Self::Header
        } else if lower("br") {
            Self::LineBreak
        } else if lower("tr") {
            Self::TableRow
        } else if ["p", "li", "div", "blockquote"].into_iter().any(lower) {
            Self::Block
        } else if lower("b") || lower("strong") {
            Self::Bold
        } else if lower("i") || lower("em") {
            Self::Italic
        } else if lower("td") {
            Self::DataCell
        } else if lower("th") {
            Self::HeaderCell
        } else if lower("img") {
            Self::Image
        } else if lower("head") {
            Self::Skip
        } else {
            Self::Other
        }
    }

    /// Closing one of these commits the word being built.
    fn breaks_text(self) -> bool {
        !matches!(self, Self::Image | Self::Skip | Self::Other)
    }
}

fn is_pagebreak(attrs: &[(&str, &str)]) -> bool {
    attrs.iter().any(|&(key, value)| {
        (key == "role" && value == "doc-pagebreak") || (key == "epub:type" && value == "pagebreak")
    })
}

fn is_word_break(ch: char) -> bool {
    matches!(ch, ' ' | '\r' | '\n' | '\t')
}

/// Open a style or skip region at `depth`, keeping an outer region's start.
fn open_region(region: &mut Option<usize>, depth: usize) {
    *region = Some(region.map_or(depth, |start| start.min(depth)));
}

/// Close the region when nesting returns to the depth it was opened at.
fn close_region(region: &mut Option<usize>, depth: usize) {
    if *region == Some(depth) {
        *region = None;
    }
}

/// Join `href` onto the chapter base path and normalize it to an archive
/// path.
///
/// `.` and `..` segments are folded, a `#fragment` is dropped, and a
/// reference starting with `/` ignores the base path. The result never
/// starts with `/`.
pub fn resolve_href(base_path: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let joined;
    let full = if href.starts_with('/') || base_path.is_empty() {
        href
    } else if base_path.ends_with('/') {
        joined = format!("{}{}", base_path, href);
        joined.as_str()
    } else {
        joined = format!("{}/{}", base_path, href);
        joined.as_str()
    };

    let mut segments: Vec<&str> = Vec::with_capacity(8);
    for segment in full.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Incremental chapter layout.
///
/// Feed events with [`start_element`](Self::start_element),
/// [`characters`](Self::characters) and [`end_element`](Self::end_element),
/// call [`finish`](Self::finish) at end of input, and take pages with
/// [`pop_page`](Self::pop_page) as they complete.
pub struct ChapterLayoutEngine<'a> {
    config: LayoutConfig,
    metrics: &'a dyn FontMetrics,
    images: Option<&'a mut dyn ImageResolver>,
    base_path: String,
    depth: usize,
    skip_from: Option<usize>,
    bold_from: Option<usize>,
    italic_from: Option<usize>,
    first_cell_in_row: bool,
    word: heapless::String<MAX_WORD_BYTES>,
    run: TextRun,
    assembler: PageAssembler,
    forced_flushes: usize,
    finished: bool,
}

impl<'a> ChapterLayoutEngine<'a> {
    pub fn new(config: LayoutConfig, metrics: &'a dyn FontMetrics) -> Self {
        Self {
            assembler: PageAssembler::new(&config, metrics),
            run: TextRun::new(config.paragraph_alignment),
            config,
            metrics,
            images: None,
            base_path: String::new(),
            depth: 0,
            skip_from: None,
            bold_from: None,
            italic_from: None,
            first_cell_in_row: true,
            word: heapless::String::new(),
            forced_flushes: 0,
            finished: false,
        }
    }

    /// Resolve `<img>` references through `images`. Without a resolver
    /// images are dropped.
    pub fn with_images(mut self, images: &'a mut dyn ImageResolver) -> Self {
        self.images = Some(images);
        self
    }

    /// Archive directory that relative image references are joined onto.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Current element nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// True while inside a skipped element.
    pub fn is_skipping(&self) -> bool {
        self.skip_from.is_some_and(|start| start < self.depth)
    }

    /// Number of mid-block layout passes forced by oversized blocks.
    pub fn forced_flushes(&self) -> usize {
        self.forced_flushes
    }

    /// Words waiting in the open block.
    pub fn buffered_words(&self) -> usize {
        self.run.len()
    }

    /// Pages completed so far, drained or not.
    pub fn pages_completed(&self) -> usize {
        self.assembler.pages_completed()
    }

    /// Take the oldest completed page.
    pub fn pop_page(&mut self) -> Option<Page> {
        self.assembler.pop_completed()
    }

    /// Handle an element start. `attrs` are raw `(qualified name, value)`
    /// pairs in document order.
    pub fn start_element(&mut self, name: &str, attrs: &[(&str, &str)]) {
        if self.is_skipping() {
            self.depth += 1;
            return;
        }

        let kind = TagKind::classify(name);
        if kind == TagKind::Image {
            self.place_image(attrs);
            self.depth += 1;
            return;
        }
        if kind == TagKind::Skip || is_pagebreak(attrs) {
            open_region(&mut self.skip_from, self.depth);
            self.depth += 1;
            return;
        }

        match kind {
            TagKind::Header => {
                self.start_block(Alignment::Center);
                open_region(&mut self.bold_from, self.depth);
            }
            TagKind::Block => self.start_block(self.config.paragraph_alignment),
            TagKind::LineBreak => self.start_block(self.run.alignment()),
            TagKind::TableRow => {
                self.start_block(self.config.paragraph_alignment);
                self.run.add_word(ROW_BULLET, WordStyle::Regular);
                self.first_cell_in_row = true;
            }
            TagKind::Bold => open_region(&mut self.bold_from, self.depth),
            TagKind::Italic => open_region(&mut self.italic_from, self.depth),
            TagKind::DataCell => {
                if !self.first_cell_in_row {
                    self.run.add_word(CELL_SEPARATOR, WordStyle::Regular);
                }
                self.first_cell_in_row = false;
            }
            TagKind::HeaderCell => {
                if !self.first_cell_in_row {
                    self.run.add_word(CELL_SEPARATOR, WordStyle::Bold);
                }
                self.first_cell_in_row = false;
                open_region(&mut self.bold_from, self.depth);
            }
            TagKind::Image | TagKind::Skip | TagKind::Other => {}
        }
        self.depth += 1;
    }

    /// Handle character data.
    pub fn characters(&mut self, text: &str) {
        if self.is_skipping() {
            return;
        }
        let style = self.current_style();
        for ch in text.chars() {
            if is_word_break(ch) {
                self.commit_word(style);
                continue;
            }
            if ch == SOFT_HYPHEN {
                continue;
            }
            if self.word.push(ch).is_err() {
                self.commit_word(style);
                // an empty buffer always has room for one char
                let _ = self.word.push(ch);
            }
        }
    }

    /// Handle an element end.
    pub fn end_element(&mut self, name: &str) {
        // closes inside a skipped region leave the pending word open
        if !self.word.is_empty()
            && !self.is_skipping()
            && (TagKind::classify(name).breaks_text() || self.depth == 1)
        {
            let style = self.current_style();
            self.commit_word(style);
        }

        self.depth = self.depth.saturating_sub(1);
        close_region(&mut self.skip_from, self.depth);
        close_region(&mut self.bold_from, self.depth);
        close_region(&mut self.italic_from, self.depth);
    }

    /// Flush the open block and complete the last page.
    ///
    /// Calling it again is a no-op.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let style = self.current_style();
        self.commit_word(style);
        self.flush_block();
        self.assembler.finish();
    }

    fn current_style(&self) -> WordStyle {
        let active = |region: Option<usize>| region.is_some_and(|start| start < self.depth);
        WordStyle::from_flags(active(self.bold_from), active(self.italic_from))
    }

    /// Move the word being built into the open block.
    fn commit_word(&mut self, style: WordStyle) {
        if self.word.is_empty() {
            return;
        }
        self.run.add_word(self.word.as_str(), style);
        self.word.clear();

        if self.run.len() > self.config.forced_flush_words {
            log::warn!(
                "text block has {} words, laying out early",
                self.run.len()
            );
            self.forced_flushes += 1;
            self.layout_run(false);
        }
    }

    fn start_block(&mut self, alignment: Alignment) {
        let style = self.current_style();
        self.commit_word(style);
        if !self.run.is_empty() {
            self.flush_block();
        }
        self.run.set_alignment(alignment);
    }

    /// Lay out every word of the open block and add the paragraph gap.
    fn flush_block(&mut self) {
        self.layout_run(true);
        if self.config.extra_paragraph_spacing {
            let gap = self.assembler.line_height() / 2;
            self.assembler.add_gap(gap);
        }
    }

    fn layout_run(&mut self, commit_all: bool) {
        let assembler = &mut self.assembler;
        self.run.layout_and_extract_lines(
            self.metrics,
            i32::from(self.config.viewport_width),
            |line| assembler.add_line(line),
            commit_all,
        );
    }

    fn place_image(&mut self, attrs: &[(&str, &str)]) {
        let src = attrs
            .iter()
            .find(|(key, _)| matches!(*key, "src" | "href" | "xlink:href"))
            .map(|&(_, value)| value)
            .filter(|value| !value.is_empty());
        let Some(src) = src else {
            log::warn!("image tag without a source attribute");
            return;
        };
        let href = resolve_href(&self.base_path, src);

        let style = self.current_style();
        self.commit_word(style);
        if !self.run.is_empty() {
            self.flush_block();
        }

        let Some(images) = self.images.as_deref_mut() else {
            log::debug!("no image resolver, dropping {}", href);
            return;
        };
        let (max_width, max_height) = self.config.image_target_size();
        if let Some(asset) = images.resolve(&href, max_width, max_height) {
            self.assembler.add_image(asset);
        }
    }
}

impl core::fmt::Debug for ChapterLayoutEngine<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChapterLayoutEngine")
            .field("config", &self.config)
            .field("base_path", &self.base_path)
            .field("depth", &self.depth)
            .field("skip_from", &self.skip_from)
            .field("bold_from", &self.bold_from)
            .field("italic_from", &self.italic_from)
            .field("buffered_words", &self.run.len())
            .field("pages_completed", &self.assembler.pages_completed())
            .finish_non_exhaustive()
    }
}
