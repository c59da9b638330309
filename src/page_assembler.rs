//! Bin-packing of lines and images into fixed-height pages.

use std::collections::VecDeque;

use crate::config::LayoutConfig;
use crate::image_cache::ImageAsset;
use crate::metrics::FontMetrics;
use crate::page::{Page, PageElement};
use crate::text_flow::Line;

/// Packs lines and images top to bottom and hands off full pages.
///
/// Completed pages queue up until the caller drains them with
/// [`pop_completed`](Self::pop_completed); the chapter engine drains after
/// every markup event so only a handful of pages are ever held at once.
#[derive(Debug)]
pub struct PageAssembler {
    viewport_height: i32,
    line_height: i32,
    tall_image_threshold: i32,
    page: Page,
    cursor_y: i32,
    completed: VecDeque<Page>,
    pages_completed: usize,
}

impl PageAssembler {
    /// Create an assembler; line height is the font line height scaled by
    /// `cfg.line_compression`.
    pub fn new<M: FontMetrics + ?Sized>(cfg: &LayoutConfig, metrics: &M) -> Self {
        let line_height = (metrics.line_height() as f32 * cfg.line_compression) as i32;
        Self {
            viewport_height: i32::from(cfg.viewport_height),
            line_height: line_height.max(1),
            tall_image_threshold: cfg.tall_image_threshold(),
            page: Page::new(),
            cursor_y: 0,
            completed: VecDeque::with_capacity(2),
            pages_completed: 0,
        }
    }

    /// Effective line height in px.
    pub fn line_height(&self) -> i32 {
        self.line_height
    }

    /// Next free y position on the current page.
    pub fn cursor_y(&self) -> i32 {
        self.cursor_y
    }

    /// Elements placed on the page under construction.
    pub fn current_page(&self) -> &Page {
        &self.page
    }

    /// Pages handed off so far, drained or not.
    pub fn pages_completed(&self) -> usize {
        self.pages_completed
    }

    /// Place one line, starting a new page when it would overflow.
    pub fn add_line(&mut self, line: Line) {
        if self.cursor_y + self.line_height > self.viewport_height {
            self.break_page();
        }
        self.page.push(PageElement::Line {
            line,
            x: 0,
            y: clamp_coord(self.cursor_y),
        });
        self.cursor_y += self.line_height;
    }

    /// Advance the cursor without placing anything.
    pub fn add_gap(&mut self, px: i32) {
        self.cursor_y += px.max(0);
    }

    /// Place an image.
    ///
    /// Images taller than the configured share of the viewport get a page of
    /// their own, vertically centered when that page was empty. Other images
    /// sit at the cursor followed by half a line of space. Horizontal
    /// centering is a render-time concern, so `x` is always 0.
    pub fn add_image(&mut self, image: ImageAsset) {
        if image.is_empty() {
            return;
        }
        let height = i32::from(image.height);
        let is_tall = height > self.tall_image_threshold;

        if self.cursor_y > 0 && self.cursor_y + height > self.viewport_height {
            self.break_page();
        }

        let mut y = self.cursor_y;
        if is_tall && self.page.is_empty() && height < self.viewport_height {
            y = (self.viewport_height - height) / 2;
        }
        self.page.push(PageElement::Image {
            image,
            x: 0,
            y: clamp_coord(y),
        });

        if is_tall {
            self.break_page();
        } else {
            self.cursor_y = y + height + self.line_height / 2;
        }
    }

    /// Complete the last page.
    ///
    /// A chapter always yields at least one page, so an empty final page is
    /// still handed off when nothing was completed before.
    pub fn finish(&mut self) {
        if !self.page.is_empty() || self.pages_completed == 0 {
            self.complete_page();
        }
    }

    /// Take the oldest completed page.
    pub fn pop_completed(&mut self) -> Option<Page> {
        self.completed.pop_front()
    }

    /// Number of completed pages waiting to be drained.
    pub fn pending(&self) -> usize {
        self.completed.len()
    }

    fn break_page(&mut self) {
        if self.page.is_empty() {
            self.cursor_y = 0;
            return;
        }
        self.complete_page();
    }

    fn complete_page(&mut self) {
        let page = core::mem::take(&mut self.page);
        self.completed.push_back(page);
        self.pages_completed += 1;
        self.cursor_y = 0;
    }
}

fn clamp_coord(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}
