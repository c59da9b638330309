//! Font measurement collaborators used by line breaking and page packing.

use crate::text_flow::WordStyle;

/// Width and height queries for the active reading font.
pub trait FontMetrics {
    /// Rendered width of `text` in px for the given style.
    fn text_width(&self, text: &str, style: WordStyle) -> i32;

    /// Width of one inter-word space in px.
    fn space_width(&self) -> i32;

    /// Unscaled line height in px.
    fn line_height(&self) -> i32;
}

impl<M: FontMetrics + ?Sized> FontMetrics for &M {
    fn text_width(&self, text: &str, style: WordStyle) -> i32 {
        (**self).text_width(text, style)
    }

    fn space_width(&self) -> i32 {
        (**self).space_width()
    }

    fn line_height(&self) -> i32 {
        (**self).line_height()
    }
}

/// Every glyph has the same advance. Deterministic, used by tests and tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedAdvanceMetrics {
    pub advance: i32,
    pub space: i32,
    pub line_height: i32,
}

impl FixedAdvanceMetrics {
    pub const fn new(advance: i32, space: i32, line_height: i32) -> Self {
        Self {
            advance,
            space,
            line_height,
        }
    }
}

impl Default for FixedAdvanceMetrics {
    fn default() -> Self {
        Self::new(10, 10, 20)
    }
}

impl FontMetrics for FixedAdvanceMetrics {
    fn text_width(&self, text: &str, _style: WordStyle) -> i32 {
        text.chars().count() as i32 * self.advance
    }

    fn space_width(&self) -> i32 {
        self.space
    }

    fn line_height(&self) -> i32 {
        self.line_height
    }
}

/// Proportional width estimate from per-glyph class widths.
///
/// Useful when no rasterized font is loaded (host tools, previews).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeuristicMetrics {
    /// Font size in px.
    pub size_px: f32,
    /// Line height as a multiple of `size_px`.
    pub line_height: f32,
}

impl Default for HeuristicMetrics {
    fn default() -> Self {
        Self {
            size_px: 18.0,
            line_height: 1.4,
        }
    }
}

impl FontMetrics for HeuristicMetrics {
    fn text_width(&self, text: &str, style: WordStyle) -> i32 {
        let mut em_sum = 0.0f32;
        for ch in text.chars() {
            em_sum += proportional_glyph_em_width(ch);
        }
        let mut scale = 1.0f32;
        if style.is_bold() {
            scale += 0.03;
        }
        if style.is_italic() {
            scale += 0.01;
        }
        (em_sum * self.size_px * scale).ceil() as i32
    }

    fn space_width(&self) -> i32 {
        (0.32 * self.size_px).round().max(1.0) as i32
    }

    fn line_height(&self) -> i32 {
        (self.size_px * self.line_height).round().max(1.0) as i32
    }
}

fn proportional_glyph_em_width(ch: char) -> f32 {
    match ch {
        'i' | 'l' | 'I' | '|' | '!' => 0.24,
        '.' | ',' | ':' | ';' | '\'' | '"' | '`' => 0.23,
        '-' | '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' => 0.34,
        '(' | ')' | '[' | ']' | '{' | '}' => 0.30,
        'f' | 't' | 'j' | 'r' => 0.34,
        'm' | 'w' | 'M' | 'W' | '@' | '%' | '&' | '#' => 0.74,
        c if c.is_ascii_digit() => 0.52,
        c if c.is_ascii_uppercase() => 0.64,
        c if c.is_ascii_lowercase() => 0.52,
        c if c.is_ascii_punctuation() => 0.42,
        _ => 0.56,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_advance_counts_chars_not_bytes() {
        let m = FixedAdvanceMetrics::new(7, 3, 12);
        assert_eq!(m.text_width("caf\u{e9}", WordStyle::Regular), 28);
    }

    #[test]
    fn heuristic_bold_is_not_narrower_than_regular() {
        let m = HeuristicMetrics::default();
        let regular = m.text_width("Typesetting", WordStyle::Regular);
        let bold = m.text_width("Typesetting", WordStyle::Bold);
        assert!(bold >= regular);
        assert!(m.text_width("mmm", WordStyle::Regular) > m.text_width("iii", WordStyle::Regular));
    }
}
