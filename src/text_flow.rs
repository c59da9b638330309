//! Word buffering and greedy line breaking for one text block.
//!
//! A [`TextRun`] collects styled words while a block element is open. Layout
//! turns the run into position-ready [`Line`]s that fit a width budget.
//! Ownership of each emitted line moves to the caller exactly once.

use crate::metrics::FontMetrics;

/// Font style of a single word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WordStyle {
    #[default]
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl WordStyle {
    /// Combine bold/italic flags into a style.
    pub fn from_flags(bold: bool, italic: bool) -> Self {
        match (bold, italic) {
            (true, true) => Self::BoldItalic,
            (true, false) => Self::Bold,
            (false, true) => Self::Italic,
            (false, false) => Self::Regular,
        }
    }

    pub fn is_bold(self) -> bool {
        matches!(self, Self::Bold | Self::BoldItalic)
    }

    pub fn is_italic(self) -> bool {
        matches!(self, Self::Italic | Self::BoldItalic)
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::Regular => 0,
            Self::Bold => 1,
            Self::Italic => 2,
            Self::BoldItalic => 3,
        }
    }

    pub(crate) fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Regular),
            1 => Some(Self::Bold),
            2 => Some(Self::Italic),
            3 => Some(Self::BoldItalic),
            _ => None,
        }
    }
}

/// Horizontal alignment of a text block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cli", derive(serde::Serialize, serde::Deserialize))]
pub enum Alignment {
    /// Stretch inter-word gaps to the full width, except on a block's last line.
    #[default]
    Justified,
    Left,
    Center,
    Right,
}

impl Alignment {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::Justified => 0,
            Self::Left => 1,
            Self::Center => 2,
            Self::Right => 3,
        }
    }

    pub(crate) fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Justified),
            1 => Some(Self::Left),
            2 => Some(Self::Center),
            3 => Some(Self::Right),
            _ => None,
        }
    }
}

/// Atomic unit of text flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    pub style: WordStyle,
}

/// A word placed on a line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineWord {
    pub text: String,
    /// Left edge relative to the line start.
    pub x: u16,
    pub style: WordStyle,
}

/// A wrapped, position-ready row of words.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    words: Vec<LineWord>,
    alignment: Alignment,
}

impl Line {
    pub fn new(words: Vec<LineWord>, alignment: Alignment) -> Self {
        Self { words, alignment }
    }

    pub fn words(&self) -> &[LineWord] {
        &self.words
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Plain text of the line, words joined by single spaces.
    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.words.iter().map(|w| w.text.len() + 1).sum());
        for (idx, word) in self.words.iter().enumerate() {
            if idx > 0 {
                out.push(' ');
            }
            out.push_str(&word.text);
        }
        out
    }

    /// Right edge of the rightmost word.
    pub fn measured_width<M: FontMetrics + ?Sized>(&self, metrics: &M) -> i32 {
        self.words
            .iter()
            .map(|w| i32::from(w.x) + metrics.text_width(&w.text, w.style))
            .max()
            .unwrap_or(0)
    }
}

/// Accumulated, not yet wrapped words of one block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextRun {
    words: Vec<Word>,
    alignment: Alignment,
}

impl TextRun {
    pub fn new(alignment: Alignment) -> Self {
        Self {
            words: Vec::with_capacity(16),
            alignment,
        }
    }

    /// Append a word. No layout work happens here.
    pub fn add_word(&mut self, text: impl Into<String>, style: WordStyle) {
        self.words.push(Word {
            text: text.into(),
            style,
        });
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub fn set_alignment(&mut self, alignment: Alignment) {
        self.alignment = alignment;
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    /// Greedy line breaking.
    ///
    /// Words are accumulated left to right until the next one would overflow
    /// `width_budget`; each closed line goes to `emit`. A word that does not
    /// fit even on an empty line is emitted alone, so layout always makes
    /// progress.
    ///
    /// With `commit_all == false` the last, possibly incomplete line stays in
    /// the run so later words can continue it. With `commit_all == true`
    /// every word is emitted and the run ends up empty.
    pub fn layout_and_extract_lines<M, F>(
        &mut self,
        metrics: &M,
        width_budget: i32,
        mut emit: F,
        commit_all: bool,
    ) where
        M: FontMetrics + ?Sized,
        F: FnMut(Line),
    {
        if self.words.is_empty() {
            return;
        }
        let width_budget = width_budget.max(1);
        let space = metrics.space_width().max(0);
        let widths: Vec<i32> = self
            .words
            .iter()
            .map(|w| metrics.text_width(&w.text, w.style).max(0))
            .collect();
        let line_ends = greedy_line_ends(&widths, space, width_budget);

        let emit_count = if commit_all {
            line_ends.len()
        } else {
            line_ends.len().saturating_sub(1)
        };
        if emit_count == 0 {
            return;
        }

        let alignment = self.alignment;
        let consumed = line_ends[emit_count - 1];
        let mut drained = self.words.drain(..consumed);
        let mut start = 0usize;
        for (idx, &end) in line_ends[..emit_count].iter().enumerate() {
            let is_block_end = idx + 1 == line_ends.len();
            let words: Vec<Word> = drained.by_ref().take(end - start).collect();
            emit(build_line(
                words,
                &widths[start..end],
                width_budget,
                space,
                alignment,
                is_block_end,
            ));
            start = end;
        }
    }
}

fn greedy_line_ends(widths: &[i32], space: i32, width_budget: i32) -> Vec<usize> {
    let mut ends = Vec::with_capacity(widths.len() / 8 + 1);
    let mut idx = 0usize;
    while idx < widths.len() {
        let mut line_width = widths[idx];
        idx += 1;
        while idx < widths.len() && line_width + space + widths[idx] <= width_budget {
            line_width += space + widths[idx];
            idx += 1;
        }
        ends.push(idx);
    }
    ends
}

fn build_line(
    words: Vec<Word>,
    widths: &[i32],
    width_budget: i32,
    space: i32,
    alignment: Alignment,
    is_block_end: bool,
) -> Line {
    let total_word_width: i32 = widths.iter().sum();
    let gaps = widths.len().saturating_sub(1) as i32;
    let natural_width = total_word_width + gaps * space;

    let mut x = match alignment {
        Alignment::Center => ((width_budget - natural_width) / 2).max(0),
        Alignment::Right => (width_budget - natural_width).max(0),
        Alignment::Justified | Alignment::Left => 0,
    };
    let spacing = if alignment == Alignment::Justified && !is_block_end && gaps > 0 {
        ((width_budget - total_word_width) / gaps).max(space)
    } else {
        space
    };

    let mut placed = Vec::with_capacity(words.len());
    for (word, width) in words.into_iter().zip(widths) {
        placed.push(LineWord {
            text: word.text,
            x: u16::try_from(x.max(0)).unwrap_or(u16::MAX),
            style: word.style,
        });
        x += width + spacing;
    }
    Line::new(placed, alignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{FixedAdvanceMetrics, HeuristicMetrics};

    fn run_of(words: &[&str], alignment: Alignment) -> TextRun {
        let mut run = TextRun::new(alignment);
        for w in words {
            run.add_word(*w, WordStyle::Regular);
        }
        run
    }

    fn collect_lines(run: &mut TextRun, width: i32, commit_all: bool) -> Vec<Line> {
        let metrics = FixedAdvanceMetrics::new(10, 10, 20);
        let mut lines = Vec::new();
        run.layout_and_extract_lines(&metrics, width, |line| lines.push(line), commit_all);
        lines
    }

    #[test]
    fn every_line_fits_the_budget() {
        let metrics = FixedAdvanceMetrics::new(10, 10, 20);
        let text = "the quick brown fox jumps over the lazy dog and keeps running far away";
        for width in [80, 100, 137, 250, 1000] {
            let mut run = run_of(&text.split(' ').collect::<Vec<_>>(), Alignment::Justified);
            let lines = collect_lines(&mut run, width, true);
            assert!(!lines.is_empty());
            for line in &lines {
                assert!(
                    line.measured_width(&metrics) <= width,
                    "line {:?} overflows {}",
                    line.text(),
                    width
                );
            }
            assert!(run.is_empty());
        }
    }

    #[test]
    fn proportional_layout_fits_and_keeps_every_word_once() {
        let metrics = HeuristicMetrics::default();
        let texts: &[&[&str]] = &[
            &["a"],
            &["I", "am", "a", "cat"],
            &["Typesetting", "mmmm", "iiii", "W", "\u{e9}t\u{e9}", "caf\u{e9}", "na\u{ef}ve"],
            &["supercalifragilisticexpialidocious", "is", "long", "x", "yy", "zzz"],
            &["the", "quick", "brown", "fox", "jumps", "over", "the", "lazy", "dog", "again"],
        ];
        let styles = [
            WordStyle::Regular,
            WordStyle::Bold,
            WordStyle::Italic,
            WordStyle::BoldItalic,
        ];
        let alignments = [
            Alignment::Left,
            Alignment::Right,
            Alignment::Center,
            Alignment::Justified,
        ];

        for budget in [1, 5, 37, 120, 480] {
            for text in texts {
                for alignment in alignments {
                    let input: Vec<Word> = text
                        .iter()
                        .enumerate()
                        .map(|(i, w)| Word {
                            text: (*w).to_string(),
                            style: styles[(i * 3 + text.len()) % styles.len()],
                        })
                        .collect();

                    let split = input.len() / 2;
                    let mut run = TextRun::new(alignment);
                    for word in &input[..split] {
                        run.add_word(word.text.clone(), word.style);
                    }
                    let mut lines = Vec::new();
                    run.layout_and_extract_lines(&metrics, budget, |l| lines.push(l), false);
                    for word in &input[split..] {
                        run.add_word(word.text.clone(), word.style);
                    }
                    run.layout_and_extract_lines(&metrics, budget, |l| lines.push(l), true);
                    assert!(run.is_empty());

                    for line in &lines {
                        assert!(!line.is_empty());
                        if line.words().len() > 1 {
                            assert!(
                                line.measured_width(&metrics) <= budget,
                                "{:?} line {:?} overflows {}",
                                alignment,
                                line.text(),
                                budget
                            );
                        }
                    }
                    let output: Vec<Word> = lines
                        .iter()
                        .flat_map(|l| l.words())
                        .map(|w| Word {
                            text: w.text.clone(),
                            style: w.style,
                        })
                        .collect();
                    assert_eq!(output, input, "budget {} {:?}", budget, alignment);
                }
            }
        }
    }

    #[test]
    fn oversized_word_is_emitted_alone() {
        let mut run = run_of(&["a", "enormously", "b"], Alignment::Left);
        let lines = collect_lines(&mut run, 30, true);
        let texts: Vec<String> = lines.iter().map(Line::text).collect();
        assert_eq!(texts, vec!["a", "enormously", "b"]);
    }

    #[test]
    fn partial_flush_keeps_last_line_in_run() {
        let words: Vec<String> = (0..20).map(|i| format!("w{:02}", i)).collect();
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let mut run = run_of(&refs, Alignment::Justified);
        // "wNN" is 30px, space 10px: three words per 110px line.
        let lines = collect_lines(&mut run, 110, false);
        assert_eq!(lines.len(), 6);
        assert_eq!(run.len(), 2);
        assert_eq!(run.words()[0].text, "w18");
    }

    #[test]
    fn incremental_flush_matches_single_pass_layout() {
        let words: Vec<String> = (0..57).map(|i| "x".repeat(1 + i % 7)).collect();
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();

        let mut batch = run_of(&refs, Alignment::Justified);
        let expected = collect_lines(&mut batch, 150, true);

        let mut incremental = run_of(&refs[..30], Alignment::Justified);
        let mut got = collect_lines(&mut incremental, 150, false);
        for w in &refs[30..] {
            incremental.add_word(*w, WordStyle::Regular);
        }
        got.extend(collect_lines(&mut incremental, 150, true));

        assert_eq!(got, expected);
    }

    #[test]
    fn justified_lines_stretch_but_last_line_does_not() {
        let mut run = run_of(&["aa", "bb", "cc", "dd"], Alignment::Justified);
        let lines = collect_lines(&mut run, 100, true);
        assert_eq!(lines.len(), 2);
        let first = &lines[0];
        assert_eq!(first.words()[0].x, 0);
        // words are 20px, gaps stretched so the last word ends at the edge
        assert_eq!(first.words()[2].x, 80);
        let last = &lines[1];
        assert_eq!(last.words()[0].x, 0);
    }

    #[test]
    fn center_and_right_alignment_offset_the_line() {
        let mut centered = run_of(&["abc"], Alignment::Center);
        let lines = collect_lines(&mut centered, 100, true);
        assert_eq!(lines[0].words()[0].x, 35);

        let mut right = run_of(&["abc"], Alignment::Right);
        let lines = collect_lines(&mut right, 100, true);
        assert_eq!(lines[0].words()[0].x, 70);
    }

    #[test]
    fn empty_run_emits_nothing() {
        let mut run = TextRun::new(Alignment::Left);
        assert!(collect_lines(&mut run, 100, true).is_empty());
    }

    #[test]
    fn style_flags_round_trip_through_bytes() {
        for style in [
            WordStyle::Regular,
            WordStyle::Bold,
            WordStyle::Italic,
            WordStyle::BoldItalic,
        ] {
            assert_eq!(WordStyle::from_byte(style.to_byte()), Some(style));
            assert_eq!(
                WordStyle::from_flags(style.is_bold(), style.is_italic()),
                style
            );
        }
        assert_eq!(WordStyle::from_byte(9), None);
    }
}
