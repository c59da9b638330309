//! Layout configuration and pagination policy constants.

use crate::metrics::FontMetrics;
use crate::text_flow::{Alignment, WordStyle};

/// Capacity of the pending-word buffer, in UTF-8 bytes.
///
/// Longer runs without whitespace are force-split into several words.
pub const MAX_WORD_BYTES: usize = 200;

/// Words buffered in one open block before an incremental layout pass.
pub const DEFAULT_FORCED_FLUSH_WORDS: usize = 750;

/// Images taller than this share of the viewport get a page of their own.
pub const DEFAULT_TALL_IMAGE_PERCENT: u8 = 50;

/// Maximum image height in portrait orientation, as a share of the viewport.
pub const DEFAULT_PORTRAIT_IMAGE_HEIGHT_PERCENT: u8 = 90;

/// Glyph samples measured into a profile, so a font swap that keeps the
/// same line height still invalidates cached sections.
const PROFILE_SAMPLE_TEXT: &str = "Hamburgefonstiv 0123456789 \u{e9}\u{df}\u{2014}";

/// Chapters smaller than this never report progress.
pub const DEFAULT_PROGRESS_MIN_BYTES: u64 = 50 * 1024;

/// Layout configuration for chapter pagination.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize, serde::Deserialize))]
pub struct LayoutConfig {
    /// Page content width in px.
    pub viewport_width: u16,
    /// Page content height in px.
    pub viewport_height: u16,
    /// Multiplier applied to the font line height.
    pub line_compression: f32,
    /// Add half a line of space after each closed block.
    pub extra_paragraph_spacing: bool,
    /// Alignment used by paragraph-like blocks.
    pub paragraph_alignment: Alignment,
    /// Open-block word count that triggers an incremental layout pass.
    pub forced_flush_words: usize,
    /// Tall image threshold in percent of viewport height.
    pub tall_image_percent: u8,
    /// Portrait-mode image height cap in percent of viewport height.
    pub portrait_image_height_percent: u8,
    /// Minimum chapter size in bytes before progress is reported.
    pub progress_min_bytes: u64,
    /// Progress callback granularity in percentage points.
    pub progress_step_percent: u8,
}

impl LayoutConfig {
    /// Defaults for a given viewport.
    pub fn for_viewport(width: u16, height: u16) -> Self {
        Self {
            viewport_width: width,
            viewport_height: height,
            ..Self::default()
        }
    }

    /// True when the viewport is wider than it is tall.
    pub fn is_landscape(&self) -> bool {
        self.viewport_width > self.viewport_height
    }

    /// Target bounds handed to the image cache for this orientation.
    ///
    /// Landscape allows the whole viewport. Portrait keeps full width but caps
    /// height to leave room for surrounding text.
    pub fn image_target_size(&self) -> (u16, u16) {
        if self.is_landscape() {
            (self.viewport_width, self.viewport_height)
        } else {
            let height = u32::from(self.viewport_height)
                * u32::from(self.portrait_image_height_percent.min(100))
                / 100;
            (self.viewport_width, height as u16)
        }
    }

    /// Height above which an image is placed on a dedicated page.
    pub fn tall_image_threshold(&self) -> i32 {
        i32::from(self.viewport_height) * i32::from(self.tall_image_percent.min(100)) / 100
    }

    /// Stable fingerprint over the layout settings alone.
    ///
    /// Font metrics change line breaks too, so section caches should key on
    /// [`LayoutConfig::profile_id_with`] instead.
    pub fn profile_id(&self) -> u32 {
        self.settings_hasher().finalize()
    }

    /// Fingerprint over the layout settings and the font that will measure
    /// text. Section caches record this value and are rebuilt when it changes.
    pub fn profile_id_with(&self, metrics: &dyn FontMetrics) -> u32 {
        let mut hasher = self.settings_hasher();
        hasher.update(&metrics.line_height().to_le_bytes());
        hasher.update(&metrics.space_width().to_le_bytes());
        for style in [
            WordStyle::Regular,
            WordStyle::Bold,
            WordStyle::Italic,
            WordStyle::BoldItalic,
        ] {
            hasher.update(&metrics.text_width(PROFILE_SAMPLE_TEXT, style).to_le_bytes());
        }
        hasher.finalize()
    }

    fn settings_hasher(&self) -> crc32fast::Hasher {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.viewport_width.to_le_bytes());
        hasher.update(&self.viewport_height.to_le_bytes());
        hasher.update(&self.line_compression.to_bits().to_le_bytes());
        hasher.update(&[
            u8::from(self.extra_paragraph_spacing),
            self.paragraph_alignment.to_byte(),
            self.tall_image_percent,
            self.portrait_image_height_percent,
        ]);
        hasher.update(&(self.forced_flush_words as u64).to_le_bytes());
        hasher
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            viewport_width: 480,
            viewport_height: 800,
            line_compression: 1.0,
            extra_paragraph_spacing: true,
            paragraph_alignment: Alignment::Justified,
            forced_flush_words: DEFAULT_FORCED_FLUSH_WORDS,
            tall_image_percent: DEFAULT_TALL_IMAGE_PERCENT,
            portrait_image_height_percent: DEFAULT_PORTRAIT_IMAGE_HEIGHT_PERCENT,
            progress_min_bytes: DEFAULT_PROGRESS_MIN_BYTES,
            progress_step_percent: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{FixedAdvanceMetrics, HeuristicMetrics};

    #[test]
    fn portrait_caps_image_height_to_ninety_percent() {
        let cfg = LayoutConfig::for_viewport(480, 800);
        assert_eq!(cfg.image_target_size(), (480, 720));
    }

    #[test]
    fn landscape_allows_full_viewport_for_images() {
        let cfg = LayoutConfig::for_viewport(800, 480);
        assert_eq!(cfg.image_target_size(), (800, 480));
    }

    #[test]
    fn profile_changes_with_layout_settings() {
        let base = LayoutConfig::default();
        let narrower = LayoutConfig {
            viewport_width: 400,
            ..base
        };
        let compressed = LayoutConfig {
            line_compression: 0.95,
            ..base
        };
        assert_eq!(base.profile_id(), LayoutConfig::default().profile_id());
        assert_ne!(base.profile_id(), narrower.profile_id());
        assert_ne!(base.profile_id(), compressed.profile_id());
    }

    #[test]
    fn profile_with_metrics_tracks_the_font() {
        let cfg = LayoutConfig::default();
        let small = FixedAdvanceMetrics::new(5, 5, 10);
        let large = FixedAdvanceMetrics::new(30, 10, 60);
        let same_height_wider = FixedAdvanceMetrics::new(6, 5, 10);

        assert_eq!(cfg.profile_id_with(&small), cfg.profile_id_with(&small));
        assert_ne!(cfg.profile_id_with(&small), cfg.profile_id_with(&large));
        assert_ne!(cfg.profile_id_with(&small), cfg.profile_id_with(&same_height_wider));
        assert_ne!(cfg.profile_id_with(&small), cfg.profile_id());

        let heuristic = HeuristicMetrics::default();
        let bigger = HeuristicMetrics {
            size_px: 22.0,
            ..heuristic
        };
        assert_ne!(cfg.profile_id_with(&heuristic), cfg.profile_id_with(&bigger));
    }

    #[test]
    fn tall_threshold_is_half_viewport_by_default() {
        let cfg = LayoutConfig::for_viewport(480, 1200);
        assert_eq!(cfg.tall_image_threshold(), 600);
    }
}
