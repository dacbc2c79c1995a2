//! Pixel measurement of caption text containing glyph runs.

use crate::fonts::Font;
use crate::glyphs::{classify, Run};

/// How glyph runs are sized and placed relative to the surrounding text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphOptions {
    /// Glyph square edge as a multiple of the font size
    pub scale: f32,
    /// Pixel nudge applied when drawing a glyph bitmap
    pub offset: (i32, i32),
    /// Vertical gap between lines of multi-line text
    pub spacing: u32,
}

impl Default for GlyphOptions {
    fn default() -> Self {
        GlyphOptions {
            scale: 1.0,
            offset: (0, 0),
            spacing: 4,
        }
    }
}

impl GlyphOptions {
    /// Edge length in pixels of a glyph drawn next to `font`.
    pub fn glyph_size(&self, font: &dyn Font) -> u32 {
        (self.scale * font.size()) as u32
    }
}

/// Width and height of one line of already classified runs.
///
/// Widths add up run by run, with no kerning across run boundaries.
pub fn measure_runs(runs: &[Run], font: &dyn Font, options: &GlyphOptions) -> (u32, u32) {
    let glyph_size = options.glyph_size(font);
    runs.iter().fold((0, 0), |(width, height), run| match run {
        Run::Text(text) => {
            let (w, h) = font.measure(text);
            (width + w, height.max(h))
        }
        Run::StandardGlyph(_) | Run::PlatformGlyph(_) => {
            (width + glyph_size, height.max(glyph_size))
        }
    })
}

/// Width and height of `text`, which may span several lines.
///
/// The width is the widest line; heights add up with `options.spacing` between
/// lines.
pub fn measure(text: &str, font: &dyn Font, options: &GlyphOptions) -> (u32, u32) {
    let mut width = 0;
    let mut height = 0;
    for (i, line) in text.split('\n').enumerate() {
        let (w, h) = measure_runs(&classify(line), font, options);
        width = width.max(w);
        height += h;
        if i > 0 {
            height += options.spacing;
        }
    }
    (width, height)
}

/// Width of a single line, the quantity the line wrapper compares.
pub fn line_width(line: &str, font: &dyn Font, options: &GlyphOptions) -> u32 {
    measure_runs(&classify(line), font, options).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::NativeFont;

    fn font() -> NativeFont {
        NativeFont::bundled(30.0).unwrap()
    }

    #[test]
    fn test_plain_text_matches_font() {
        let font = font();
        let options = GlyphOptions::default();
        assert_eq!(measure("hello", &font, &options), font.measure("hello"));
    }

    #[test]
    fn test_glyph_runs_use_square_size() {
        let font = font();
        let options = GlyphOptions::default();
        let (text_w, _) = font.measure("a ");
        let (w, h) = measure("a 😀", &font, &options);
        assert_eq!(w, text_w + 30);
        assert!(h >= 30);

        let half = GlyphOptions {
            scale: 0.5,
            ..GlyphOptions::default()
        };
        assert_eq!(measure("😀", &font, &half).0, 15);
    }

    #[test]
    fn test_platform_token_measured_as_one_glyph() {
        let font = font();
        let options = GlyphOptions::default();
        let token = "<:blob:123456789012345678>";
        assert_eq!(measure(token, &font, &options).0, 30);
    }

    #[test]
    fn test_multiline_takes_widest_line() {
        let font = font();
        let options = GlyphOptions::default();
        let (one_w, one_h) = measure("a", &font, &options);
        let (w, h) = measure("a\nmuch wider line", &font, &options);
        assert!(w > one_w);
        assert_eq!(w, line_width("much wider line", &font, &options));
        assert!(h >= 2 * one_h + options.spacing);
    }

    #[test]
    fn test_measure_is_idempotent() {
        let font = font();
        let options = GlyphOptions::default();
        let text = "repeat 🇫🇷 me";
        assert_eq!(measure(text, &font, &options), measure(text, &font, &options));
    }

    #[test]
    fn test_empty() {
        let font = font();
        assert_eq!(measure("", &font, &GlyphOptions::default()), (0, 0));
    }
}
