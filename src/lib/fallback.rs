//! Fallback font composition.
//!
//! A [`FallbackFont`] wraps a primary [`NativeFont`] and draws every character the
//! primary lacks with a secondary font, shifted by a configurable offset. Character
//! coverage is read once per font file from its cmap and cached.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use image::{Rgba, RgbaImage};
use log::{debug, warn};
use once_cell::sync::{Lazy, OnceCell};
use skrifa::{FontRef, MetadataProvider};

use crate::fonts::{load_font, Font, FontSource, NativeFont};
use crate::CaptionError;

/// Gap in pixels between stacked lines of a multi-line fallback draw.
pub const FALLBACK_LEADING: u32 = 4;

/// The set of code points a font maps to a glyph, stored as sorted inclusive ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    ranges: Vec<(u32, u32)>,
}

impl Coverage {
    /// Builds coverage from a font's character map.
    pub fn from_font_data(data: &[u8]) -> Option<Self> {
        let font = FontRef::new(data).ok()?;
        let mut codepoints: Vec<u32> = font
            .charmap()
            .mappings()
            .filter(|(_, glyph)| glyph.to_u32() != 0)
            .map(|(cp, _)| cp)
            .collect();
        codepoints.sort_unstable();
        codepoints.dedup();
        Some(Self::from_sorted(&codepoints))
    }

    fn from_sorted(codepoints: &[u32]) -> Self {
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for &cp in codepoints {
            match ranges.last_mut() {
                Some((_, end)) if *end + 1 == cp => *end = cp,
                _ => ranges.push((cp, cp)),
            }
        }
        Coverage { ranges }
    }

    pub fn covers(&self, ch: char) -> bool {
        let cp = ch as u32;
        self.ranges
            .binary_search_by(|&(start, end)| {
                if end < cp {
                    std::cmp::Ordering::Less
                } else if start > cp {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Number of covered code points.
    pub fn len(&self) -> usize {
        self.ranges
            .iter()
            .map(|(start, end)| (end - start + 1) as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Splits `text` into maximal runs that are all covered or all uncovered.
    pub fn partition(&self, text: &str) -> Vec<Segment> {
        let mut segments: Vec<Segment> = Vec::new();
        for ch in text.chars() {
            let covered = self.covers(ch);
            match segments.last_mut() {
                Some(last) if last.covered == covered => last.text.push(ch),
                _ => segments.push(Segment {
                    text: ch.to_string(),
                    covered,
                }),
            }
        }
        segments
    }
}

/// A run of text drawn by a single font.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    /// Whether the primary font covers this run
    pub covered: bool,
}

static COVERAGE: Lazy<RwLock<HashMap<FontSource, Arc<Coverage>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Returns the cached coverage of `source`, computing it on first use.
pub fn coverage_for(source: &FontSource) -> Result<Arc<Coverage>, CaptionError> {
    if let Ok(cache) = COVERAGE.read() {
        if let Some(coverage) = cache.get(source) {
            return Ok(Arc::clone(coverage));
        }
    }

    let loaded = load_font(source)?;
    let coverage = Coverage::from_font_data(&loaded.data).ok_or_else(|| CaptionError::Font {
        font_name: source.to_string(),
        message: "the character map could not be read".to_string(),
        suggestion: "Use a font with a Unicode cmap table".to_string(),
    })?;
    debug!("{} covers {} code points", source, coverage.len());

    let coverage = Arc::new(coverage);
    if let Ok(mut cache) = COVERAGE.write() {
        cache
            .entry(source.clone())
            .or_insert_with(|| Arc::clone(&coverage));
    }
    Ok(coverage)
}

/// A primary font that delegates uncovered characters to a fallback font.
pub struct FallbackFont {
    primary: NativeFont,
    coverage: Arc<Coverage>,
    fallback_source: FontSource,
    fallback: OnceCell<Option<NativeFont>>,
    fallback_scale: f32,
    fallback_offset: (i32, i32),
}

impl FallbackFont {
    /// Wraps `primary`. The fallback font itself is only opened the first time an
    /// uncovered character is measured or drawn.
    pub fn new(
        primary: NativeFont,
        fallback_source: FontSource,
        fallback_scale: f32,
        fallback_offset: (i32, i32),
    ) -> Result<Self, CaptionError> {
        let coverage = coverage_for(primary.source())?;
        Ok(FallbackFont {
            primary,
            coverage,
            fallback_source,
            fallback: OnceCell::new(),
            fallback_scale,
            fallback_offset,
        })
    }

    pub fn primary(&self) -> &NativeFont {
        &self.primary
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    fn fallback(&self) -> &NativeFont {
        self.fallback
            .get_or_init(|| {
                let size = self.primary.size() * self.fallback_scale;
                match NativeFont::open(&self.fallback_source, size) {
                    Ok(font) => Some(font),
                    Err(e) => {
                        warn!("Fallback font unavailable, using the primary font: {}", e);
                        None
                    }
                }
            })
            .as_ref()
            .unwrap_or(&self.primary)
    }

    /// The same composition at another size. The primary's coverage is shared when
    /// `source` is `None` or names the current primary.
    pub fn font_variant(
        &self,
        size: f32,
        source: Option<&FontSource>,
    ) -> Result<Self, CaptionError> {
        let (primary, coverage) = match source {
            Some(source) if source != self.primary.source() => {
                (NativeFont::open(source, size)?, coverage_for(source)?)
            }
            _ => (self.primary.with_size(size), Arc::clone(&self.coverage)),
        };
        Ok(FallbackFont {
            primary,
            coverage,
            fallback_source: self.fallback_source.clone(),
            fallback: OnceCell::new(),
            fallback_scale: self.fallback_scale,
            fallback_offset: self.fallback_offset,
        })
    }

    fn line_width(&self, line: &str) -> u32 {
        self.coverage
            .partition(line)
            .iter()
            .map(|segment| {
                if segment.covered {
                    self.primary.measure(&segment.text).0
                } else {
                    self.fallback().measure(&segment.text).0
                }
            })
            .sum()
    }

    fn line_advance(&self) -> i32 {
        self.primary.size() as i32 + FALLBACK_LEADING as i32
    }
}

impl Font for FallbackFont {
    fn size(&self) -> f32 {
        self.primary.size()
    }

    /// Width is the widest line; height stacks every line at `size + 4` minus the
    /// trailing gap.
    fn measure(&self, text: &str) -> (u32, u32) {
        if text.is_empty() {
            return (0, 0);
        }
        let lines: Vec<&str> = text.split('\n').collect();
        let width = lines
            .iter()
            .map(|line| self.line_width(line))
            .max()
            .unwrap_or(0);
        let size = self.primary.size() as u32;
        let count = lines.len() as u32;
        let height = (count * (FALLBACK_LEADING + size)).saturating_sub(FALLBACK_LEADING);
        (width, height)
    }

    fn draw(&self, surface: &mut RgbaImage, pos: (i32, i32), text: &str, color: Rgba<u8>) {
        let (x0, mut y) = pos;
        for line in text.split('\n') {
            let mut x = x0;
            for segment in self.coverage.partition(line) {
                let width = if segment.covered {
                    self.primary.draw(surface, (x, y), &segment.text, color);
                    self.primary.measure(&segment.text).0
                } else {
                    let fallback = self.fallback();
                    let (dx, dy) = self.fallback_offset;
                    fallback.draw(surface, (x + dx, y + dy), &segment.text, color);
                    fallback.measure(&segment.text).0
                };
                x += width as i32;
            }
            y += self.line_advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SANS: FontSource = FontSource::Bundled("DejaVuSans.ttf");
    const MONO: FontSource = FontSource::Bundled("DejaVuSansMono.ttf");

    /// A character the sans face has but the mono face lacks.
    fn char_only_in_sans() -> char {
        let sans = coverage_for(&SANS).unwrap();
        let mono = coverage_for(&MONO).unwrap();
        ('\u{100}'..='\u{FFFF}')
            .find(|&ch| ch.is_alphabetic() && sans.covers(ch) && !mono.covers(ch))
            .expect("sans covers more than mono")
    }

    #[test]
    fn test_coverage_ranges() {
        let coverage = Coverage::from_sorted(&[65, 66, 67, 70, 100]);
        assert!(coverage.covers('A'));
        assert!(coverage.covers('C'));
        assert!(!coverage.covers('D'));
        assert!(coverage.covers('F'));
        assert!(coverage.covers('d'));
        assert_eq!(coverage.len(), 5);
    }

    #[test]
    fn test_partition_alternates() {
        let coverage = Coverage::from_sorted(&[97, 98, 99]);
        let segments = coverage.partition("abXYc");
        assert_eq!(
            segments,
            vec![
                Segment {
                    text: "ab".into(),
                    covered: true
                },
                Segment {
                    text: "XY".into(),
                    covered: false
                },
                Segment {
                    text: "c".into(),
                    covered: true
                },
            ]
        );
        assert!(coverage.partition("").is_empty());
    }

    #[test]
    fn test_bundled_coverage_is_cached() {
        let first = coverage_for(&SANS).unwrap();
        let second = coverage_for(&SANS).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.covers('a'));
    }

    #[test]
    fn test_measure_matches_primary_when_covered() {
        let primary = NativeFont::open(&MONO, 20.0).unwrap();
        let font = FallbackFont::new(primary.clone(), SANS, 1.0, (0, 0)).unwrap();
        assert_eq!(font.measure("hello").0, primary.measure("hello").0);
        assert_eq!(font.measure("hello").1, 20);
        assert_eq!(font.measure(""), (0, 0));
    }

    #[test]
    fn test_uncovered_characters_use_fallback_width() {
        let missing = char_only_in_sans();
        let primary = NativeFont::open(&MONO, 20.0).unwrap();
        let fallback = NativeFont::open(&SANS, 20.0).unwrap();
        let font = FallbackFont::new(primary.clone(), SANS, 1.0, (0, 4)).unwrap();

        let text = format!("a{}", missing);
        let expected = primary.measure("a").0 + fallback.measure(&missing.to_string()).0;
        assert_eq!(font.measure(&text).0, expected);
    }

    #[test]
    fn test_multiline_height() {
        let font = FallbackFont::new(NativeFont::open(&SANS, 20.0).unwrap(), MONO, 1.0, (0, 0))
            .unwrap();
        let (one_w, one_h) = font.measure("short");
        let (two_w, two_h) = font.measure("short\na much longer line");
        assert_eq!(one_h, 20);
        assert_eq!(two_h, 2 * (20 + FALLBACK_LEADING) - FALLBACK_LEADING);
        assert!(two_w > one_w);
    }

    #[test]
    fn test_unloadable_fallback_uses_primary() {
        let primary = NativeFont::open(&SANS, 20.0).unwrap();
        let bogus = FontSource::File("/no/such/fallback.ttf".into());
        let font = FallbackFont::new(primary, bogus, 1.0, (0, 0)).unwrap();
        let (width, _) = font.measure("\u{10FFFD}");
        assert!(width > 0);
    }

    #[test]
    fn test_font_variant_shares_coverage() {
        let font = FallbackFont::new(NativeFont::open(&SANS, 20.0).unwrap(), MONO, 1.0, (0, 4))
            .unwrap();
        let bigger = font.font_variant(40.0, None).unwrap();
        assert_eq!(bigger.size(), 40.0);
        assert!(Arc::ptr_eq(&font.coverage, &bigger.coverage));
        assert!(bigger.measure("wide").0 > font.measure("wide").0);

        let switched = font.font_variant(20.0, Some(&MONO)).unwrap();
        assert_eq!(switched.primary().source(), &MONO);
    }

    #[test]
    fn test_draw_offsets_fallback_segments() {
        let missing = char_only_in_sans();
        let primary = NativeFont::open(&MONO, 24.0).unwrap();
        let plain = FallbackFont::new(primary.clone(), SANS, 1.0, (0, 0)).unwrap();
        let shifted = FallbackFont::new(primary, SANS, 1.0, (0, 10)).unwrap();

        let text = missing.to_string();
        let topmost = |font: &FallbackFont| {
            let mut surface = RgbaImage::new(120, 120);
            font.draw(&mut surface, (30, 30), &text, Rgba([0, 0, 0, 255]));
            surface
                .enumerate_pixels()
                .filter(|(_, _, p)| p[3] > 0)
                .map(|(_, y, _)| y)
                .min()
        };
        let (a, b) = (topmost(&plain), topmost(&shifted));
        assert_eq!(b.zip(a).map(|(b, a)| b - a), Some(10));
    }
}
