use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use fontdb::{Database, Family, Query};
use image::{Rgba, RgbaImage};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use rust_embed::RustEmbed;
use rusttype::{point, Scale};

use crate::fallback::coverage_for;
use crate::CaptionError;

/// Fonts shipped inside the binary (statically included from the `fonts/` directory).
#[derive(RustEmbed)]
#[folder = "fonts/"]
struct BundledFonts;

/// File name of the default caption font.
pub const DEFAULT_FONT: &str = "DejaVuSans.ttf";

/// Returns the canonical bundled file for a family name, if one is shipped.
///
/// This allows users to pass "DejaVu Sans Mono" or "dejavu-sans" and get the
/// embedded copy without a system lookup.
fn bundled_file_for(name: &str) -> Option<&'static str> {
    let key = name.to_ascii_lowercase();
    if key.ends_with(".ttf") {
        return match key.as_str() {
            "dejavusans.ttf" => Some("DejaVuSans.ttf"),
            "dejavusansmono.ttf" => Some("DejaVuSansMono.ttf"),
            _ => None,
        };
    }
    if key.contains("dejavu") && key.contains("mono") {
        return Some("DejaVuSansMono.ttf");
    }
    if key.contains("dejavu") && key.contains("sans") {
        return Some("DejaVuSans.ttf");
    }
    None
}

/// Lists the bundled font files (useful for tests and the CLI).
pub fn known_bundled_fonts() -> Vec<String> {
    BundledFonts::iter().map(|name| name.to_string()).collect()
}

/// Where a font's bytes come from. Also the key of the process-wide font caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FontSource {
    /// A font shipped in the `fonts/` directory
    Bundled(&'static str),
    /// A font file on disk
    File(PathBuf),
}

impl Default for FontSource {
    fn default() -> Self {
        FontSource::Bundled(DEFAULT_FONT)
    }
}

impl fmt::Display for FontSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FontSource::Bundled(name) => write!(f, "{} (bundled)", name),
            FontSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Font file contents plus the parsed face, cached per source for the process lifetime.
#[derive(Clone)]
pub(crate) struct LoadedFont {
    pub(crate) data: Arc<Vec<u8>>,
    pub(crate) face: rusttype::Font<'static>,
}

static LOADED_FONTS: Lazy<RwLock<HashMap<FontSource, LoadedFont>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn font_error(source: &FontSource, message: impl Into<String>) -> CaptionError {
    CaptionError::Font {
        font_name: source.to_string(),
        message: message.into(),
        suggestion: "Use a TrueType/OpenType font file (.ttf/.otf), or omit the font to use the bundled DejaVu Sans"
            .to_string(),
    }
}

fn read_source(source: &FontSource) -> Result<Vec<u8>, CaptionError> {
    match source {
        FontSource::Bundled(name) => BundledFonts::get(name)
            .map(|file| file.data.into_owned())
            .ok_or_else(|| font_error(source, "no such bundled font")),
        FontSource::File(path) => {
            fs::read(path).map_err(|e| font_error(source, format!("could not read file: {}", e)))
        }
    }
}

/// Loads (or returns the cached) font for `source`.
pub(crate) fn load_font(source: &FontSource) -> Result<LoadedFont, CaptionError> {
    if let Ok(cache) = LOADED_FONTS.read() {
        if let Some(loaded) = cache.get(source) {
            return Ok(loaded.clone());
        }
    }

    let bytes = read_source(source)?;
    let face = rusttype::Font::try_from_vec(bytes.clone())
        .ok_or_else(|| font_error(source, "not a parsable TrueType/OpenType font"))?;
    let loaded = LoadedFont {
        data: Arc::new(bytes),
        face,
    };
    debug!("Loaded font {} ({} bytes)", source, loaded.data.len());

    if let Ok(mut cache) = LOADED_FONTS.write() {
        cache
            .entry(source.clone())
            .or_insert_with(|| loaded.clone());
    }
    Ok(loaded)
}

// Family name lookups, misses included, so the system fonts are scanned once per name.
static SYSTEM_FONT_PATHS: Lazy<RwLock<HashMap<String, Option<PathBuf>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Looks a family name up among the system fonts, caching the answer.
fn find_system_font(name: &str) -> Option<PathBuf> {
    if let Ok(cache) = SYSTEM_FONT_PATHS.read() {
        if let Some(found) = cache.get(name) {
            return found.clone();
        }
    }

    let found = scan_system_fonts(name);
    if let Ok(mut cache) = SYSTEM_FONT_PATHS.write() {
        cache.insert(name.to_string(), found.clone());
    }
    found
}

/// Collections (.ttc) are skipped because the face index is not tracked.
fn scan_system_fonts(name: &str) -> Option<PathBuf> {
    let mut db = Database::new();
    db.load_system_fonts();

    let families = [Family::Name(name)];
    let query = Query {
        families: &families,
        ..Query::default()
    };

    let candidate = db.query(&query).and_then(|id| db.face(id)).and_then(|face| match &face.source {
        fontdb::Source::File(path) => Some(path.clone()),
        _ => None,
    });

    let by_query = candidate.filter(|path| {
        !path
            .extension()
            .and_then(|s| s.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("ttc"))
    });
    if by_query.is_some() {
        return by_query;
    }

    // Fall back to a file name match, as fontconfig family names differ per platform
    let wanted = name.to_lowercase().replace(' ', "");
    let by_file_name = db.faces().find_map(|face| match &face.source {
        fontdb::Source::File(path) => {
            let file_name = path
                .file_stem()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_lowercase();
            let is_collection = path
                .extension()
                .and_then(|s| s.to_str())
                .map_or(false, |ext| ext.eq_ignore_ascii_case("ttc"));
            (!is_collection && file_name.contains(&wanted)).then(|| path.clone())
        }
        _ => None,
    });
    by_file_name
}

/// Resolves a font given as a path, a bundled family name or a system family name.
pub fn resolve_font(name_or_path: &str) -> Result<FontSource, CaptionError> {
    let path = Path::new(name_or_path);
    if path.is_file() {
        return Ok(FontSource::File(path.to_path_buf()));
    }

    if let Some(bundled) = bundled_file_for(name_or_path) {
        return Ok(FontSource::Bundled(bundled));
    }

    match find_system_font(name_or_path) {
        Some(found) => {
            info!("Resolved font '{}' to {}", name_or_path, found.display());
            Ok(FontSource::File(found))
        }
        None => Err(CaptionError::Font {
            font_name: name_or_path.to_string(),
            message: "not a file, bundled font or installed system font".to_string(),
            suggestion: "Check the spelling, or pass the path to a .ttf/.otf file".to_string(),
        }),
    }
}

/// The text-drawing capability shared by [`NativeFont`] and
/// [`FallbackFont`](crate::fallback::FallbackFont).
pub trait Font: Send + Sync {
    /// Nominal size in pixels per em.
    fn size(&self) -> f32;

    /// Pixel width and height of a single line of text.
    fn measure(&self, text: &str) -> (u32, u32);

    /// Draws text with its top-left corner (top of the ascender) at `pos`.
    fn draw(&self, surface: &mut RgbaImage, pos: (i32, i32), text: &str, color: Rgba<u8>);
}

/// A single font file rendered at one size.
#[derive(Clone)]
pub struct NativeFont {
    source: FontSource,
    size: f32,
    face: rusttype::Font<'static>,
    scale: Scale,
    ascent: f32,
    descent: f32,
}

impl fmt::Debug for NativeFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFont")
            .field("source", &self.source)
            .field("size", &self.size)
            .finish()
    }
}

impl NativeFont {
    /// Opens `source` at `size` pixels per em.
    pub fn open(source: &FontSource, size: f32) -> Result<Self, CaptionError> {
        let loaded = load_font(source)?;
        Ok(Self::from_face(source.clone(), loaded.face, size))
    }

    /// The bundled DejaVu Sans at `size` pixels per em.
    pub fn bundled(size: f32) -> Result<Self, CaptionError> {
        Self::open(&FontSource::default(), size)
    }

    fn from_face(source: FontSource, face: rusttype::Font<'static>, size: f32) -> Self {
        let size = size.max(1.0);
        // rusttype scales to ascent-descent height; convert from em size.
        let unscaled = face.v_metrics_unscaled();
        let units_per_em = f32::from(face.units_per_em().max(1));
        let extent = (unscaled.ascent - unscaled.descent).max(1.0);
        let scale = Scale::uniform(size * extent / units_per_em);
        let metrics = face.v_metrics(scale);

        NativeFont {
            source,
            size,
            face,
            scale,
            ascent: metrics.ascent,
            descent: metrics.descent,
        }
    }

    /// A copy of this font at another size, sharing the parsed face.
    pub fn with_size(&self, size: f32) -> Self {
        Self::from_face(self.source.clone(), self.face.clone(), size)
    }

    pub fn source(&self) -> &FontSource {
        &self.source
    }

    /// Whether the face has a real glyph for `ch`.
    pub fn has_glyph(&self, ch: char) -> bool {
        self.face.glyph(ch).id().0 != 0
    }

    fn advance_width(&self, text: &str) -> f32 {
        self.face
            .layout(text, self.scale, point(0.0, 0.0))
            .last()
            .map(|glyph| glyph.position().x + glyph.unpositioned().h_metrics().advance_width)
            .unwrap_or(0.0)
    }
}

impl Font for NativeFont {
    fn size(&self) -> f32 {
        self.size
    }

    fn measure(&self, text: &str) -> (u32, u32) {
        if text.is_empty() {
            return (0, 0);
        }
        let width = self.advance_width(text).ceil().max(0.0) as u32;
        let height = (self.ascent - self.descent).ceil().max(0.0) as u32;
        (width, height)
    }

    fn draw(&self, surface: &mut RgbaImage, pos: (i32, i32), text: &str, color: Rgba<u8>) {
        let origin = point(pos.0 as f32, pos.1 as f32 + self.ascent);
        for glyph in self.face.layout(text, self.scale, origin) {
            let Some(bounds) = glyph.pixel_bounding_box() else {
                continue;
            };
            glyph.draw(|x, y, coverage| {
                blend_coverage(
                    surface,
                    bounds.min.x + x as i32,
                    bounds.min.y + y as i32,
                    color,
                    coverage,
                );
            });
        }
    }
}

/// Source-over blend of `color` at the given glyph coverage.
fn blend_coverage(surface: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>, coverage: f32) {
    if x < 0 || y < 0 || x as u32 >= surface.width() || y as u32 >= surface.height() {
        return;
    }
    let alpha = coverage.clamp(0.0, 1.0) * f32::from(color[3]) / 255.0;
    if alpha <= 0.0 {
        return;
    }

    let pixel = surface.get_pixel_mut(x as u32, y as u32);
    let dst_alpha = f32::from(pixel[3]) / 255.0;
    let out_alpha = alpha + dst_alpha * (1.0 - alpha);
    for channel in 0..3 {
        let src = f32::from(color[channel]);
        let dst = f32::from(pixel[channel]);
        let blended = (src * alpha + dst * dst_alpha * (1.0 - alpha)) / out_alpha;
        pixel[channel] = blended.round().clamp(0.0, 255.0) as u8;
    }
    pixel[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// A caption character the primary font cannot draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingGlyph {
    pub ch: char,
    /// Whether the fallback font (if any) covers it
    pub covered_by_fallback: bool,
}

/// Lists the distinct characters of `text` missing from `primary`, in order of
/// first appearance. Whitespace and control characters are ignored.
pub fn report_missing_glyphs(
    text: &str,
    primary: &FontSource,
    fallback: Option<&FontSource>,
) -> Result<Vec<MissingGlyph>, CaptionError> {
    let primary_coverage = coverage_for(primary)?;
    let fallback_coverage = match fallback {
        Some(source) => Some(coverage_for(source)?),
        None => None,
    };

    let mut seen = Vec::new();
    let mut missing = Vec::new();
    for ch in text.chars() {
        if ch.is_whitespace() || ch.is_control() || seen.contains(&ch) {
            continue;
        }
        seen.push(ch);
        if primary_coverage.covers(ch) {
            continue;
        }
        let covered_by_fallback = fallback_coverage
            .as_ref()
            .map_or(false, |coverage| coverage.covers(ch));
        missing.push(MissingGlyph {
            ch,
            covered_by_fallback,
        });
    }

    if !missing.is_empty() {
        warn!(
            "{} character(s) missing from {}",
            missing.len(),
            primary
        );
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_font_names() {
        assert_eq!(bundled_file_for("DejaVu Sans"), Some("DejaVuSans.ttf"));
        assert_eq!(bundled_file_for("dejavu-sans"), Some("DejaVuSans.ttf"));
        assert_eq!(
            bundled_file_for("DejaVu Sans Mono"),
            Some("DejaVuSansMono.ttf")
        );
        assert_eq!(bundled_file_for("DejaVuSansMono.ttf"), Some("DejaVuSansMono.ttf"));
        assert_eq!(bundled_file_for("Comic Sans"), None);

        let known = known_bundled_fonts();
        assert!(known.iter().any(|f| f == DEFAULT_FONT));
    }

    #[test]
    fn test_bundled_font_loads_and_is_cached() {
        let first = load_font(&FontSource::default()).unwrap();
        let second = load_font(&FontSource::default()).unwrap();
        assert!(!first.data.is_empty());
        assert_eq!(first.data.len(), second.data.len());
    }

    #[test]
    fn test_missing_file_is_font_error() {
        let source = FontSource::File(PathBuf::from("/definitely/not/here.ttf"));
        let err = NativeFont::open(&source, 20.0).unwrap_err();
        assert!(matches!(err, CaptionError::Font { .. }));
    }

    #[test]
    fn test_resolve_font_prefers_paths_then_bundled() {
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("fonts/DejaVuSans.ttf");
        let resolved = resolve_font(manifest.to_str().unwrap()).unwrap();
        assert_eq!(resolved, FontSource::File(manifest));

        let resolved = resolve_font("DejaVu Sans Mono").unwrap();
        assert_eq!(resolved, FontSource::Bundled("DejaVuSansMono.ttf"));
    }

    #[test]
    fn test_system_font_lookup_is_cached() {
        let name = "No Such Caption Family 0xC0FFEE";
        assert!(resolve_font(name).is_err());
        let cached = SYSTEM_FONT_PATHS
            .read()
            .unwrap()
            .get(name)
            .cloned();
        assert_eq!(cached, Some(None));
        assert!(matches!(resolve_font(name), Err(CaptionError::Font { .. })));
    }

    #[test]
    fn test_measure_grows_with_text_and_size() {
        let font = NativeFont::bundled(30.0).unwrap();
        let (short, height) = font.measure("Hi");
        let (long, _) = font.measure("Hi there");
        assert!(short > 0);
        assert!(long > short);
        assert!(height >= 30);

        let bigger = font.with_size(60.0);
        assert!(bigger.measure("Hi there").0 > long);
        assert_eq!(font.measure(""), (0, 0));
    }

    #[test]
    fn test_has_glyph() {
        let font = NativeFont::bundled(20.0).unwrap();
        assert!(font.has_glyph('A'));
        assert!(!font.has_glyph('\u{10FFFD}'));
    }

    #[test]
    fn test_draw_marks_pixels_inside_measured_box() {
        let font = NativeFont::bundled(32.0).unwrap();
        let (width, height) = font.measure("Hey");
        let mut surface = RgbaImage::from_pixel(width + 20, height + 20, Rgba([255, 255, 255, 255]));
        font.draw(&mut surface, (10, 10), "Hey", Rgba([0, 0, 0, 255]));

        let dark: Vec<(u32, u32)> = surface
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] < 128)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!dark.is_empty());
        assert!(dark.iter().all(|&(x, y)| x >= 10 && y >= 10));
        assert!(dark.iter().all(|&(x, _)| x <= 10 + width));
    }

    #[test]
    fn test_draw_clips_outside_surface() {
        let font = NativeFont::bundled(32.0).unwrap();
        let mut surface = RgbaImage::new(4, 4);
        font.draw(&mut surface, (-50, -50), "Clipped", Rgba([0, 0, 0, 255]));
        font.draw(&mut surface, (100, 100), "Clipped", Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_report_missing_glyphs() {
        let missing =
            report_missing_glyphs("ab \u{10FFFD}\u{10FFFD}", &FontSource::default(), None).unwrap();
        assert_eq!(
            missing,
            vec![MissingGlyph {
                ch: '\u{10FFFD}',
                covered_by_fallback: false
            }]
        );
    }
}
