//! Configuration of caption layout, fonts and limits.
//!
//! Settings are read from a TOML file. Every key is optional: missing or
//! ill-typed keys keep their default value, so a file only needs to name what it
//! changes.
//!
//! # Configuration Structure
//!
//! - `[layout]` caption length, width bounds, line spacing and font sizing
//! - `[font]` caption font and the fallback font for characters it lacks
//! - `[emoji]` size, placement and remote fetching of glyph bitmaps
//! - `[colors]` text and banner colors
//! - `[animation]` frame timing and parallel composition
//! - `[limits]` source image limits and timeouts
//!
//! # Configuration Example
//!
//! ```toml
//! [layout]
//! max_chars = 200
//! line_spacing = 4.0
//!
//! [font]
//! path = "/usr/share/fonts/truetype/futura.ttf"
//! fallback = "DejaVu Sans"
//! fallback_offset = { x = 0, y = 2 }
//!
//! [colors]
//! text = { r = 20, g = 20, b = 20 }
//! ```
//!
//! `captioncard --get-default-configuration` prints a file with every key.

use std::fs;
use std::path::Path;

use log::{debug, warn};
use toml::Value;

use crate::CaptionError;

/// Configuration source for caption settings.
#[derive(Debug, Clone)]
pub enum ConfigSource<'a> {
    /// Use the built-in defaults
    Default,
    /// Load configuration from a file path
    File(&'a str),
    /// Use an embedded TOML configuration string
    Embedded(&'a str),
}

/// All tunable settings of a caption render.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionConfig {
    /// Captions are cut to this many characters before layout
    pub max_chars: usize,
    pub min_width: u32,
    pub max_width: u32,
    /// Extra pixels between caption lines
    pub line_spacing: f32,
    /// Images narrower than this use `font_divisor_narrow`
    pub narrow_threshold: u32,
    pub font_divisor_narrow: u32,
    pub font_divisor_wide: u32,

    /// Caption font as a path or family name; the bundled DejaVu Sans when unset
    pub font_path: Option<String>,
    /// Font for characters the caption font lacks
    pub fallback_font: Option<String>,
    pub fallback_scale: f32,
    pub fallback_offset: (i32, i32),

    pub emoji_scale: f32,
    pub emoji_offset: (i32, i32),
    /// Download glyph bitmaps from the emoji CDNs
    pub remote_glyphs: bool,

    pub text_color: (u8, u8, u8),
    pub background_color: (u8, u8, u8),

    /// Delay used for frames that carry none
    pub fallback_duration_ms: u32,
    pub parallel_frames: bool,

    pub max_image_width: u32,
    pub max_image_height: u32,
    pub max_image_bytes: u64,
    pub fetch_timeout_secs: u64,
    pub render_timeout_secs: u64,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        CaptionConfig {
            max_chars: 360,
            min_width: 200,
            max_width: 600,
            line_spacing: 2.5,
            narrow_threshold: 400,
            font_divisor_narrow: 9,
            font_divisor_wide: 12,
            font_path: None,
            fallback_font: None,
            fallback_scale: 1.0,
            fallback_offset: (0, 0),
            emoji_scale: 1.0,
            emoji_offset: (0, 4),
            remote_glyphs: true,
            text_color: (0, 0, 0),
            background_color: (255, 255, 255),
            fallback_duration_ms: 64,
            parallel_frames: true,
            max_image_width: 2048,
            max_image_height: 2048,
            max_image_bytes: 6 * 1024 * 1024,
            fetch_timeout_secs: 15,
            render_timeout_secs: 60,
        }
    }
}

impl CaptionConfig {
    /// Caption font size in pixels for an image `width` pixels wide.
    pub fn font_size_for(&self, width: u32) -> u32 {
        let divisor = if width < self.narrow_threshold {
            self.font_divisor_narrow
        } else {
            self.font_divisor_wide
        };
        (width / divisor.max(1)).max(1)
    }
}

/// Parses an RGB color such as `{ r = 0, g = 0, b = 0 }`.
fn parse_color(value: Option<&Value>, field: &str) -> Option<(u8, u8, u8)> {
    value.and_then(|c| {
        let color = c.get(field)?;
        let r = color.get("r")?.as_integer()? as u8;
        let g = color.get("g")?.as_integer()? as u8;
        let b = color.get("b")?.as_integer()? as u8;
        Some((r, g, b))
    })
}

/// Parses a pixel offset such as `{ x = 0, y = 4 }`.
fn parse_offset(value: Option<&Value>, field: &str) -> Option<(i32, i32)> {
    value.and_then(|o| {
        let offset = o.get(field)?;
        let x = offset.get("x")?.as_integer()? as i32;
        let y = offset.get("y")?.as_integer()? as i32;
        Some((x, y))
    })
}

/// Reads a number that may be written as an integer or a float.
fn parse_float(value: Option<&Value>, field: &str) -> Option<f32> {
    let v = value?.get(field)?;
    v.as_float()
        .or_else(|| v.as_integer().map(|i| i as f64))
        .map(|f| f as f32)
}

fn parse_unsigned(value: Option<&Value>, field: &str) -> Option<u64> {
    value?
        .get(field)?
        .as_integer()
        .and_then(|i| u64::try_from(i).ok())
}

fn parse_u32(value: Option<&Value>, field: &str) -> Option<u32> {
    parse_unsigned(value, field).and_then(|i| u32::try_from(i).ok())
}

fn parse_string(value: Option<&Value>, field: &str) -> Option<String> {
    value?
        .get(field)?
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn parse_bool(value: Option<&Value>, field: &str) -> Option<bool> {
    value?.get(field)?.as_bool()
}

/// Parses a TOML configuration string into a complete [`CaptionConfig`].
///
/// Invalid TOML yields the defaults.
///
/// # Example
/// ```rust
/// use captioncard::config::parse_config_string;
///
/// let config = parse_config_string(r#"
/// [layout]
/// max_chars = 100
///
/// [emoji]
/// offset = { x = 1, y = 2 }
/// "#);
/// assert_eq!(config.max_chars, 100);
/// assert_eq!(config.emoji_offset, (1, 2));
/// assert_eq!(config.max_width, 600);
/// ```
pub fn parse_config_string(config_str: &str) -> CaptionConfig {
    let config: Value = match toml::from_str(config_str) {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring invalid configuration: {}", e);
            return CaptionConfig::default();
        }
    };

    let defaults = CaptionConfig::default();
    let layout = config.get("layout");
    let font = config.get("font");
    let emoji = config.get("emoji");
    let colors = config.get("colors");
    let animation = config.get("animation");
    let limits = config.get("limits");

    CaptionConfig {
        max_chars: parse_unsigned(layout, "max_chars")
            .map(|n| n as usize)
            .unwrap_or(defaults.max_chars),
        min_width: parse_u32(layout, "min_width").unwrap_or(defaults.min_width),
        max_width: parse_u32(layout, "max_width")
            .filter(|&w| w > 0)
            .unwrap_or(defaults.max_width),
        line_spacing: parse_float(layout, "line_spacing").unwrap_or(defaults.line_spacing),
        narrow_threshold: parse_u32(layout, "narrow_threshold")
            .unwrap_or(defaults.narrow_threshold),
        font_divisor_narrow: parse_u32(layout, "font_divisor_narrow")
            .filter(|&d| d > 0)
            .unwrap_or(defaults.font_divisor_narrow),
        font_divisor_wide: parse_u32(layout, "font_divisor_wide")
            .filter(|&d| d > 0)
            .unwrap_or(defaults.font_divisor_wide),

        font_path: parse_string(font, "path").or(defaults.font_path),
        fallback_font: parse_string(font, "fallback").or(defaults.fallback_font),
        fallback_scale: parse_float(font, "fallback_scale").unwrap_or(defaults.fallback_scale),
        fallback_offset: parse_offset(font, "fallback_offset")
            .unwrap_or(defaults.fallback_offset),

        emoji_scale: parse_float(emoji, "scale").unwrap_or(defaults.emoji_scale),
        emoji_offset: parse_offset(emoji, "offset").unwrap_or(defaults.emoji_offset),
        remote_glyphs: parse_bool(emoji, "remote").unwrap_or(defaults.remote_glyphs),

        text_color: parse_color(colors, "text").unwrap_or(defaults.text_color),
        background_color: parse_color(colors, "background")
            .unwrap_or(defaults.background_color),

        fallback_duration_ms: parse_u32(animation, "fallback_duration_ms")
            .unwrap_or(defaults.fallback_duration_ms),
        parallel_frames: parse_bool(animation, "parallel_frames")
            .unwrap_or(defaults.parallel_frames),

        max_image_width: parse_u32(limits, "max_image_width").unwrap_or(defaults.max_image_width),
        max_image_height: parse_u32(limits, "max_image_height")
            .unwrap_or(defaults.max_image_height),
        max_image_bytes: parse_unsigned(limits, "max_image_bytes")
            .unwrap_or(defaults.max_image_bytes),
        fetch_timeout_secs: parse_unsigned(limits, "fetch_timeout_secs")
            .unwrap_or(defaults.fetch_timeout_secs),
        render_timeout_secs: parse_unsigned(limits, "render_timeout_secs")
            .unwrap_or(defaults.render_timeout_secs),
    }
}

/// Loads the configuration from `source`, falling back to the defaults when a
/// file cannot be read.
pub fn load_config_from_source(source: ConfigSource) -> CaptionConfig {
    match source {
        ConfigSource::Default => CaptionConfig::default(),
        ConfigSource::File(path) => match fs::read_to_string(Path::new(path)) {
            Ok(content) => {
                debug!("Loaded configuration from {}", path);
                parse_config_string(&content)
            }
            Err(e) => {
                warn!("Could not read configuration {}: {}", path, e);
                CaptionConfig::default()
            }
        },
        ConfigSource::Embedded(content) => parse_config_string(content),
    }
}

/// Loads a configuration file the user asked for explicitly.
///
/// Unlike [`load_config_from_source`] an unreadable or malformed file is an error.
pub fn load_config_file(path: &str) -> Result<CaptionConfig, CaptionError> {
    let content = fs::read_to_string(path).map_err(|e| CaptionError::Config {
        message: format!("Could not read configuration file '{}': {}", path, e),
        suggestion: "Check the path passed with --config".to_string(),
    })?;
    content
        .parse::<toml::Table>()
        .map_err(|e| CaptionError::Config {
            message: format!("Invalid TOML in '{}': {}", path, e),
            suggestion: "Run with --get-default-configuration for a valid example".to_string(),
        })?;
    Ok(parse_config_string(&content))
}

/// Returns a configuration file listing every key with its default value.
pub fn default_config_toml() -> String {
    let d = CaptionConfig::default();
    format!(
        r#"# captioncard configuration

[layout]
max_chars = {max_chars}
min_width = {min_width}
max_width = {max_width}
line_spacing = {line_spacing:?}
narrow_threshold = {narrow_threshold}
font_divisor_narrow = {font_divisor_narrow}
font_divisor_wide = {font_divisor_wide}

[font]
# path = "/path/to/font.ttf"
# fallback = "DejaVu Sans Mono"
fallback_scale = {fallback_scale:?}
fallback_offset = {{ x = {fallback_x}, y = {fallback_y} }}

[emoji]
scale = {emoji_scale:?}
offset = {{ x = {emoji_x}, y = {emoji_y} }}
remote = {remote}

[colors]
text = {{ r = {tr}, g = {tg}, b = {tb} }}
background = {{ r = {br}, g = {bg}, b = {bb} }}

[animation]
fallback_duration_ms = {fallback_duration_ms}
parallel_frames = {parallel_frames}

[limits]
max_image_width = {max_image_width}
max_image_height = {max_image_height}
max_image_bytes = {max_image_bytes}
fetch_timeout_secs = {fetch_timeout_secs}
render_timeout_secs = {render_timeout_secs}
"#,
        max_chars = d.max_chars,
        min_width = d.min_width,
        max_width = d.max_width,
        line_spacing = d.line_spacing,
        narrow_threshold = d.narrow_threshold,
        font_divisor_narrow = d.font_divisor_narrow,
        font_divisor_wide = d.font_divisor_wide,
        fallback_scale = d.fallback_scale,
        fallback_x = d.fallback_offset.0,
        fallback_y = d.fallback_offset.1,
        emoji_scale = d.emoji_scale,
        emoji_x = d.emoji_offset.0,
        emoji_y = d.emoji_offset.1,
        remote = d.remote_glyphs,
        tr = d.text_color.0,
        tg = d.text_color.1,
        tb = d.text_color.2,
        br = d.background_color.0,
        bg = d.background_color.1,
        bb = d.background_color.2,
        fallback_duration_ms = d.fallback_duration_ms,
        parallel_frames = d.parallel_frames,
        max_image_width = d.max_image_width,
        max_image_height = d.max_image_height,
        max_image_bytes = d.max_image_bytes,
        fetch_timeout_secs = d.fetch_timeout_secs,
        render_timeout_secs = d.render_timeout_secs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_color() {
        let color_toml: Value = toml::from_str(
            r#"
            color = { r = 255, g = 128, b = 64 }
        "#,
        )
        .unwrap();
        assert_eq!(
            parse_color(Some(&color_toml), "color"),
            Some((255, 128, 64))
        );

        assert_eq!(parse_color(None, "color"), None);

        let invalid_color: Value = toml::from_str(
            r#"
            color = { r = 255, g = 128 }
        "#,
        )
        .unwrap();
        assert_eq!(parse_color(Some(&invalid_color), "color"), None);
    }

    #[test]
    fn test_parse_offset_and_numbers() {
        let value: Value = toml::from_str(
            r#"
            offset = { x = -3, y = 4 }
            whole = 3
            fraction = 2.5
            negative = -1
            "#,
        )
        .unwrap();
        assert_eq!(parse_offset(Some(&value), "offset"), Some((-3, 4)));
        assert_eq!(parse_float(Some(&value), "whole"), Some(3.0));
        assert_eq!(parse_float(Some(&value), "fraction"), Some(2.5));
        assert_eq!(parse_unsigned(Some(&value), "negative"), None);
        assert_eq!(parse_u32(Some(&value), "whole"), Some(3));
    }

    #[test]
    fn test_font_size_rule() {
        let config = CaptionConfig::default();
        assert_eq!(config.font_size_for(300), 33);
        assert_eq!(config.font_size_for(400), 33);
        assert_eq!(config.font_size_for(600), 50);
        assert_eq!(config.font_size_for(399), 44);
        assert_eq!(config.font_size_for(1), 1);
    }

    #[test]
    fn test_parse_config_string() {
        let config = parse_config_string(
            r#"
            [layout]
            max_chars = 100
            min_width = 150
            max_width = 800
            line_spacing = 3

            [font]
            fallback = "DejaVu Sans Mono"
            fallback_scale = 0.9

            [emoji]
            remote = false

            [colors]
            background = { r = 250, g = 250, b = 250 }

            [animation]
            fallback_duration_ms = 100
            parallel_frames = false

            [limits]
            max_image_bytes = 1024
            "#,
        );

        assert_eq!(config.max_chars, 100);
        assert_eq!(config.min_width, 150);
        assert_eq!(config.max_width, 800);
        assert_eq!(config.line_spacing, 3.0);
        assert_eq!(config.fallback_font.as_deref(), Some("DejaVu Sans Mono"));
        assert_eq!(config.fallback_scale, 0.9);
        assert!(!config.remote_glyphs);
        assert_eq!(config.background_color, (250, 250, 250));
        assert_eq!(config.text_color, (0, 0, 0));
        assert_eq!(config.fallback_duration_ms, 100);
        assert!(!config.parallel_frames);
        assert_eq!(config.max_image_bytes, 1024);
        assert_eq!(config.max_image_width, 2048);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = parse_config_string(
            r#"
            [layout]
            max_chars = "many"
            max_width = 0
            font_divisor_wide = 0

            [font]
            path = ""
            "#,
        );
        let defaults = CaptionConfig::default();
        assert_eq!(config.max_chars, defaults.max_chars);
        assert_eq!(config.max_width, defaults.max_width);
        assert_eq!(config.font_divisor_wide, defaults.font_divisor_wide);
        assert_eq!(config.font_path, None);
    }

    #[test]
    fn test_parse_config_string_invalid_toml() {
        let config = parse_config_string("this is not valid toml {{{");
        assert_eq!(config, CaptionConfig::default());
    }

    #[test]
    fn test_load_config() {
        assert_eq!(
            load_config_from_source(ConfigSource::Default),
            CaptionConfig::default()
        );
        assert_eq!(
            load_config_from_source(ConfigSource::File("nonexistent.toml")),
            CaptionConfig::default()
        );

        const EMBEDDED: &str = r#"
            [emoji]
            scale = 0.8
        "#;
        let config = load_config_from_source(ConfigSource::Embedded(EMBEDDED));
        assert_eq!(config.emoji_scale, 0.8);
    }

    #[test]
    fn test_load_config_file_reports_errors() {
        let err = load_config_file("definitely-missing.toml").unwrap_err();
        assert!(matches!(err, CaptionError::Config { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[layout").unwrap();
        let err = load_config_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, CaptionError::Config { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[layout]\nmax_chars = 12").unwrap();
        let config = load_config_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.max_chars, 12);
    }

    #[test]
    fn test_default_config_round_trips() {
        let text = default_config_toml();
        assert_eq!(parse_config_string(&text), CaptionConfig::default());
    }
}
