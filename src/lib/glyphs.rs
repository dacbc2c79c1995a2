//! Glyph classification for caption text.
//!
//! A caption line is split into typed runs: plain text, standard pictographic
//! glyphs (emoji, flags, keycaps) and platform custom glyph tokens such as
//! `<a:blobdance:878313868340920391>`. Runs are consumed by the measurer, the
//! line wrapper and the canvas, which draws glyph runs through a
//! [`GlyphSource`].
//!
//! ```rust
//! use captioncard::glyphs::{classify, Run};
//!
//! let runs = classify("hi 😀 <:wave:123456789012345678>");
//! assert_eq!(runs[0], Run::Text("hi ".to_string()));
//! assert_eq!(runs[1], Run::StandardGlyph("😀".to_string()));
//! assert!(matches!(runs[3], Run::PlatformGlyph(_)));
//! ```

#[cfg(feature = "fetch")]
use log::{debug, warn};
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use image::RgbaImage;

/// Matches custom glyph markup of the form `<[a]:name:id>`.
pub static CUSTOM_GLYPH_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(a)?:([a-zA-Z0-9_]{2,32}):([0-9]{17,25})>").expect("custom glyph pattern")
});

// Custom tokens first so their digits are never read as keycap sequences.
static GLYPH_REGEX: Lazy<Regex> = Lazy::new(|| {
    let pattern = concat!(
        r"<a?:[a-zA-Z0-9_]{2,32}:[0-9]{17,25}>",
        r"|\p{Regional_Indicator}{2}",
        r"|[#*0-9]\x{FE0F}?\x{20E3}",
        r"|\p{Extended_Pictographic}[\x{FE0E}\x{FE0F}]?\p{Emoji_Modifier}?(?:[\x{E0020}-\x{E007E}]+\x{E007F})?",
        r"(?:\x{200D}\p{Extended_Pictographic}[\x{FE0E}\x{FE0F}]?\p{Emoji_Modifier}?)*",
    );
    Regex::new(pattern).expect("glyph pattern")
});

/// Matches longer than this many characters are platform tokens; the
/// shortest well-formed custom token is 23 characters long.
const PLATFORM_TOKEN_MIN_LEN: usize = 18;

/// A classified span of a caption line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Run {
    /// Plain text drawn with the active font
    Text(String),
    /// A pictographic code point or cluster
    StandardGlyph(String),
    /// A platform custom glyph token (`<a:name:id>`)
    PlatformGlyph(String),
}

impl Run {
    /// The source substring this run was classified from.
    pub fn as_str(&self) -> &str {
        match self {
            Run::Text(s) | Run::StandardGlyph(s) | Run::PlatformGlyph(s) => s,
        }
    }

    pub fn is_glyph(&self) -> bool {
        !matches!(self, Run::Text(_))
    }
}

/// Splits a line into text and glyph runs.
///
/// Total over any input: unmatched content becomes `Run::Text`, and the
/// concatenation of all runs reproduces `line` exactly.
pub fn classify(line: &str) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut last = 0;

    for found in GLYPH_REGEX.find_iter(line) {
        if found.start() > last {
            runs.push(Run::Text(line[last..found.start()].to_string()));
        }

        let token = found.as_str();
        if token.chars().count() > PLATFORM_TOKEN_MIN_LEN {
            runs.push(Run::PlatformGlyph(token.to_string()));
        } else {
            runs.push(Run::StandardGlyph(token.to_string()));
        }
        last = found.end();
    }

    if last < line.len() {
        runs.push(Run::Text(line[last..].to_string()));
    }

    runs
}

/// Breaks text into the smallest units the wrapper may split between:
/// whole glyph tokens, or single grapheme clusters of plain text.
pub fn emoji_aware_clusters(text: &str) -> Vec<String> {
    let mut clusters = Vec::new();
    for run in classify(text) {
        match run {
            Run::Text(content) => {
                clusters.extend(content.graphemes(true).map(str::to_string));
            }
            Run::StandardGlyph(token) | Run::PlatformGlyph(token) => clusters.push(token),
        }
    }
    clusters
}

/// A parsed platform glyph token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformToken<'a> {
    pub animated: bool,
    pub name: &'a str,
    pub id: &'a str,
}

/// Parses a `<[a]:name:id>` token anchored at the start of `token`.
pub fn parse_platform_token(token: &str) -> Option<PlatformToken<'_>> {
    let captures = CUSTOM_GLYPH_REGEX.captures(token)?;
    let whole = captures.get(0)?;
    if whole.start() != 0 {
        return None;
    }
    Some(PlatformToken {
        animated: captures.get(1).is_some(),
        name: captures.get(2)?.as_str(),
        id: captures.get(3)?.as_str(),
    })
}

/// Converts a glyph into the URL of a bitmap rendition.
///
/// Custom tokens resolve to the platform CDN (`gif` when animated), everything
/// else to a Twitter-style emoji CDN.
///
/// ```rust
/// use captioncard::glyphs::url_from_emoji;
///
/// assert_eq!(
///     url_from_emoji("<a:dance:878313868340920391>"),
///     "https://cdn.discordapp.com/emojis/878313868340920391.gif?v=1"
/// );
/// assert_eq!(
///     url_from_emoji("😀"),
///     "https://emojicdn.elk.sh/%F0%9F%98%80?style=twitter"
/// );
/// ```
pub fn url_from_emoji(emoji: &str) -> String {
    match parse_platform_token(emoji) {
        Some(token) => {
            let extension = if token.animated { "gif" } else { "png" };
            format!(
                "https://cdn.discordapp.com/emojis/{}.{}?v=1",
                token.id, extension
            )
        }
        None => format!(
            "https://emojicdn.elk.sh/{}?style=twitter",
            quote_plus(emoji)
        ),
    }
}

// Unreserved characters stay literal, as in form encoding.
const FORM_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

/// Form-style percent encoding: spaces become `+`.
fn quote_plus(input: &str) -> String {
    utf8_percent_encode(input, FORM_ENCODE_SET)
        .to_string()
        .replace("%20", "+")
}

/// Supplies bitmap renditions of glyph runs.
///
/// Returning `None` makes the canvas draw the run's text with the active
/// font instead.
pub trait GlyphSource: Send + Sync {
    fn bitmap(&self, run: &Run, size: u32) -> Option<RgbaImage>;
}

/// A glyph source that never supplies bitmaps; glyph runs are drawn as text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextGlyphs;

impl GlyphSource for TextGlyphs {
    fn bitmap(&self, _run: &Run, _size: u32) -> Option<RgbaImage> {
        None
    }
}

/// Downloads glyph bitmaps from the emoji CDNs.
///
/// Results, including misses, are cached for the lifetime of the instance.
/// Requests are blocking and must be issued from a worker thread, never from
/// inside an async task.
#[cfg(feature = "fetch")]
pub struct CdnGlyphs {
    client: reqwest::blocking::Client,
    cache: std::sync::Mutex<std::collections::HashMap<String, Option<std::sync::Arc<RgbaImage>>>>,
}

#[cfg(feature = "fetch")]
impl CdnGlyphs {
    pub fn new(timeout: std::time::Duration) -> Result<Self, crate::CaptionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::CaptionError::Network {
                message: format!("Could not build glyph client: {}", e),
                url: None,
            })?;
        Ok(CdnGlyphs {
            client,
            cache: std::sync::Mutex::new(std::collections::HashMap::new()),
        })
    }

    fn download(&self, url: &str) -> Option<RgbaImage> {
        let response = match self.client.get(url).send() {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("Glyph request {} returned {}", url, response.status());
                return None;
            }
            Err(e) => {
                warn!("Glyph request {} failed: {}", url, e);
                return None;
            }
        };
        let bytes = response.bytes().ok()?;
        match image::load_from_memory(&bytes) {
            Ok(decoded) => Some(decoded.into_rgba8()),
            Err(e) => {
                warn!("Glyph bitmap from {} could not be decoded: {}", url, e);
                None
            }
        }
    }
}

#[cfg(feature = "fetch")]
impl GlyphSource for CdnGlyphs {
    fn bitmap(&self, run: &Run, size: u32) -> Option<RgbaImage> {
        if !run.is_glyph() || size == 0 {
            return None;
        }

        let url = url_from_emoji(run.as_str());
        let cached = self
            .cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(&url).cloned());

        let source = match cached {
            Some(entry) => entry,
            None => {
                let entry = self.download(&url).map(std::sync::Arc::new);
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert(url, entry.clone());
                }
                entry
            }
        }?;

        Some(image::imageops::resize(
            source.as_ref(),
            size,
            size,
            image::imageops::FilterType::Lanczos3,
        ))
    }
}
