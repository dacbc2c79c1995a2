//! The captioncard library renders meme-style caption cards: a white banner holding
//! a caption, stacked above a still or animated image.
//!
//! The caption is wrapped to the image width in pixels, glyph runs such as emoji
//! and custom emoji tokens included, and drawn centered in the banner. Animated
//! sources keep every frame and its delay.
//!
//! Basic usage renders an image to encoded bytes:
//! ```rust
//! use captioncard::config::CaptionConfig;
//! use captioncard::glyphs::TextGlyphs;
//! use image::{ImageFormat, Rgba, RgbaImage};
//! use std::io::Cursor;
//! use std::error::Error;
//!
//! fn example() -> Result<(), Box<dyn Error>> {
//!     let mut source = Vec::new();
//!     RgbaImage::from_pixel(300, 200, Rgba([30, 90, 160, 255]))
//!         .write_to(&mut Cursor::new(&mut source), ImageFormat::Png)?;
//!
//!     let rendered = captioncard::render_caption(
//!         &source,
//!         "when the build passes on the first try",
//!         &CaptionConfig::default(),
//!         &TextGlyphs,
//!     )?;
//!     assert_eq!(rendered.format.as_str(), "png");
//!     Ok(())
//! }
//! # example().unwrap();
//! ```
//!
//! Settings come from a TOML file, see [`config`]:
//! ```toml
//! [layout]
//! max_chars = 200
//!
//! [font]
//! fallback = "DejaVu Sans Mono"
//! ```
//!
//! ## Render Flow
//! ```text
//! +-------------+     +----------------+     +----------------+
//! |  Caption    |     |  Runs          |     |  Lines         |
//! |  text       | --> |  Text / Emoji  | --> |  wrapped to    |
//! |             |     |  / Token       |     |  image width   |
//! +-------------+     +----------------+     +----------------+
//!
//! +---------------+     +------------------+     +--------------+
//! | Source bytes  |     | Frames           |     | Output:      |
//! | png/jpeg/     | --> | decoded, scaled, | --> | png (still)  |
//! | gif/webp      |     | banner on top    |     | gif (frames) |
//! +---------------+     +------------------+     +--------------+
//! ```

pub mod canvas;
pub mod compositor;
pub mod config;
mod debug;
pub mod fallback;
pub mod finder;
pub mod fonts;
pub mod glyphs;
pub mod measure;
pub mod wrap;

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use image::Rgba;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use compositor::{
    decode_frames, proportionally_scale, render_banner, rescale_frames, BannerStyle,
    CaptionLayout, Frame, RenderResult, RenderedCaption,
};
use config::CaptionConfig;
use fallback::FallbackFont;
use fonts::{resolve_font, Font, FontSource, NativeFont};
use glyphs::GlyphSource;
use measure::GlyphOptions;

/// Errors that can occur while acquiring, decoding or rendering a caption.
#[derive(Debug)]
pub enum CaptionError {
    /// The request was rejected: bad URL, unsupported type, too large, zero size
    InvalidInput { message: String },
    /// The image bytes are corrupt or in an unknown format
    Decode { message: String },
    /// Fetching the image or its preview page failed
    Network {
        message: String,
        url: Option<String>,
    },
    /// Indicates a font loading error
    Font {
        font_name: String,
        message: String,
        suggestion: String,
    },
    /// Indicates an invalid configuration
    Config { message: String, suggestion: String },
    /// Composition or encoding failed
    Render { message: String },
    /// The render was abandoned before it finished
    Cancelled,
}

impl Error for CaptionError {}
impl fmt::Display for CaptionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CaptionError::InvalidInput { message } => write!(f, "❌ Invalid Input: {}", message),
            CaptionError::Decode { message } => write!(f, "❌ Image Decode Error: {}", message),
            CaptionError::Network { message, url } => {
                write!(f, "❌ Network Error: {}", message)?;
                if let Some(url) = url {
                    write!(f, "\n🔗 URL: {}", url)?;
                }
                Ok(())
            }
            CaptionError::Font {
                font_name,
                message,
                suggestion,
            } => {
                write!(f, "❌ Font Error: Failed to load font '{}'", font_name)?;
                write!(f, "\n   Reason: {}", message)?;
                write!(f, "\n💡 Suggestion: {}", suggestion)?;
                Ok(())
            }
            CaptionError::Config {
                message,
                suggestion,
            } => {
                write!(f, "❌ Configuration Error: {}", message)?;
                write!(f, "\n💡 Suggestion: {}", suggestion)?;
                Ok(())
            }
            CaptionError::Render { message } => write!(f, "❌ Render Error: {}", message),
            CaptionError::Cancelled => write!(f, "❌ Render cancelled before it finished"),
        }
    }
}

impl CaptionError {
    /// Creates a user-facing input rejection
    pub fn invalid_input(message: impl Into<String>) -> Self {
        CaptionError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        CaptionError::Decode {
            message: message.into(),
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        CaptionError::Render {
            message: message.into(),
        }
    }

    /// Whether the message is meant to be shown to the person who asked for the
    /// caption, as opposed to being reported as an internal failure.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            CaptionError::InvalidInput { .. } | CaptionError::Network { .. }
        )
    }
}

/// Cuts `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// One caption render: the decoded source, the caption and its fonts.
///
/// Dropping the session releases the decoded frames; [`Caption::render`]
/// consumes them.
pub struct Caption {
    text: String,
    frames: Vec<Frame>,
    source_size: (u32, u32),
    size: (u32, u32),
    font: Arc<dyn Font>,
    fallback: Option<Arc<dyn Font>>,
    style: BannerStyle,
    line_spacing: f32,
    parallel: bool,
}

impl Caption {
    /// Decodes `image_bytes` and prepares the fonts for `text`.
    ///
    /// The caption is cut to `config.max_chars` characters and the output size is
    /// the source size brought within `config.min_width..=config.max_width`.
    pub fn open(image_bytes: &[u8], text: &str, config: &CaptionConfig) -> Result<Self, CaptionError> {
        let text = truncate_chars(text, config.max_chars).to_string();
        let frames = decode_frames(image_bytes, config.fallback_duration_ms)?;
        let source_size = frames[0].image.dimensions();
        let size = proportionally_scale(source_size, Some(config.min_width), config.max_width);
        if size != source_size {
            debug!(
                "Rescaling {}x{} to {}x{}",
                source_size.0, source_size.1, size.0, size.1
            );
        }

        let font_size = config.font_size_for(size.0) as f32;
        let source = match &config.font_path {
            Some(name) => resolve_font(name)?,
            None => FontSource::default(),
        };
        let native = NativeFont::open(&source, font_size)?;

        let fallback: Option<Arc<dyn Font>> = match &config.fallback_font {
            Some(name) => Some(Arc::new(FallbackFont::new(
                native.clone(),
                resolve_font(name)?,
                config.fallback_scale,
                config.fallback_offset,
            )?)),
            None => None,
        };

        let (r, g, b) = config.text_color;
        let (br, bg, bb) = config.background_color;
        let style = BannerStyle {
            text: Rgba([r, g, b, 255]),
            background: Rgba([br, bg, bb, 255]),
            glyphs: GlyphOptions {
                scale: config.emoji_scale,
                offset: config.emoji_offset,
                ..GlyphOptions::default()
            },
        };

        Ok(Caption {
            text,
            frames,
            source_size,
            size,
            font: Arc::new(native),
            fallback,
            style,
            line_spacing: config.line_spacing,
            parallel: config.parallel_frames,
        })
    }

    /// The caption after truncation.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    /// Width and height of each frame after rescaling, banner excluded.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn font_size(&self) -> u32 {
        self.font.size() as u32
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// The font that measures and draws the caption.
    fn active_font(&self) -> &dyn Font {
        self.fallback.as_deref().unwrap_or(self.font.as_ref())
    }

    /// Wraps the caption to the output width.
    pub fn layout(&self) -> CaptionLayout {
        CaptionLayout::compute(
            &self.text,
            self.active_font(),
            self.size.0,
            self.line_spacing,
            &self.style.glyphs,
        )
    }

    /// Renders the banner and composes it above every frame.
    ///
    /// The source frames are released whatever the outcome; a second call fails.
    pub fn render(
        &mut self,
        glyphs: &dyn GlyphSource,
        token: &CancellationToken,
    ) -> Result<RenderResult, CaptionError> {
        let mut frames = std::mem::take(&mut self.frames);
        if frames.is_empty() {
            return Err(CaptionError::render("the caption was already rendered"));
        }
        if token.is_cancelled() {
            return Err(CaptionError::Cancelled);
        }

        let layout = self.layout();
        debug!(
            "Caption layout: {} line(s) at {}px",
            layout.line_count(),
            layout.font_size
        );
        let banner = render_banner(
            &layout,
            Arc::clone(&self.font),
            self.fallback.clone(),
            glyphs,
            &self.style,
        );
        if token.is_cancelled() {
            return Err(CaptionError::Cancelled);
        }

        rescale_frames(&mut frames, self.size);
        RenderResult::compose(&banner, frames, self.parallel, token)
    }
}

/// Renders a caption card in the calling thread.
///
/// # Example
/// ```rust
/// use captioncard::config::CaptionConfig;
/// use captioncard::glyphs::TextGlyphs;
/// use captioncard::CaptionError;
///
/// let result = captioncard::render_caption(b"not an image", "hi", &CaptionConfig::default(), &TextGlyphs);
/// assert!(matches!(result, Err(CaptionError::Decode { .. })));
/// ```
pub fn render_caption(
    image_bytes: &[u8],
    text: &str,
    config: &CaptionConfig,
    glyphs: &dyn GlyphSource,
) -> Result<RenderedCaption, CaptionError> {
    let mut caption = Caption::open(image_bytes, text, config)?;
    let result = caption.render(glyphs, &CancellationToken::new())?;
    drop(caption);
    result.encode()
}

/// Renders a caption card on the blocking thread pool.
///
/// The work stops early when `token` is cancelled, when the render exceeds
/// `config.render_timeout_secs`, or when this future is dropped.
pub async fn render(
    image_bytes: Vec<u8>,
    text: String,
    config: CaptionConfig,
    glyphs: Arc<dyn GlyphSource>,
    token: CancellationToken,
) -> Result<RenderedCaption, CaptionError> {
    let worker_token = token.child_token();
    let _cancel_on_drop = worker_token.clone().drop_guard();
    let timeout = Duration::from_secs(config.render_timeout_secs);

    let task_token = worker_token.clone();
    let handle = tokio::task::spawn_blocking(move || {
        if task_token.is_cancelled() {
            return Err(CaptionError::Cancelled);
        }
        let mut caption = Caption::open(&image_bytes, &text, &config)?;
        let result = caption.render(glyphs.as_ref(), &task_token)?;
        drop(caption);
        if task_token.is_cancelled() {
            return Err(CaptionError::Cancelled);
        }
        result.encode()
    });

    tokio::select! {
        _ = token.cancelled() => {
            info!("Caption render cancelled");
            Err(CaptionError::Cancelled)
        }
        joined = tokio::time::timeout(timeout, handle) => match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(CaptionError::render(format!("render worker failed: {}", e))),
            Err(_) => {
                warn!("Caption render timed out after {}s", timeout.as_secs());
                worker_token.cancel();
                Err(CaptionError::Cancelled)
            }
        },
    }
}
