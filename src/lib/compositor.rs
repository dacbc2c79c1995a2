//! Frame decoding, caption banner rendering and frame composition.
//!
//! The compositor turns decoded source frames and a [`CaptionLayout`] into a
//! [`RenderResult`]: a white banner holding the wrapped caption, pasted above
//! every frame. Animated sources keep their per-frame delays.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, Delay, ImageFormat, Rgba, RgbaImage};
use log::{debug, info};
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::canvas::Canvas;
use crate::fonts::Font;
use crate::glyphs::GlyphSource;
use crate::measure::{line_width, GlyphOptions};
use crate::wrap::wrap_text;
use crate::CaptionError;

/// Scales `(width, height)` into bounds while keeping the aspect ratio.
///
/// A side below `min` is raised to `min` first, then a side above `max` is
/// brought down to `max`. Results are truncated to whole pixels.
///
/// ```
/// use captioncard::compositor::proportionally_scale;
///
/// assert_eq!(proportionally_scale((800, 400), Some(200), 600), (600, 300));
/// assert_eq!(proportionally_scale((100, 50), Some(200), 600), (200, 100));
/// ```
pub fn proportionally_scale(old: (u32, u32), min: Option<u32>, max: u32) -> (u32, u32) {
    let (mut width, mut height) = (f64::from(old.0), f64::from(old.1));
    if width == 0.0 || height == 0.0 {
        return old;
    }

    if let Some(min) = min.map(f64::from) {
        if width < min {
            height = (height / (width / min)).trunc();
            width = min;
        } else if height < min {
            width = (width / (height / min)).trunc();
            height = min;
        }
    }

    let max = f64::from(max);
    if width > max {
        height = (height / (width / max)).trunc();
        width = max;
    } else if height > max {
        width = (width / (height / max)).trunc();
        height = max;
    }

    ((width as u32).max(1), (height as u32).max(1))
}

/// One decoded source frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    pub duration_ms: u32,
    /// Position in the animation; always 0 for stills
    pub index: usize,
}

/// Decodes still or animated image bytes into frames.
///
/// GIF, animated PNG and animated WebP keep their frames. A frame without a
/// delay takes the first non-zero delay of the source, or `fallback_ms`.
pub fn decode_frames(bytes: &[u8], fallback_ms: u32) -> Result<Vec<Frame>, CaptionError> {
    if bytes.is_empty() {
        return Err(CaptionError::invalid_input("The image is empty."));
    }
    let format = image::guess_format(bytes)
        .map_err(|e| CaptionError::decode(format!("Unrecognized image format: {}", e)))?;

    let animated = match format {
        ImageFormat::Gif => Some(
            GifDecoder::new(Cursor::new(bytes))
                .and_then(|decoder| decoder.into_frames().collect_frames())
                .map_err(decode_error)?,
        ),
        ImageFormat::Png => {
            let decoder = PngDecoder::new(Cursor::new(bytes)).map_err(decode_error)?;
            if decoder.is_apng().map_err(decode_error)? {
                Some(
                    decoder
                        .apng()
                        .and_then(|apng| apng.into_frames().collect_frames())
                        .map_err(decode_error)?,
                )
            } else {
                None
            }
        }
        ImageFormat::WebP => {
            let decoder = WebPDecoder::new(Cursor::new(bytes)).map_err(decode_error)?;
            if decoder.has_animation() {
                Some(decoder.into_frames().collect_frames().map_err(decode_error)?)
            } else {
                None
            }
        }
        _ => None,
    };

    let frames = match animated {
        Some(frames) if !frames.is_empty() => {
            let delays: Vec<u32> = frames.iter().map(|f| delay_ms(f.delay())).collect();
            let fallback = delays.iter().copied().find(|&d| d > 0).unwrap_or(fallback_ms);
            frames
                .into_iter()
                .zip(delays)
                .enumerate()
                .map(|(index, (frame, delay))| Frame {
                    image: frame.into_buffer(),
                    duration_ms: if delay > 0 { delay } else { fallback },
                    index,
                })
                .collect::<Vec<_>>()
        }
        _ => {
            let image = image::load_from_memory_with_format(bytes, format).map_err(decode_error)?;
            vec![Frame {
                image: image.to_rgba8(),
                duration_ms: fallback_ms,
                index: 0,
            }]
        }
    };

    let (width, height) = frames[0].image.dimensions();
    if width == 0 || height == 0 {
        return Err(CaptionError::invalid_input(
            "Width or height is zero. What are you trying to do?",
        ));
    }
    debug!(
        "Decoded {:?} source: {}x{}, {} frame(s)",
        format,
        width,
        height,
        frames.len()
    );
    Ok(frames)
}

fn decode_error(e: image::ImageError) -> CaptionError {
    CaptionError::decode(format!("Could not decode the image: {}", e))
}

fn delay_ms(delay: Delay) -> u32 {
    let (numer, denom) = delay.numer_denom_ms();
    if denom == 0 {
        0
    } else {
        numer / denom
    }
}

/// Resizes every frame to `size` with the same filter.
pub fn rescale_frames(frames: &mut [Frame], size: (u32, u32)) {
    for frame in frames.iter_mut() {
        if frame.image.dimensions() != size {
            frame.image = imageops::resize(&frame.image, size.0, size.1, FilterType::CatmullRom);
        }
    }
}

/// Wrapped caption lines and the banner geometry derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionLayout {
    pub lines: Vec<String>,
    /// Measured pixel width of each line
    pub line_widths: Vec<u32>,
    pub font_size: u32,
    pub line_spacing: f32,
    pub padding: u32,
    /// Banner and output width
    pub width: u32,
}

impl CaptionLayout {
    /// Wraps `text` to `width` with `font` and derives the banner geometry.
    pub fn compute(
        text: &str,
        font: &dyn Font,
        width: u32,
        line_spacing: f32,
        options: &GlyphOptions,
    ) -> Self {
        let lines = wrap_text(text, font, width, options);
        let line_widths = lines
            .iter()
            .map(|line| line_width(line, font, options))
            .collect();
        let font_size = font.size() as u32;

        CaptionLayout {
            lines,
            line_widths,
            font_size,
            line_spacing,
            padding: (font_size as f32 / 2.3).round_ties_even() as u32,
            width,
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Height of the caption banner in pixels.
    ///
    /// With no lines the spacing term is negative, one gap less than the padding.
    pub fn banner_height(&self) -> u32 {
        let count = self.lines.len() as i64;
        let spacing = ((count - 1) as f32 * self.line_spacing).round_ties_even() as i64;
        let height = i64::from(self.font_size) * count + spacing + 2 * i64::from(self.padding);
        height.max(1) as u32
    }

    /// Top-left corner of line `index`, centered horizontally.
    pub fn line_origin(&self, index: usize) -> (i32, i32) {
        let line_width = self.line_widths.get(index).copied().unwrap_or(0);
        let x = ((self.width as f32 - line_width as f32) / 2.0).trunc() as i32;
        let i = index as f32;
        let y = (self.padding / 2) as i32
            + (self.line_spacing * i + self.font_size as f32 * i).trunc() as i32;
        (x, y)
    }
}

/// Colors and glyph placement of the banner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BannerStyle {
    pub text: Rgba<u8>,
    pub background: Rgba<u8>,
    pub glyphs: GlyphOptions,
}

impl Default for BannerStyle {
    fn default() -> Self {
        BannerStyle {
            text: Rgba([0, 0, 0, 255]),
            background: Rgba([255, 255, 255, 255]),
            glyphs: GlyphOptions {
                offset: (0, 4),
                ..GlyphOptions::default()
            },
        }
    }
}

/// Draws the caption banner.
///
/// `font` is the canvas font. When `fallback` is given it replaces `font` for the
/// duration of the draw.
pub fn render_banner(
    layout: &CaptionLayout,
    font: Arc<dyn Font>,
    fallback: Option<Arc<dyn Font>>,
    glyphs: &dyn GlyphSource,
    style: &BannerStyle,
) -> RgbaImage {
    let surface = RgbaImage::from_pixel(layout.width, layout.banner_height(), style.background);
    let mut canvas = Canvas::new(surface, font, glyphs, style.glyphs);

    match fallback {
        Some(fallback) => {
            let mut scoped = canvas.with_font(fallback);
            draw_lines(&mut scoped, layout, style.text);
        }
        None => draw_lines(&mut canvas, layout, style.text),
    }
    canvas.into_image()
}

fn draw_lines(canvas: &mut Canvas<'_>, layout: &CaptionLayout, color: Rgba<u8>) {
    for (index, line) in layout.lines.iter().enumerate() {
        canvas.text(layout.line_origin(index), line, color);
    }
}

/// Stacks `banner` above `frame`. Frame pixels are copied as-is, alpha included.
pub fn compose_frame(banner: &RgbaImage, frame: &RgbaImage) -> RgbaImage {
    let width = banner.width();
    let mut output = RgbaImage::new(width, banner.height() + frame.height());
    imageops::replace(&mut output, banner, 0, 0);
    imageops::replace(&mut output, frame, 0, i64::from(banner.height()));
    output
}

/// Output of a render: one still image or an animation.
#[derive(Debug, Clone)]
pub enum RenderResult {
    Still(RgbaImage),
    Animated {
        frames: Vec<RgbaImage>,
        durations: Vec<u32>,
    },
}

/// Container format of an encoded caption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Gif,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Gif => "gif",
        }
    }

    /// Attachment name, `caption.png` or `caption.gif`.
    pub fn file_name(&self) -> String {
        format!("caption.{}", self.as_str())
    }
}

/// Encoded caption bytes tagged with their format.
#[derive(Debug, Clone)]
pub struct RenderedCaption {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
}

impl RenderResult {
    /// Composes every frame under `banner`.
    ///
    /// Frames keep their order whether or not they are composed in parallel. The
    /// source frames are consumed. Cancellation is checked before each frame.
    pub fn compose(
        banner: &RgbaImage,
        frames: Vec<Frame>,
        parallel: bool,
        token: &CancellationToken,
    ) -> Result<Self, CaptionError> {
        let compose_one = |frame: Frame| -> Result<(RgbaImage, u32), CaptionError> {
            if token.is_cancelled() {
                return Err(CaptionError::Cancelled);
            }
            if frame.image.width() != banner.width() {
                return Err(CaptionError::render(format!(
                    "frame {} is {} px wide, the banner is {} px",
                    frame.index,
                    frame.image.width(),
                    banner.width()
                )));
            }
            Ok((compose_frame(banner, &frame.image), frame.duration_ms))
        };

        let composed: Vec<(RgbaImage, u32)> = if parallel && frames.len() > 1 {
            frames.into_par_iter().map(compose_one).collect::<Result<_, _>>()?
        } else {
            frames.into_iter().map(compose_one).collect::<Result<_, _>>()?
        };

        let (mut frames, durations): (Vec<RgbaImage>, Vec<u32>) = composed.into_iter().unzip();
        match frames.len() {
            0 => Err(CaptionError::render("no frames to compose")),
            1 => Ok(RenderResult::Still(frames.remove(0))),
            _ => Ok(RenderResult::Animated { frames, durations }),
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, RenderResult::Animated { .. })
    }

    pub fn format(&self) -> OutputFormat {
        match self {
            RenderResult::Still(_) => OutputFormat::Png,
            RenderResult::Animated { .. } => OutputFormat::Gif,
        }
    }

    /// Pixel size shared by every output frame.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            RenderResult::Still(image) => image.dimensions(),
            RenderResult::Animated { frames, .. } => {
                frames.first().map_or((0, 0), |frame| frame.dimensions())
            }
        }
    }

    /// Encodes stills as PNG and animations as looping GIF.
    pub fn encode(self) -> Result<RenderedCaption, CaptionError> {
        let format = self.format();
        let mut bytes = Vec::new();
        match self {
            RenderResult::Still(image) => {
                image
                    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                    .map_err(|e| CaptionError::render(format!("PNG encoding failed: {}", e)))?;
            }
            RenderResult::Animated { frames, durations } => {
                let gif_error = |e: image::ImageError| {
                    CaptionError::render(format!("GIF encoding failed: {}", e))
                };
                let mut encoder = GifEncoder::new_with_speed(&mut bytes, 10);
                encoder.set_repeat(Repeat::Infinite).map_err(gif_error)?;
                let frames = frames.into_iter().zip(durations).map(|(buffer, ms)| {
                    image::Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(ms, 1))
                });
                encoder.encode_frames(frames).map_err(gif_error)?;
            }
        }
        info!("Encoded {} caption ({} bytes)", format.as_str(), bytes.len());
        Ok(RenderedCaption { bytes, format })
    }
}
