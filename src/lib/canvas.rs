//! A drawing surface that renders caption text, glyph runs included.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use image::{imageops, Rgba, RgbaImage};

use crate::fonts::Font;
use crate::glyphs::{classify, GlyphSource, Run};
use crate::measure::{measure, GlyphOptions};

/// An image plus the font and glyph backend currently used to draw on it.
pub struct Canvas<'g> {
    image: RgbaImage,
    font: Arc<dyn Font>,
    glyphs: &'g dyn GlyphSource,
    options: GlyphOptions,
}

impl<'g> Canvas<'g> {
    pub fn new(
        image: RgbaImage,
        font: Arc<dyn Font>,
        glyphs: &'g dyn GlyphSource,
        options: GlyphOptions,
    ) -> Self {
        Canvas {
            image,
            font,
            glyphs,
            options,
        }
    }

    pub fn font(&self) -> &dyn Font {
        self.font.as_ref()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Size of `text` as [`text`](Self::text) would draw it.
    pub fn measure(&self, text: &str) -> (u32, u32) {
        measure(text, self.font.as_ref(), &self.options)
    }

    /// Draws `text` with its top-left corner at `pos`.
    ///
    /// Glyph runs are drawn from the glyph backend as squares of
    /// [`GlyphOptions::glyph_size`]; when the backend has no bitmap for a run the
    /// run's characters are drawn with the font instead, in the same square.
    pub fn text(&mut self, pos: (i32, i32), text: &str, color: Rgba<u8>) {
        let glyph_size = self.options.glyph_size(self.font.as_ref());
        let (dx, dy) = self.options.offset;
        let mut y = pos.1;

        for line in text.split('\n') {
            let runs = classify(line);
            let mut x = pos.0;
            let mut line_height = 0;

            for run in &runs {
                match run {
                    Run::Text(content) => {
                        let (width, height) = self.font.measure(content);
                        self.font.draw(&mut self.image, (x, y), content, color);
                        x += width as i32;
                        line_height = line_height.max(height);
                    }
                    Run::StandardGlyph(content) | Run::PlatformGlyph(content) => {
                        match self.glyphs.bitmap(run, glyph_size) {
                            Some(bitmap) => imageops::overlay(
                                &mut self.image,
                                &bitmap,
                                i64::from(x + dx),
                                i64::from(y + dy),
                            ),
                            None => self.font.draw(&mut self.image, (x, y), content, color),
                        }
                        x += glyph_size as i32;
                        line_height = line_height.max(glyph_size);
                    }
                }
            }
            y += (line_height + self.options.spacing) as i32;
        }
    }

    /// Swaps `font` in for the lifetime of the returned guard.
    ///
    /// The previous font is put back when the guard is dropped, including during
    /// unwinding.
    pub fn with_font(&mut self, font: Arc<dyn Font>) -> FontScope<'_, 'g> {
        let previous = std::mem::replace(&mut self.font, font);
        FontScope {
            canvas: self,
            previous: Some(previous),
        }
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// Guard returned by [`Canvas::with_font`].
pub struct FontScope<'c, 'g> {
    canvas: &'c mut Canvas<'g>,
    previous: Option<Arc<dyn Font>>,
}

impl<'g> Deref for FontScope<'_, 'g> {
    type Target = Canvas<'g>;

    fn deref(&self) -> &Self::Target {
        self.canvas
    }
}

impl<'g> DerefMut for FontScope<'_, 'g> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.canvas
    }
}

impl Drop for FontScope<'_, '_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.canvas.font = previous;
        }
    }
}
