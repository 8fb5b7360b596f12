pub mod canvas;
pub mod icon;
pub mod text;

use crate::error::Result;
use image::RgbaImage;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use text::FontCache;
use tiny_skia::{Color, Pixmap};
use tracing::warn;

/// A rendered tile, ready to be pushed to the device.
pub type Image = Arc<RgbaImage>;

/// Colors, font and icon location used by all buttons.
#[derive(Debug, Clone)]
pub struct Theme {
    pub background: Color,
    pub foreground: Color,
    /// Foreground of buttons whose backend is unreachable.
    pub disabled: Color,
    pub alert: Color,
    pub warning: Color,
    pub ok: Color,
    pub highlight: Color,
    /// Font file; `None` picks a system font.
    pub font: Option<PathBuf>,
    pub font_size: f32,
    /// Directory with icon assets; `None` disables asset icons.
    pub icon_dir: Option<PathBuf>,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            background: Color::BLACK,
            foreground: Color::WHITE,
            disabled: Color::from_rgba8(54, 60, 62, 255),
            alert: Color::from_rgba8(255, 0, 0, 255),
            warning: Color::from_rgba8(255, 165, 0, 255),
            ok: Color::from_rgba8(0, 150, 0, 255),
            highlight: Color::from_rgba8(0, 0, 255, 255),
            font: None,
            font_size: 24.0,
            icon_dir: None,
        }
    }
}

/// Stateful drawing surface shared by all buttons of a deck.
///
/// The deck resets it before every `Button::image` call, so buttons start
/// from the theme defaults and may freely change colors and font.
pub struct GraphicContext {
    pixels: u32,
    theme: Theme,
    background: Color,
    foreground: Color,
    font: Option<PathBuf>,
    font_size: f32,
    fonts: FontCache,
    assets: HashMap<String, Option<Arc<RgbaImage>>>,
}

impl GraphicContext {
    pub fn new(pixels: u32, theme: Theme) -> Self {
        let mut gc = Self {
            pixels,
            background: theme.background,
            foreground: theme.foreground,
            font: theme.font.clone(),
            font_size: theme.font_size,
            theme,
            fonts: FontCache::default(),
            assets: HashMap::new(),
        };
        gc.reset();
        gc
    }

    pub fn pixels(&self) -> u32 {
        self.pixels
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn reset(&mut self) {
        self.background = self.theme.background;
        self.foreground = self.theme.foreground;
        self.font.clone_from(&self.theme.font);
        self.font_size = self.theme.font_size;
    }

    pub fn background(&self) -> Color {
        self.background
    }

    pub fn foreground(&self) -> Color {
        self.foreground
    }

    pub fn set_background(&mut self, background: Color) {
        self.background = background;
    }

    pub fn set_foreground(&mut self, foreground: Color) {
        self.foreground = foreground;
    }

    pub fn swap_colors(&mut self) {
        std::mem::swap(&mut self.background, &mut self.foreground);
    }

    pub fn set_font(&mut self, file: impl Into<PathBuf>) {
        self.font = Some(file.into());
    }

    pub fn set_font_size(&mut self, points: f32) {
        self.font_size = points;
    }

    pub fn draw_no_button(&mut self) -> Image {
        let background = self.theme.background;
        self.finish(canvas::create_canvas(self.pixels, background))
    }

    pub fn draw_single_line_text_button(&mut self, text: &str) -> Image {
        let center = self.pixels as f32 / 2.0;
        let size = self.font_size;
        let result = self.text_canvas().map(|(mut pm, font)| {
            if let Some(font) = font {
                text::draw_text_centered(&mut pm, &font, text, self.foreground, size, center, center);
            }
            pm
        });
        self.finish(result)
    }

    /// Two lines at 1/4 and 3/4 height; `active_line` (1 or 2) is drawn big,
    /// the other one at 75 %.
    pub fn draw_double_line_toggle_text_button(
        &mut self,
        text1: &str,
        text2: &str,
        active_line: usize,
    ) -> Image {
        let pixels = self.pixels as f32;
        let big = self.font_size;
        let small = 0.75 * big;
        let result = self.text_canvas().map(|(mut pm, font)| {
            if let Some(font) = font {
                let size1 = if active_line == 1 { big } else { small };
                let size2 = if active_line == 2 { big } else { small };
                text::draw_text_centered(&mut pm, &font, text1, self.foreground, size1, 0.5 * pixels, 0.25 * pixels);
                text::draw_text_centered(&mut pm, &font, text2, self.foreground, size2, 0.5 * pixels, 0.75 * pixels);
            }
            pm
        });
        self.finish(result)
    }

    /// Load an icon file.
    ///
    /// # Errors
    /// Returns the I/O or decoding error.
    pub fn load_icon_from_file(&self, path: &Path) -> Result<Arc<RgbaImage>> {
        icon::load_icon(path).map(Arc::new)
    }

    /// Load an icon from a reader.
    ///
    /// # Errors
    /// Returns the I/O or decoding error.
    pub fn load_icon_from_reader<R: Read>(&self, reader: R) -> Result<Arc<RgbaImage>> {
        icon::load_icon_from_reader(reader).map(Arc::new)
    }

    /// Load a named icon (e.g. `"volume_off.png"`) from the theme's icon directory.
    ///
    /// Returns `None` if no icon directory is configured or the asset cannot be
    /// loaded; failures are logged once per name.
    pub fn load_icon_asset(&mut self, name: &str) -> Option<Arc<RgbaImage>> {
        if let Some(cached) = self.assets.get(name) {
            return cached.clone();
        }
        let icon = self.theme.icon_dir.as_ref().and_then(|dir| {
            let path = dir.join(name);
            icon::load_icon(&path)
                .map(Arc::new)
                .map_err(|e| warn!("cannot load icon asset {}: {e}", path.display()))
                .ok()
        });
        self.assets.insert(name.to_string(), icon.clone());
        icon
    }

    /// The icon, tinted with the foreground, scaled to fill the tile.
    pub fn draw_icon_button(&mut self, icon: &RgbaImage) -> Image {
        let pixels = self.pixels as f32;
        let result = canvas::create_canvas(self.pixels, self.background).and_then(|mut pm| {
            let tinted = icon::tinted_icon(icon, self.foreground, self.background)?;
            let scale = pixels / tinted.width() as f32;
            canvas::composite_scaled(&mut pm, &tinted, scale, 0.0, 0.0);
            Ok(pm)
        });
        self.finish(result)
    }

    /// The icon in the upper half, the label centered at 3/4 height.
    pub fn draw_icon_label_button(&mut self, icon: &RgbaImage, label: &str) -> Image {
        let pixels = self.pixels as f32;
        let size = self.font_size;
        let result = self.text_canvas().and_then(|(mut pm, font)| {
            if let Some(font) = font {
                text::draw_text_centered(&mut pm, &font, label, self.foreground, size, 0.5 * pixels, 0.75 * pixels);
            }
            let tinted = icon::tinted_icon(icon, self.foreground, self.background)?;
            let icon_size = pixels / 2.0;
            let scale = icon_size / tinted.width() as f32;
            canvas::composite_scaled(&mut pm, &tinted, scale, (pixels - icon_size) / 2.0, 0.0);
            Ok(pm)
        });
        self.finish(result)
    }

    fn text_canvas(&mut self) -> Result<(Pixmap, Option<Arc<ab_glyph::FontVec>>)> {
        let pm = canvas::create_canvas(self.pixels, self.background)?;
        let font = self.fonts.get(self.font.as_deref());
        Ok((pm, font))
    }

    fn finish(&self, result: Result<Pixmap>) -> Image {
        match result {
            Ok(pm) => Arc::new(canvas::to_image(&pm)),
            Err(e) => {
                warn!("cannot draw button: {e}");
                Arc::new(RgbaImage::new(self.pixels, self.pixels))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn pixel(image: &Image) -> [u8; 4] {
        image.get_pixel(0, 0).0
    }

    #[test]
    fn reset_restores_theme() {
        let mut gc = GraphicContext::new(72, Theme::default());
        gc.set_foreground(Theme::default().alert);
        gc.set_font_size(10.0);
        gc.swap_colors();
        assert_eq!(gc.background(), Theme::default().alert);

        gc.reset();
        assert_eq!(gc.foreground(), Color::WHITE);
        assert_eq!(gc.background(), Color::BLACK);
    }

    #[test]
    fn text_tile_uses_background() {
        let mut gc = GraphicContext::new(72, Theme::default());
        gc.set_background(Theme::default().ok);
        let image = gc.draw_single_line_text_button("");
        assert_eq!(image.dimensions(), (72, 72));
        assert_eq!(pixel(&image), [0, 150, 0, 255]);

        gc.swap_colors();
        let image = gc.draw_double_line_toggle_text_button("", "", 1);
        assert_eq!(pixel(&image), [255, 255, 255, 255]);
    }

    #[test]
    fn no_button_is_theme_background() {
        let mut gc = GraphicContext::new(96, Theme::default());
        gc.set_background(Color::WHITE);
        let image = gc.draw_no_button();
        assert_eq!(image.dimensions(), (96, 96));
        assert_eq!(pixel(&image), [0, 0, 0, 255]);
    }

    #[test]
    fn icon_button_fills_tile() {
        let mut gc = GraphicContext::new(72, Theme::default());
        let icon = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]));
        let image = gc.draw_icon_button(&icon);
        assert_eq!(image.get_pixel(36, 36).0, [255, 255, 255, 255]);
    }

    #[test]
    fn asset_without_icon_dir_is_none() {
        let mut gc = GraphicContext::new(72, Theme::default());
        assert!(gc.load_icon_asset("volume_off.png").is_none());
    }
}
