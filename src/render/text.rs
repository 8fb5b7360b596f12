use crate::error::{DeckError, Result};
use crate::render::canvas::rgb;
use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiny_skia::{Color, Pixmap};
use tracing::{debug, warn};

/// Well-known locations of DejaVu Sans, tried when the theme names no font.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/local/share/fonts/DejaVuSans.ttf",
];

/// Used when no system font is installed.
const FALLBACK_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// Loaded fonts by file; a failed lookup is remembered so it is only reported once.
#[derive(Default)]
pub struct FontCache {
    fonts: HashMap<Option<PathBuf>, Option<Arc<FontVec>>>,
}

impl FontCache {
    /// Get the font from `file`, or the first system font if `file` is `None`.
    pub fn get(&mut self, file: Option<&Path>) -> Option<Arc<FontVec>> {
        let key = file.map(Path::to_path_buf);
        self.fonts
            .entry(key)
            .or_insert_with(|| match file {
                Some(file) => load_font(file),
                None => load_system_font(),
            })
            .clone()
    }
}

fn read_font(file: &Path) -> Result<FontVec> {
    let bytes = std::fs::read(file)?;
    FontVec::try_from_vec(bytes).map_err(|e| DeckError::Font(format!("{}: {e}", file.display())))
}

fn load_font(file: &Path) -> Option<Arc<FontVec>> {
    match read_font(file) {
        Ok(font) => {
            debug!("loaded font {}", file.display());
            Some(Arc::new(font))
        }
        Err(e) => {
            warn!("cannot load font {}, text will not be drawn: {e}", file.display());
            None
        }
    }
}

fn load_system_font() -> Option<Arc<FontVec>> {
    let font = SYSTEM_FONTS
        .iter()
        .map(Path::new)
        .filter(|path| path.exists())
        .find_map(|path| read_font(path).ok());
    font.or_else(load_fallback_font).map(Arc::new)
}

fn load_fallback_font() -> Option<FontVec> {
    debug!("no system font found, using the built-in DejaVu Sans");
    match FontVec::try_from_vec(FALLBACK_FONT.to_vec()) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!("cannot load the built-in font, text will not be drawn; use --font to select one: {e}");
            None
        }
    }
}

/// Rasterize a single line of text centered on `(cx, cy)`.
pub fn draw_text_centered(
    canvas: &mut Pixmap,
    font: &FontVec,
    text: &str,
    color: Color,
    points: f32,
    cx: f32,
    cy: f32,
) {
    let scale = font.pt_to_px_scale(points).unwrap_or(PxScale::from(points));
    let scaled_font = font.as_scaled(scale);

    let line_width = measure_line(&scaled_font, text);
    let x_offset = cx - line_width / 2.0;
    let y_baseline = cy + (scaled_font.ascent() + scaled_font.descent()) / 2.0;

    let (r, g, b) = rgb(color);
    let canvas_w = canvas.width() as i32;
    let canvas_h = canvas.height() as i32;
    let data = canvas.data_mut();

    let mut cursor_x = x_offset;
    let mut prev_glyph_id = None;

    for ch in text.chars() {
        let glyph_id = scaled_font.glyph_id(ch);
        if let Some(prev) = prev_glyph_id {
            cursor_x += scaled_font.kern(prev, glyph_id);
        }

        if let Some(outlined) = scaled_font.outline_glyph(
            glyph_id.with_scale_and_position(scale, ab_glyph::point(cursor_x, y_baseline)),
        ) {
            let bounds = outlined.px_bounds();
            outlined.draw(|px, py, coverage| {
                let x = px as i32 + bounds.min.x as i32;
                let y = py as i32 + bounds.min.y as i32;
                if x >= 0 && x < canvas_w && y >= 0 && y < canvas_h {
                    let idx = (y * canvas_w + x) as usize * 4;
                    let alpha = u16::from((coverage.clamp(0.0, 1.0) * 255.0) as u8);
                    let inv = 255 - alpha;
                    data[idx] = ((u16::from(r) * alpha + u16::from(data[idx]) * inv) / 255) as u8;
                    data[idx + 1] =
                        ((u16::from(g) * alpha + u16::from(data[idx + 1]) * inv) / 255) as u8;
                    data[idx + 2] =
                        ((u16::from(b) * alpha + u16::from(data[idx + 2]) * inv) / 255) as u8;
                    data[idx + 3] = 255;
                }
            });
        }

        cursor_x += scaled_font.h_advance(glyph_id);
        prev_glyph_id = Some(glyph_id);
    }
}

fn measure_line<F: Font>(font: &ab_glyph::PxScaleFont<F>, text: &str) -> f32 {
    let mut width = 0.0f32;
    let mut prev = None;
    for ch in text.chars() {
        let glyph_id = font.glyph_id(ch);
        if let Some(prev_id) = prev {
            width += font.kern(prev_id, glyph_id);
        }
        width += font.h_advance(glyph_id);
        prev = Some(glyph_id);
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_font_file_is_remembered() {
        let mut cache = FontCache::default();
        let missing = Path::new("/nonexistent/hamdeck/font.ttf");
        assert!(cache.get(Some(missing)).is_none());
        assert!(cache.get(Some(missing)).is_none());
        assert_eq!(cache.fonts.len(), 1);
    }

    #[test]
    fn garbage_font_file_is_rejected() {
        let file = std::env::temp_dir().join(format!("hamdeck-font-{}.ttf", std::process::id()));
        std::fs::write(&file, b"not a font").unwrap();
        assert!(matches!(read_font(&file), Err(DeckError::Font(_))));
        let mut cache = FontCache::default();
        assert!(cache.get(Some(&file)).is_none());
        std::fs::remove_file(&file).unwrap();
    }

    #[test]
    fn built_in_font_is_usable() {
        let font = load_fallback_font().unwrap();
        assert!(font.glyph_id('A').0 != 0);

        let mut cache = FontCache::default();
        assert!(cache.get(None).is_some());
    }
}
