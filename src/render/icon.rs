use crate::error::{DeckError, Result};
use crate::render::canvas::rgb;
use image::RgbaImage;
use std::io::Read;
use std::path::{Path, PathBuf};
use tiny_skia::{Color, Pixmap};

/// Load an icon from a file.
///
/// # Errors
/// Returns `DeckError::Io` if the file cannot be read, or `DeckError::Icon`
/// if it cannot be decoded.
pub fn load_icon(path: &Path) -> Result<RgbaImage> {
    let file = std::fs::File::open(path)?;
    decode_icon(file, path)
}

/// Load an icon from any reader (PNG, JPEG, GIF...).
///
/// # Errors
/// Returns `DeckError::Io` on read errors, or `DeckError::Icon` if the data cannot be decoded.
pub fn load_icon_from_reader<R: Read>(reader: R) -> Result<RgbaImage> {
    decode_icon(reader, Path::new("<stream>"))
}

fn decode_icon<R: Read>(mut reader: R, origin: &Path) -> Result<RgbaImage> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let icon = image::load_from_memory(&bytes).map_err(|e| DeckError::Icon {
        path: PathBuf::from(origin),
        source: e,
    })?;
    Ok(icon.to_rgba8())
}

/// Tint an icon: its alpha channel masks the foreground over a solid background.
///
/// The result is square (side = the icon's longer edge) with the icon centered,
/// so it can be scaled uniformly onto a tile.
///
/// # Errors
/// Returns `DeckError::Render` if the icon is empty.
pub fn tinted_icon(icon: &RgbaImage, foreground: Color, background: Color) -> Result<Pixmap> {
    let (width, height) = icon.dimensions();
    let side = width.max(height);
    let mut pixmap = Pixmap::new(side, side)
        .ok_or_else(|| DeckError::Render("cannot draw an empty icon".into()))?;
    pixmap.fill(background);

    let dx = (side - width) / 2;
    let dy = (side - height) / 2;
    let (fr, fg, fb) = rgb(foreground);
    let stride = side as usize * 4;
    let data = pixmap.data_mut();

    for (x, y, pixel) in icon.enumerate_pixels() {
        let alpha = u16::from(pixel.0[3]);
        if alpha == 0 {
            continue;
        }
        let idx = (y + dy) as usize * stride + (x + dx) as usize * 4;
        let inv = 255 - alpha;
        data[idx] = ((u16::from(fr) * alpha + u16::from(data[idx]) * inv) / 255) as u8;
        data[idx + 1] = ((u16::from(fg) * alpha + u16::from(data[idx + 1]) * inv) / 255) as u8;
        data[idx + 2] = ((u16::from(fb) * alpha + u16::from(data[idx + 2]) * inv) / 255) as u8;
        data[idx + 3] = 255;
    }

    Ok(pixmap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn tint_uses_alpha_as_mask() {
        let mut icon = RgbaImage::new(4, 2);
        icon.put_pixel(0, 0, Rgba([0, 0, 0, 255]));

        let pm = tinted_icon(&icon, Color::WHITE, Color::BLACK).unwrap();
        assert_eq!((pm.width(), pm.height()), (4, 4));

        // The 4x2 icon is centered vertically with one row of padding.
        let px = pm.pixel(0, 1).unwrap();
        assert_eq!((px.red(), px.green(), px.blue()), (255, 255, 255));
        let px = pm.pixel(0, 0).unwrap();
        assert_eq!((px.red(), px.green(), px.blue()), (0, 0, 0));
    }

    #[test]
    fn undecodable_icon_is_an_error() {
        let err = load_icon_from_reader(&b"definitely not a png"[..]).unwrap_err();
        assert!(matches!(err, DeckError::Icon { .. }));
    }

    #[test]
    fn missing_icon_file_is_an_error() {
        let err = load_icon(Path::new("/nonexistent/hamdeck/icon.png")).unwrap_err();
        assert!(matches!(err, DeckError::Io(_)));
    }
}
