use crate::error::{DeckError, Result};
use image::RgbaImage;
use tiny_skia::{Color, FilterQuality, Pixmap, PixmapPaint, Transform};

/// Create a new square pixmap filled with a solid background color.
///
/// # Errors
/// Returns `DeckError::Render` if the pixmap cannot be created (zero size).
pub fn create_canvas(pixels: u32, background: Color) -> Result<Pixmap> {
    let mut pixmap = Pixmap::new(pixels, pixels)
        .ok_or_else(|| DeckError::Render(format!("failed to create {pixels}px pixmap")))?;
    pixmap.fill(background);
    Ok(pixmap)
}

/// Composite a source pixmap onto the canvas, scaled by `scale` and placed at `(x, y)`.
pub fn composite_scaled(canvas: &mut Pixmap, src: &Pixmap, scale: f32, x: f32, y: f32) {
    let paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    canvas.draw_pixmap(
        0,
        0,
        src.as_ref(),
        &paint,
        Transform::from_row(scale, 0.0, 0.0, scale, x, y),
        None,
    );
}

/// Convert a premultiplied canvas into a straight-alpha device image.
#[must_use]
pub fn to_image(pixmap: &Pixmap) -> RgbaImage {
    let (width, height) = (pixmap.width(), pixmap.height());
    let mut data = Vec::with_capacity(pixmap.data().len());
    for pixel in pixmap.pixels() {
        let c = pixel.demultiply();
        data.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    RgbaImage::from_raw(width, height, data).unwrap_or_else(|| RgbaImage::new(width, height))
}

/// Color as straight 8-bit RGB components.
#[must_use]
pub fn rgb(color: Color) -> (u8, u8, u8) {
    let c = color.to_color_u8();
    (c.red(), c.green(), c.blue())
}

/// Theme color from `#rgb` or `#rrggbb`; the leading `#` is optional.
///
/// # Errors
/// Returns `DeckError::Render` if the value is not a hex color.
pub fn parse_hex_color(value: &str) -> Result<Color> {
    let digits = value.trim().trim_start_matches('#');
    let invalid = || DeckError::Render(format!("invalid hex color {value:?}"));

    let nibbles = digits
        .chars()
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(invalid)?;
    let channels: Vec<u8> = match nibbles.len() {
        3 => nibbles.iter().map(|n| n * 17).collect(),
        6 => nibbles.chunks(2).map(|pair| pair[0] * 16 + pair[1]).collect(),
        _ => return Err(invalid()),
    };
    Ok(Color::from_rgba8(channels[0], channels[1], channels[2], 255))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_form_reads_byte_pairs() {
        let c = parse_hex_color("#363c3e").unwrap();
        assert_eq!(rgb(c), (0x36, 0x3c, 0x3e));
    }

    #[test]
    fn short_form_repeats_each_digit() {
        let c = parse_hex_color("f80").unwrap();
        assert_eq!(rgb(c), (0xff, 0x88, 0x00));
    }

    #[test]
    fn reject_bad_hex() {
        assert!(parse_hex_color("#12345").is_err());
        assert!(parse_hex_color("#ggg").is_err());
        assert!(parse_hex_color("#äb").is_err());
    }

    #[test]
    fn canvas_converts_to_straight_rgba() {
        let pm = create_canvas(72, Color::from_rgba8(0, 150, 0, 255)).unwrap();
        let img = to_image(&pm);
        assert_eq!(img.dimensions(), (72, 72));
        assert_eq!(img.get_pixel(10, 10).0, [0, 150, 0, 255]);
    }

    #[test]
    fn zero_sized_canvas_fails() {
        assert!(create_canvas(0, Color::BLACK).is_err());
    }
}
