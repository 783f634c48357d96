//! Raster encoding of images for ESC/POS thermal printers.
//!
//! The image is drawn onto a white canvas as wide as the paper and sent as a single
//! `GS v 0` raster command: eight header bytes followed by one bit per pixel, eight pixels
//! per byte, most significant bit first. A set bit prints a dot.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

use crate::bluetooth::constants::{CANVAS_HEIGHT, COMMAND_RASTER_IMAGE, MIN_ROWS, PRINT_WIDTH};
use crate::error::RasterError;

/// Bytes per printed row. Trailing pixels that do not fill a whole byte are dropped.
pub const ROW_BYTES: u32 = PRINT_WIDTH / 8;

/// Columns that actually end up on paper.
pub const PRINTABLE_WIDTH: u32 = ROW_BYTES * 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothImage {
    rows: u32,
    bytes: Vec<u8>,
}

impl BluetoothImage {
    pub fn new(image: &DynamicImage) -> Result<Self, RasterError> {
        let height = image.height();

        let mut rows = MIN_ROWS;
        if rows < height {
            rows += height;
        }

        if rows > CANVAS_HEIGHT {
            return Err(RasterError::TooTall { height, max: CANVAS_HEIGHT - MIN_ROWS });
        }

        let pixels = image.to_rgba8();
        let mut bytes = Vec::with_capacity(8 + (ROW_BYTES * rows) as usize);
        bytes.extend_from_slice(&COMMAND_RASTER_IMAGE);
        bytes.push((ROW_BYTES % 256) as u8);
        bytes.push((ROW_BYTES / 256) as u8);
        bytes.push((rows % 256) as u8);
        bytes.push((rows / 256) as u8);

        for y in 0..rows {
            for k in 0..ROW_BYTES {
                let mut value: u8 = 0;
                for bit in 0..8 {
                    if !is_white_at(&pixels, k * 8 + bit, y) {
                        value |= 0x80 >> bit;
                    }
                }
                bytes.push(value);
            }
        }

        Ok(BluetoothImage { rows, bytes })
    }

    /// Scales `image` down so that it fits the printable width, keeping its aspect ratio.
    /// Images that already fit are returned unchanged.
    pub fn fit_to_width(image: &DynamicImage) -> DynamicImage {
        let (width, height) = image.dimensions();
        if width <= PRINTABLE_WIDTH {
            return image.clone();
        }

        let scaled_height = (u64::from(height) * u64::from(PRINTABLE_WIDTH) / u64::from(width)).max(1);
        image.resize_exact(PRINTABLE_WIDTH, scaled_height as u32, FilterType::Triangle)
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

fn is_white_at(pixels: &RgbaImage, x: u32, y: u32) -> bool {
    // outside of the source image the canvas is white
    if x >= pixels.width() || y >= pixels.height() {
        return true;
    }

    is_white(pixels.get_pixel(x, y))
}

// The canvas is composited over white and keeps 4 bits per channel, so anything whose
// channels all round up to 0xF is considered paper.
fn is_white(pixel: &Rgba<u8>) -> bool {
    let [r, g, b, a] = pixel.0;
    [r, g, b].into_iter().all(|channel| composite_over_white(channel, a) >> 4 == 0x0F)
}

fn composite_over_white(channel: u8, alpha: u8) -> u8 {
    let channel = u16::from(channel);
    let alpha = u16::from(alpha);
    ((channel * alpha + 255 * (255 - alpha)) / 255) as u8
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
    use pretty_assertions::assert_eq;

    use super::{BluetoothImage, ROW_BYTES};
    use crate::error::RasterError;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn filled(width: u32, height: u32, color: Rgba<u8>) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, color))
    }

    fn row(image: &BluetoothImage, y: u32) -> &[u8] {
        let start = 8 + (y * ROW_BYTES) as usize;
        &image.as_bytes()[start..start + ROW_BYTES as usize]
    }

    #[test]
    fn white_image_prints_nothing() {
        let image = BluetoothImage::new(&filled(8, 8, WHITE)).unwrap();

        assert_eq!(&image.as_bytes()[..8], &[29, 118, 48, 0, 68, 0, 20, 0]);
        assert_eq!(image.rows(), 20);
        assert_eq!(image.as_bytes().len(), 8 + 68 * 20);
        assert!(image.as_bytes()[8..].iter().all(|&byte| byte == 0x00));
    }

    #[test]
    fn black_image_sets_every_covered_bit() {
        let image = BluetoothImage::new(&filled(8, 8, BLACK)).unwrap();

        assert_eq!(&image.as_bytes()[..8], &[29, 118, 48, 0, 68, 0, 20, 0]);
        for y in 0..8 {
            assert_eq!(row(&image, y)[0], 0xFF);
            assert!(row(&image, y)[1..].iter().all(|&byte| byte == 0x00));
        }
        for y in 8..20 {
            assert!(row(&image, y).iter().all(|&byte| byte == 0x00));
        }
    }

    #[test]
    fn leftmost_pixel_is_the_most_significant_bit() {
        let mut pixels = RgbaImage::from_pixel(16, 1, WHITE);
        for x in (0..8).step_by(2) {
            pixels.put_pixel(x, 0, BLACK);
        }
        pixels.put_pixel(15, 0, BLACK);

        let image = BluetoothImage::new(&DynamicImage::ImageRgba8(pixels)).unwrap();
        assert_eq!(&row(&image, 0)[..2], &[0b1010_1010, 0b0000_0001]);
    }

    #[test]
    fn tall_images_extend_the_row_count() {
        let image = BluetoothImage::new(&filled(8, 300, WHITE)).unwrap();

        assert_eq!(image.rows(), 320);
        assert_eq!(&image.as_bytes()[6..8], &[64, 1]);
        assert_eq!(image.as_bytes().len(), 8 + 68 * 320);
    }

    #[test]
    fn transparent_and_near_white_pixels_are_paper() {
        let mut pixels = RgbaImage::from_pixel(8, 1, Rgba([0, 0, 0, 0]));
        pixels.put_pixel(1, 0, Rgba([250, 250, 250, 255]));
        pixels.put_pixel(2, 0, Rgba([200, 200, 200, 255]));

        let image = BluetoothImage::new(&DynamicImage::ImageRgba8(pixels)).unwrap();
        assert_eq!(row(&image, 0)[0], 0b0010_0000);
    }

    #[test]
    fn wide_images_are_clipped_to_the_paper() {
        let image = BluetoothImage::new(&filled(600, 2, BLACK)).unwrap();

        assert_eq!(image.as_bytes().len(), 8 + 68 * 20);
        assert!(row(&image, 1).iter().all(|&byte| byte == 0xFF));
    }

    #[test]
    fn images_taller_than_the_canvas_are_rejected() {
        let result = BluetoothImage::new(&filled(1, 5481, WHITE));
        assert!(matches!(result, Err(RasterError::TooTall { height: 5481, max: 5480 })));

        assert!(BluetoothImage::new(&filled(1, 5480, WHITE)).is_ok());
    }

    #[test]
    fn fit_to_width_keeps_the_aspect_ratio() {
        let scaled = BluetoothImage::fit_to_width(&filled(1088, 100, BLACK));
        assert_eq!(scaled.dimensions(), (544, 50));

        let unchanged = BluetoothImage::fit_to_width(&filled(100, 100, BLACK));
        assert_eq!(unchanged.dimensions(), (100, 100));
    }
}
