//! The shared raster. One contiguous RGB byte buffer, written concurrently
//! by every connection handler and read by snapshots and `/place.png`.

use std::sync::atomic::{AtomicU8, Ordering};

use image::{DynamicImage, Rgba, RgbaImage};

/// Fixed-size RGB canvas.
///
/// Pixels are stored interleaved (R,G,B) in row-major order; pixel (x,y)
/// starts at byte offset `3 * (y * width + x)`. The buffer length never
/// changes after construction and every byte is always a valid color
/// component; a fresh canvas is all white.
///
/// Writes and reads go through relaxed per-byte atomics: a concurrent
/// reader may observe a torn *single* pixel mid-update, but never bytes
/// outside that pixel's 3-byte footprint. Callers that need a consistent
/// image (snapshots) accept the point-in-time-ish result.
pub struct Canvas {
    width: u32,
    height: u32,
    data: Box<[AtomicU8]>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        let len = 3 * width as usize * height as usize;
        let data: Box<[AtomicU8]> = (0..len).map(|_| AtomicU8::new(0xFF)).collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn index(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.width && y < self.height);
        3 * (y as usize * self.width as usize + x as usize)
    }

    /// Reset every pixel to white.
    pub fn clear(&self) {
        for byte in self.data.iter() {
            byte.store(0xFF, Ordering::Relaxed);
        }
    }

    pub fn place_pixel(&self, x: u32, y: u32, r: u8, g: u8, b: u8) {
        let i = self.index(x, y);
        self.data[i].store(r, Ordering::Relaxed);
        self.data[i + 1].store(g, Ordering::Relaxed);
        self.data[i + 2].store(b, Ordering::Relaxed);
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let i = self.index(x, y);
        (
            self.data[i].load(Ordering::Relaxed),
            self.data[i + 1].load(Ordering::Relaxed),
            self.data[i + 2].load(Ordering::Relaxed),
        )
    }

    /// Load pixels from a decoded snapshot image. Pixels outside the
    /// canvas bounds are skipped; if the image is smaller than the canvas
    /// the remainder keeps its current contents.
    pub fn load_from_image(&self, img: &DynamicImage) {
        let rgb = img.to_rgb8();
        for (x, y, pixel) in rgb.enumerate_pixels() {
            if x < self.width && y < self.height {
                self.place_pixel(x, y, pixel[0], pixel[1], pixel[2]);
            }
        }
    }

    /// Render the current contents as an RGBA image (alpha is always 255).
    pub fn to_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let (r, g, b) = self.get_pixel(x, y);
            Rgba([r, g, b, 255])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_canvas_is_white() {
        let canvas = Canvas::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(canvas.get_pixel(x, y), (255, 255, 255));
            }
        }
    }

    #[test]
    fn place_then_get_returns_last_write() {
        let canvas = Canvas::new(10, 10);
        canvas.place_pixel(5, 7, 0xFF, 0, 0);
        assert_eq!(canvas.get_pixel(5, 7), (0xFF, 0, 0));

        canvas.place_pixel(5, 7, 1, 2, 3);
        assert_eq!(canvas.get_pixel(5, 7), (1, 2, 3));

        // Neighbors are untouched.
        assert_eq!(canvas.get_pixel(4, 7), (255, 255, 255));
        assert_eq!(canvas.get_pixel(6, 7), (255, 255, 255));
        assert_eq!(canvas.get_pixel(5, 6), (255, 255, 255));
    }

    #[test]
    fn clear_resets_to_white() {
        let canvas = Canvas::new(3, 3);
        canvas.place_pixel(0, 0, 10, 20, 30);
        canvas.place_pixel(2, 2, 40, 50, 60);
        canvas.clear();
        assert_eq!(canvas.get_pixel(0, 0), (255, 255, 255));
        assert_eq!(canvas.get_pixel(2, 2), (255, 255, 255));
    }

    #[test]
    fn image_round_trip_preserves_pixels() {
        let canvas = Canvas::new(8, 6);
        canvas.place_pixel(0, 0, 1, 2, 3);
        canvas.place_pixel(7, 5, 200, 100, 50);

        let img = canvas.to_image();
        assert_eq!(img.dimensions(), (8, 6));
        assert_eq!(img.get_pixel(0, 0).0, [1, 2, 3, 255]);
        assert_eq!(img.get_pixel(7, 5).0, [200, 100, 50, 255]);

        let restored = Canvas::new(8, 6);
        restored.load_from_image(&DynamicImage::ImageRgba8(img));
        for y in 0..6 {
            for x in 0..8 {
                assert_eq!(restored.get_pixel(x, y), canvas.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn oversized_image_is_clipped_to_canvas() {
        let mut big = RgbaImage::new(4, 4);
        for pixel in big.pixels_mut() {
            *pixel = Rgba([9, 9, 9, 255]);
        }
        let canvas = Canvas::new(2, 2);
        canvas.load_from_image(&DynamicImage::ImageRgba8(big));
        assert_eq!(canvas.get_pixel(1, 1), (9, 9, 9));
    }
}
