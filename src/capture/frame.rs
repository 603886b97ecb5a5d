use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pixel formats we accept from the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    Rgba8,
    Rgb8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgba8 => 4,
            PixelLayout::Rgb8 => 3,
        }
    }
}

/// Row order of the producer's buffer. GPU readbacks usually come bottom up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RowOrder {
    #[default]
    TopDown,
    BottomUp,
}

/// A captured frame as handed over by the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    layout: PixelLayout,
    row_order: RowOrder,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        row_order: RowOrder,
        data: Vec<u8>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::invalid_argument("frame has zero dimension"));
        }
        if width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(Error::invalid_argument(format!(
                "frame of {}x{} is too large for GIF",
                width, height
            )));
        }
        let expected = (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(layout.bytes_per_pixel());
        if data.len() != expected {
            return Err(Error::invalid_argument(format!(
                "frame of {}x{} {:?} needs {} bytes, got {}",
                width,
                height,
                layout,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            layout,
            row_order,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn row_order(&self) -> RowOrder {
        self.row_order
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Gives back the backing storage so it can be filled again.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Converts to packed top-down RGB24 in place.
    pub fn into_rgb(self) -> RgbFrame {
        let Frame {
            width,
            height,
            layout,
            row_order,
            mut data,
        } = self;
        let (w, h) = (width as usize, height as usize);

        if layout == PixelLayout::Rgba8 {
            for i in 0..w * h {
                data.copy_within(i * 4..i * 4 + 3, i * 3);
            }
            data.truncate(w * h * 3);
        }

        if row_order == RowOrder::BottomUp {
            let stride = w * 3;
            for y in 0..h / 2 {
                let (top, bottom) = data.split_at_mut((h - 1 - y) * stride);
                top[y * stride..(y + 1) * stride].swap_with_slice(&mut bottom[..stride]);
            }
        }

        RgbFrame {
            width: width as u16,
            height: height as u16,
            pixels: data,
        }
    }
}

impl TryFrom<RgbaImage> for Frame {
    type Error = Error;

    fn try_from(image: RgbaImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Frame::new(
            width,
            height,
            PixelLayout::Rgba8,
            RowOrder::TopDown,
            image.into_raw(),
        )
    }
}

/// Packed RGB24, top row first. This is what the encoder consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub width: u16,
    pub height: u16,
    pub pixels: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_length() {
        let result = Frame::new(2, 2, PixelLayout::Rgba8, RowOrder::TopDown, vec![0; 12]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        let result = Frame::new(2, 2, PixelLayout::Rgb8, RowOrder::TopDown, vec![0; 12]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_rejects_bad_dimensions() {
        assert!(Frame::new(0, 2, PixelLayout::Rgb8, RowOrder::TopDown, vec![]).is_err());
        let wide = Frame::new(70_000, 1, PixelLayout::Rgb8, RowOrder::TopDown, vec![0; 210_000]);
        assert!(wide.is_err());
    }

    #[test]
    fn test_rgba_to_rgb() {
        let data = vec![1, 2, 3, 255, 4, 5, 6, 0];
        let frame = Frame::new(2, 1, PixelLayout::Rgba8, RowOrder::TopDown, data).unwrap();
        let rgb = frame.into_rgb();
        assert_eq!(rgb.pixels, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!((rgb.width, rgb.height), (2, 1));
    }

    #[test]
    fn test_bottom_up_rows_are_flipped() {
        // three rows of one pixel each
        let data = vec![1, 1, 1, 2, 2, 2, 3, 3, 3];
        let frame = Frame::new(1, 3, PixelLayout::Rgb8, RowOrder::BottomUp, data).unwrap();
        assert_eq!(frame.into_rgb().pixels, vec![3, 3, 3, 2, 2, 2, 1, 1, 1]);
    }

    #[test]
    fn test_bottom_up_rgba() {
        let data = vec![
            1, 0, 0, 9, 2, 0, 0, 9, //
            3, 0, 0, 9, 4, 0, 0, 9,
        ];
        let frame = Frame::new(2, 2, PixelLayout::Rgba8, RowOrder::BottomUp, data).unwrap();
        assert_eq!(
            frame.into_rgb().pixels,
            vec![3, 0, 0, 4, 0, 0, 1, 0, 0, 2, 0, 0]
        );
    }

    #[test]
    fn test_from_rgba_image() {
        let image = RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        let frame = Frame::try_from(image).unwrap();
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert_eq!(frame.layout(), PixelLayout::Rgba8);
        assert_eq!(&frame.into_rgb().pixels[..3], &[10, 20, 30]);
    }
}
