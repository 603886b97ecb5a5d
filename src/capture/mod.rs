mod frame;

pub use frame::{Frame, PixelLayout, RgbFrame, RowOrder};

use crate::error::Result;

/// Something that can render the next frame on the producer's thread.
///
/// `storage` is a recycled allocation from the frame buffer when one is
/// available, or an empty `Vec`. Implementations should clear it and fill
/// it rather than allocating a new buffer.
pub trait Capture {
    fn capture(&mut self, storage: Vec<u8>) -> Result<Frame>;
}
