mod lzw;
mod neuquant;
mod palette;
mod writer;

pub use lzw::{BlockWriter, LzwEncoder, MAX_CODES, MAX_CODE_WIDTH};
pub use neuquant::{quantize, NeuQuant, MAX_SAMPLE_INTERVAL, MIN_SAMPLE_INTERVAL};
pub use palette::{IndexedFrame, Palette, MAX_COLORS};
pub use writer::{delay_centis, GifWriter, Repeat, WriterState};
