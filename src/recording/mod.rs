mod buffer;
mod recorder;
mod worker;

pub use buffer::{BufferStats, FrameBuffer};
pub use recorder::{Recorder, SaveJob};
pub use worker::{EncodeWorker, EncoderSettings, SaveEvent, SaveListener, WorkerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Recording,
    Paused,
    /// Frames are being handed to an encoder. Recording, pausing and saving
    /// are refused until that is done.
    PreProcessing,
}
