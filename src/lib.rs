//! Rolling-buffer GIF capture.
//!
//! A [`Recorder`] keeps the last few seconds of frames handed over by a host
//! render loop. On request it drains them into a [`SaveJob`], which converts
//! the frames and starts an [`EncodeWorker`] thread that quantizes every
//! frame and writes an animated GIF89a file.

pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod recording;

pub use capture::{Capture, Frame, PixelLayout, RowOrder};
pub use config::{Config, RecorderConfig};
pub use error::{Error, Result};
pub use recording::{
    EncodeWorker, EncoderSettings, Recorder, RecordingState, SaveEvent, SaveJob, SaveListener,
    WorkerHandle,
};
