use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, info};

use crate::capture::RgbFrame;
use crate::encoder::{quantize, GifWriter, IndexedFrame, Repeat};
use crate::error::{Error, Result};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    /// -1 plays once, 0 loops forever, n loops n times.
    pub repeat: i32,
    /// Quantizer sample interval in `1..=100`.
    pub sample_interval: u8,
    pub delay_ms: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            repeat: 0,
            sample_interval: 10,
            delay_ms: 100,
        }
    }
}

/// Receives save notifications.
///
/// `on_progress`, `on_saved` and `on_failed` run on the encoder thread, not on
/// the thread that requested the save. Implementations must do their own
/// synchronisation.
pub trait SaveListener: Send + Sync {
    fn on_preprocessing_done(&self) {}

    /// `progress` is the fraction of frames fully written, in `(0, 1]`.
    fn on_progress(&self, worker_id: u64, progress: f32) {
        let _ = (worker_id, progress);
    }

    fn on_saved(&self, worker_id: u64, path: &Path) {
        let _ = (worker_id, path);
    }

    fn on_failed(&self, worker_id: u64, error: &Error) {
        let _ = (worker_id, error);
    }
}

impl SaveListener for () {}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveEvent {
    PreProcessingDone,
    Progress { worker_id: u64, progress: f32 },
    Saved { worker_id: u64, path: PathBuf },
    Failed { worker_id: u64, message: String },
}

/// Forwards notifications to a channel the host drains on its own thread.
impl SaveListener for Sender<SaveEvent> {
    fn on_preprocessing_done(&self) {
        let _ = self.send(SaveEvent::PreProcessingDone);
    }

    fn on_progress(&self, worker_id: u64, progress: f32) {
        let _ = self.send(SaveEvent::Progress { worker_id, progress });
    }

    fn on_saved(&self, worker_id: u64, path: &Path) {
        let _ = self.send(SaveEvent::Saved {
            worker_id,
            path: path.to_path_buf(),
        });
    }

    fn on_failed(&self, worker_id: u64, error: &Error) {
        let _ = self.send(SaveEvent::Failed {
            worker_id,
            message: error.to_string(),
        });
    }
}

/// Encodes one frame sequence into one GIF file.
pub struct EncodeWorker {
    id: u64,
    frames: Vec<RgbFrame>,
    path: PathBuf,
    settings: EncoderSettings,
    listener: Arc<dyn SaveListener>,
}

impl EncodeWorker {
    pub fn new(
        frames: Vec<RgbFrame>,
        path: impl Into<PathBuf>,
        settings: EncoderSettings,
        listener: Arc<dyn SaveListener>,
    ) -> Result<Self> {
        let path = path.into();
        if frames.is_empty() {
            return Err(Error::invalid_argument("no frames to encode"));
        }
        if path.as_os_str().is_empty() {
            return Err(Error::invalid_argument("output path is empty"));
        }
        Ok(Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            frames,
            path,
            settings,
            listener,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs the encode on the current thread.
    ///
    /// On failure the output file may be left truncated.
    pub fn run(self) -> Result<PathBuf> {
        let id = self.id;
        let listener = Arc::clone(&self.listener);
        let result = self.encode();
        if let Err(e) = &result {
            error!(worker = id, "GIF encoding failed: {}", e);
            listener.on_failed(id, e);
        }
        result
    }

    /// Runs the encode on a new thread.
    ///
    /// A thread that cannot be created is reported through `on_failed` like
    /// any other encode failure.
    pub fn spawn(self) -> Result<WorkerHandle> {
        let id = self.id;
        let path = self.path.clone();
        let listener = Arc::clone(&self.listener);
        match thread::Builder::new()
            .name(format!("gif-encoder-{}", id))
            .spawn(move || self.run())
        {
            Ok(handle) => Ok(WorkerHandle { id, path, handle }),
            Err(e) => {
                let e = Error::Io(e);
                error!(worker = id, "failed to start encoder thread: {}", e);
                listener.on_failed(id, &e);
                Err(e)
            }
        }
    }

    fn encode(self) -> Result<PathBuf> {
        let EncodeWorker {
            id,
            frames,
            path,
            settings,
            listener,
        } = self;

        let started = Instant::now();
        let total = frames.len();
        info!(worker = id, frames = total, path = %path.display(), "encoding GIF");

        let file = File::create(&path)?;
        let mut writer = GifWriter::new(Repeat::from_count(settings.repeat), settings.delay_ms);
        writer.start(BufWriter::new(file))?;

        for (i, frame) in frames.into_iter().enumerate() {
            let indexed = index_frame(frame, settings.sample_interval);
            writer.add_frame(&indexed)?;
            debug!(worker = id, frame = i, colors = indexed.palette.len(), "frame encoded");
            listener.on_progress(id, (i + 1) as f32 / total as f32);
        }

        let out = writer.finish()?;
        out.into_inner().map_err(|e| e.into_error())?;

        info!(
            worker = id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            path = %path.display(),
            "GIF saved"
        );
        listener.on_saved(id, &path);
        Ok(path)
    }
}

fn index_frame(frame: RgbFrame, sample_interval: u8) -> IndexedFrame {
    let (palette, indices) = quantize(&frame.pixels, sample_interval);
    IndexedFrame {
        width: frame.width,
        height: frame.height,
        indices,
        palette,
    }
}

/// A running encode.
pub struct WorkerHandle {
    id: u64,
    path: PathBuf,
    handle: JoinHandle<Result<PathBuf>>,
}

impl WorkerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the worker is done.
    pub fn join(self) -> Result<PathBuf> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(Error::Io(io::Error::other("encoder thread panicked"))))
    }
}
