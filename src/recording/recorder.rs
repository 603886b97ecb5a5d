use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::capture::{Capture, Frame, RgbFrame};
use crate::config::RecorderConfig;
use crate::error::{Error, Result};

use super::buffer::FrameBuffer;
use super::worker::{EncodeWorker, EncoderSettings, SaveListener, WorkerHandle};
use super::RecordingState;

/// Rolling capture of the last few seconds, saved to GIF on request.
///
/// All methods are meant to be called from the producer's thread. Encoding
/// happens on a separate thread per save.
pub struct Recorder {
    config: RecorderConfig,
    buffer: FrameBuffer,
    state: Arc<Mutex<RecordingState>>,
    listener: Arc<dyn SaveListener>,
    elapsed: Duration,
}

impl Recorder {
    pub fn new(config: RecorderConfig, listener: Arc<dyn SaveListener>) -> Result<Self> {
        config.validate()?;
        let buffer = FrameBuffer::new(config.capacity());
        info!(
            width = config.width,
            height = config.height,
            fps = config.fps,
            capacity = buffer.capacity(),
            "recorder ready"
        );
        Ok(Self {
            config,
            buffer,
            state: Arc::new(Mutex::new(RecordingState::Paused)),
            listener,
            elapsed: Duration::ZERO,
        })
    }

    pub fn state(&self) -> RecordingState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn frame_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn estimated_memory_mb(&self) -> f32 {
        self.config.estimated_memory_mb()
    }

    pub fn record(&mut self) -> Result<()> {
        self.set_state(RecordingState::Recording)
    }

    pub fn pause(&mut self) -> Result<()> {
        self.set_state(RecordingState::Paused)
    }

    /// Replaces the settings. Buffered frames are discarded.
    pub fn reconfigure(&mut self, config: RecorderConfig) -> Result<()> {
        self.ensure_not_preprocessing()?;
        config.validate()?;
        self.buffer.resize(config.capacity());
        self.config = config;
        self.elapsed = Duration::ZERO;
        debug!(capacity = self.buffer.capacity(), "recorder reconfigured");
        Ok(())
    }

    /// Feeds host time. Returns true when a frame is due.
    ///
    /// At most one frame is due per call; backlog beyond that is dropped.
    pub fn advance(&mut self, delta: Duration) -> bool {
        if self.state() != RecordingState::Recording {
            return false;
        }
        let per_frame = self.config.time_per_frame();
        self.elapsed += delta;
        if self.elapsed < per_frame {
            return false;
        }
        let rest = self.elapsed.as_nanos() % per_frame.as_nanos().max(1);
        self.elapsed = Duration::from_nanos(rest as u64);
        true
    }

    /// Stores a frame. Returns false when not recording.
    pub fn capture(&mut self, frame: Frame) -> Result<bool> {
        if self.state() != RecordingState::Recording {
            return Ok(false);
        }
        if frame.width() != self.config.width || frame.height() != self.config.height {
            return Err(Error::invalid_argument(format!(
                "frame is {}x{}, recorder expects {}x{}",
                frame.width(),
                frame.height(),
                self.config.width,
                self.config.height
            )));
        }
        self.buffer.push(frame);
        Ok(true)
    }

    /// Lets `source` render into recycled storage and stores the result.
    pub fn capture_from<C: Capture + ?Sized>(&mut self, source: &mut C) -> Result<bool> {
        if self.state() != RecordingState::Recording {
            return Ok(false);
        }
        let storage = self.buffer.take_recycled().unwrap_or_default();
        let frame = source.capture(storage)?;
        self.capture(frame)
    }

    /// Hands the buffered frames to a save job and clears the buffer.
    ///
    /// The recorder stays in `PreProcessing` until the job has run or been
    /// dropped.
    pub fn save(&mut self, path: impl Into<PathBuf>) -> Result<SaveJob> {
        let path = path.into();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == RecordingState::PreProcessing {
                warn!("save requested while a previous save is still pre-processing");
                return Err(Error::InvalidState("pre-processing"));
            }
            if path.as_os_str().is_empty() {
                return Err(Error::invalid_argument("output path is empty"));
            }
            if self.buffer.is_empty() {
                warn!("nothing to save, the frame buffer is empty");
                return Err(Error::EmptyBuffer);
            }
            *state = RecordingState::PreProcessing;
        }

        let frames = self.buffer.drain();
        info!(frames = frames.len(), path = %path.display(), "save requested");
        Ok(SaveJob {
            frames,
            path,
            settings: self.config.encoder_settings(),
            listener: Arc::clone(&self.listener),
            state: Arc::clone(&self.state),
        })
    }

    /// Discards buffered frames and recycled storage.
    pub fn flush(&mut self) {
        self.buffer.flush();
        self.elapsed = Duration::ZERO;
    }

    fn set_state(&mut self, next: RecordingState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == RecordingState::PreProcessing {
            return Err(Error::InvalidState("pre-processing"));
        }
        *state = next;
        Ok(())
    }

    fn ensure_not_preprocessing(&self) -> Result<()> {
        if self.state() == RecordingState::PreProcessing {
            return Err(Error::InvalidState("pre-processing"));
        }
        Ok(())
    }
}

/// Frames taken out of the recorder, waiting to be converted and encoded.
pub struct SaveJob {
    frames: Vec<Frame>,
    path: PathBuf,
    settings: EncoderSettings,
    listener: Arc<dyn SaveListener>,
    state: Arc<Mutex<RecordingState>>,
}

impl SaveJob {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> EncoderSettings {
        self.settings
    }

    /// Converts the frames, yielding to the runtime between frames, then
    /// starts the encoder thread.
    pub async fn run(mut self) -> Result<WorkerHandle> {
        let frames = std::mem::take(&mut self.frames);
        let mut converted = Vec::with_capacity(frames.len());
        for frame in frames {
            converted.push(frame.into_rgb());
            tokio::task::yield_now().await;
        }
        self.dispatch(converted)
    }

    /// Same as [`SaveJob::run`] for hosts without an async runtime.
    pub fn run_blocking(mut self) -> Result<WorkerHandle> {
        let converted = std::mem::take(&mut self.frames)
            .into_iter()
            .map(Frame::into_rgb)
            .collect();
        self.dispatch(converted)
    }

    fn dispatch(&mut self, frames: Vec<RgbFrame>) -> Result<WorkerHandle> {
        self.release();
        let worker = EncodeWorker::new(
            frames,
            std::mem::take(&mut self.path),
            self.settings,
            Arc::clone(&self.listener),
        )?;

        debug!(worker = worker.id(), "pre-processing done");
        self.listener.on_preprocessing_done();
        worker.spawn()
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == RecordingState::PreProcessing {
            *state = RecordingState::Paused;
        }
    }
}

impl Drop for SaveJob {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PixelLayout, RowOrder};
    use crate::config::{MAX_BUFFER_FRAMES, MAX_BUFFER_SECONDS};
    use crate::recording::SaveEvent;
    use std::sync::mpsc::channel;

    fn config() -> RecorderConfig {
        let mut config = RecorderConfig::default();
        config.auto_aspect = false;
        config.set_width(8);
        config.set_height(8);
        config.set_fps(10);
        config.set_buffer_seconds(0.5).unwrap();
        config
    }

    fn frame(shade: u8) -> Frame {
        let data = [shade, 0, 0, 255].repeat(64);
        Frame::new(8, 8, PixelLayout::Rgba8, RowOrder::TopDown, data).unwrap()
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("capgif-recorder-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    struct Shades(u8);

    impl Capture for Shades {
        fn capture(&mut self, mut storage: Vec<u8>) -> Result<Frame> {
            self.0 = self.0.wrapping_add(1);
            storage.clear();
            for _ in 0..64 {
                storage.extend_from_slice(&[self.0, 0, 0, 255]);
            }
            Frame::new(8, 8, PixelLayout::Rgba8, RowOrder::TopDown, storage)
        }
    }

    #[test]
    fn test_starts_paused_and_ignores_frames() {
        let mut recorder = Recorder::new(config(), Arc::new(())).unwrap();
        assert_eq!(recorder.state(), RecordingState::Paused);
        assert!(!recorder.capture(frame(1)).unwrap());
        assert!(!recorder.advance(Duration::from_secs(1)));
        assert_eq!(recorder.frame_count(), 0);
    }

    #[test]
    fn test_buffer_keeps_last_capacity_frames() {
        let mut recorder = Recorder::new(config(), Arc::new(())).unwrap();
        recorder.record().unwrap();
        for shade in 0..12 {
            assert!(recorder.capture(frame(shade)).unwrap());
        }
        assert_eq!(recorder.buffer().capacity(), 5);
        let shades: Vec<u8> = recorder.buffer().iter().map(|f| f.data()[0]).collect();
        assert_eq!(shades, vec![7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_long_buffer_is_bounded() {
        let mut config = config();
        config.set_fps(30);
        config.buffer_seconds = 1.0e9;
        assert!(matches!(
            Recorder::new(config.clone(), Arc::new(())),
            Err(Error::InvalidArgument(_))
        ));

        config.set_buffer_seconds(MAX_BUFFER_SECONDS).unwrap();
        let mut recorder = Recorder::new(config, Arc::new(())).unwrap();
        assert_eq!(recorder.buffer().capacity(), MAX_BUFFER_FRAMES);
        recorder.record().unwrap();
        recorder.capture(frame(1)).unwrap();
        assert_eq!(recorder.frame_count(), 1);
    }

    #[test]
    fn test_rejects_wrong_frame_size() {
        let mut recorder = Recorder::new(config(), Arc::new(())).unwrap();
        recorder.record().unwrap();
        let small = Frame::new(4, 4, PixelLayout::Rgb8, RowOrder::TopDown, vec![0; 48]).unwrap();
        assert!(matches!(recorder.capture(small), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_advance_paces_frames() {
        let mut recorder = Recorder::new(config(), Arc::new(())).unwrap();
        recorder.record().unwrap();
        assert!(!recorder.advance(Duration::from_millis(60)));
        assert!(recorder.advance(Duration::from_millis(60)));
        // 20 ms carried over
        assert!(!recorder.advance(Duration::from_millis(60)));
        assert!(recorder.advance(Duration::from_millis(30)));
        // a long stall yields a single frame
        assert!(recorder.advance(Duration::from_secs(2)));
        assert!(!recorder.advance(Duration::from_millis(10)));
    }

    #[test]
    fn test_capture_from_reuses_storage() {
        let mut recorder = Recorder::new(config(), Arc::new(())).unwrap();
        recorder.record().unwrap();
        let mut source = Shades(0);
        for _ in 0..5 {
            recorder.capture_from(&mut source).unwrap();
        }
        assert!(!recorder.buffer().has_recycled());

        recorder.capture_from(&mut source).unwrap();
        assert!(recorder.buffer().has_recycled());
        recorder.capture_from(&mut source).unwrap();
        assert_eq!(recorder.frame_count(), 5);
        assert_eq!(recorder.buffer().stats().dropped, 2);
    }

    #[test]
    fn test_save_guards() {
        let mut recorder = Recorder::new(config(), Arc::new(())).unwrap();
        assert!(matches!(recorder.save(scratch("empty.gif")), Err(Error::EmptyBuffer)));
        assert!(!scratch("empty.gif").exists());

        recorder.record().unwrap();
        recorder.capture(frame(3)).unwrap();
        assert!(matches!(recorder.save(""), Err(Error::InvalidArgument(_))));
        assert_eq!(recorder.frame_count(), 1);

        let job = recorder.save(scratch("guarded.gif")).unwrap();
        assert_eq!(job.frame_count(), 1);
        assert_eq!(recorder.frame_count(), 0);
        assert_eq!(recorder.state(), RecordingState::PreProcessing);

        assert!(matches!(recorder.save(scratch("other.gif")), Err(Error::InvalidState(_))));
        assert!(matches!(recorder.record(), Err(Error::InvalidState(_))));
        assert!(matches!(recorder.pause(), Err(Error::InvalidState(_))));
        assert!(matches!(recorder.reconfigure(config()), Err(Error::InvalidState(_))));
        assert!(!recorder.capture(frame(4)).unwrap());

        drop(job);
        assert_eq!(recorder.state(), RecordingState::Paused);
        recorder.record().unwrap();
    }

    #[test]
    fn test_reconfigure_discards_frames() {
        let mut recorder = Recorder::new(config(), Arc::new(())).unwrap();
        recorder.record().unwrap();
        recorder.capture(frame(1)).unwrap();

        let mut next = config();
        next.set_fps(20);
        recorder.reconfigure(next).unwrap();
        assert_eq!(recorder.frame_count(), 0);
        assert_eq!(recorder.buffer().capacity(), 10);
        assert_eq!(recorder.state(), RecordingState::Recording);
    }

    #[tokio::test]
    async fn test_save_job_runs_worker() {
        let (tx, rx) = channel();
        let mut recorder = Recorder::new(config(), Arc::new(tx)).unwrap();
        recorder.record().unwrap();
        for shade in [10, 20, 30] {
            recorder.capture(frame(shade)).unwrap();
        }

        let path = scratch("job.gif");
        let handle = recorder.save(&path).unwrap().run().await.unwrap();
        assert_eq!(recorder.state(), RecordingState::Paused);
        assert_eq!(rx.recv().unwrap(), SaveEvent::PreProcessingDone);

        let id = handle.id();
        assert_eq!(handle.join().unwrap(), path);
        let events: Vec<SaveEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events.last(), Some(&SaveEvent::Saved { worker_id: id, path: path.clone() }));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_no_preprocessing_event_without_worker() {
        let (tx, rx) = channel();
        let state = Arc::new(Mutex::new(RecordingState::PreProcessing));
        let job = SaveJob {
            frames: vec![frame(1)],
            path: PathBuf::new(),
            settings: EncoderSettings::default(),
            listener: Arc::new(tx),
            state: Arc::clone(&state),
        };
        assert!(matches!(job.run_blocking(), Err(Error::InvalidArgument(_))));
        assert!(rx.try_recv().is_err());
        assert_eq!(*state.lock().unwrap(), RecordingState::Paused);
    }

    #[test]
    fn test_run_blocking() {
        let mut recorder = Recorder::new(config(), Arc::new(())).unwrap();
        recorder.record().unwrap();
        recorder.capture(frame(99)).unwrap();
        let path = scratch("blocking.gif");
        let handle = recorder.save(&path).unwrap().run_blocking().unwrap();
        assert_eq!(recorder.state(), RecordingState::Paused);
        assert_eq!(handle.join().unwrap(), path);
    }
}
