use std::path::PathBuf;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use capgif::capture::{Capture, Frame, PixelLayout, RowOrder};
use capgif::{Config, Recorder, SaveEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Host frame interval the demo pretends to run at.
const HOST_TICK: Duration = Duration::from_millis(16);

/// Renders a moving gradient, standing in for a game or app render loop.
struct Gradient {
    width: u32,
    height: u32,
    tick: u32,
}

impl Capture for Gradient {
    fn capture(&mut self, mut storage: Vec<u8>) -> capgif::Result<Frame> {
        self.tick = self.tick.wrapping_add(1);
        storage.clear();
        storage.reserve(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                let r = ((x + self.tick * 4) * 255 / self.width.max(1)) as u8;
                let g = (y * 255 / self.height.max(1)) as u8;
                let b = (self.tick * 8) as u8;
                storage.extend_from_slice(&[r, g, b, 255]);
            }
        }
        Frame::new(self.width, self.height, PixelLayout::Rgba8, RowOrder::TopDown, storage)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load().unwrap_or_default();
    let path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => {
            config.ensure_output_dir()?;
            config.output_path()
        }
    };

    let mut recorder_config = config.recorder.clone();
    recorder_config.apply_aspect(16.0 / 9.0);

    let (tx, rx) = channel();
    let mut recorder = Recorder::new(recorder_config.clone(), Arc::new(tx))?;
    let mut source = Gradient {
        width: recorder_config.width,
        height: recorder_config.height,
        tick: 0,
    };

    info!(
        capacity = recorder.buffer().capacity(),
        memory_mb = recorder.estimated_memory_mb(),
        "recording"
    );
    recorder.record()?;

    // Run the host loop for one buffer length plus a second.
    let run_ms = (recorder_config.buffer_seconds + 1.0) * 1000.0;
    let ticks = (run_ms / HOST_TICK.as_millis() as f32) as u32;
    for _ in 0..ticks {
        if recorder.advance(HOST_TICK) {
            recorder.capture_from(&mut source)?;
        }
    }

    let job = recorder
        .save(&path)
        .with_context(|| format!("failed to save {}", path.display()))?;
    let handle = job.run().await?;
    let saved = handle.join()?;

    for event in rx.try_iter() {
        match event {
            SaveEvent::PreProcessingDone => println!("pre-processing done"),
            SaveEvent::Progress { worker_id, progress } => {
                println!("worker {}: {:.0}%", worker_id, progress * 100.0)
            }
            SaveEvent::Saved { path, .. } => println!("saved {}", path.display()),
            SaveEvent::Failed { message, .. } => eprintln!("failed: {}", message),
        }
    }
    info!(path = %saved.display(), "done");
    Ok(())
}
