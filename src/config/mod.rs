use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::Error;
use crate::recording::EncoderSettings;

pub const MIN_DIMENSION: u32 = 8;
pub const MAX_DIMENSION: u32 = u16::MAX as u32;
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 30;
pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;
pub const MIN_REPEAT: i32 = -1;
pub const MAX_BUFFER_SECONDS: f32 = 600.0;
/// Ten minutes at the highest frame rate.
pub const MAX_BUFFER_FRAMES: usize = 18_000;
const MAX_FILENAME_TEMPLATE_LEN: usize = 128;
const DEFAULT_FILENAME_TEMPLATE: &str = "gifcapture_%Y%m%d_%H%M%S_%3f";
const MAX_FILENAME_LEN: usize = 200;
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Recording and encoding parameters.
///
/// Fields are public for serde; hosts changing values at runtime should go
/// through the setters, which clamp to the supported ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecorderConfig {
    pub width: u32,
    pub height: u32,
    /// Derive `height` from the host's aspect ratio, see `apply_aspect`.
    #[serde(default)]
    pub auto_aspect: bool,
    pub fps: u32,
    /// Quantizer sample interval: 1 is best quality, 100 is fastest.
    pub quality: u8,
    pub buffer_seconds: f32,
    /// -1 plays once, 0 loops forever, n loops n times.
    pub repeat: i32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 200,
            auto_aspect: true,
            fps: 15,
            quality: 15,
            buffer_seconds: 3.0,
            repeat: 0,
        }
    }
}

impl RecorderConfig {
    pub fn new(
        width: u32,
        height: u32,
        fps: u32,
        quality: u8,
        buffer_seconds: f32,
        repeat: i32,
    ) -> Result<Self, Error> {
        let config = Self {
            width,
            height,
            auto_aspect: false,
            fps,
            quality,
            buffer_seconds,
            repeat,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn set_width(&mut self, width: u32) {
        self.width = width.clamp(MIN_DIMENSION, MAX_DIMENSION);
    }

    pub fn set_height(&mut self, height: u32) {
        self.height = height.clamp(MIN_DIMENSION, MAX_DIMENSION);
    }

    pub fn set_fps(&mut self, fps: u32) {
        self.fps = fps.clamp(MIN_FPS, MAX_FPS);
    }

    pub fn set_quality(&mut self, quality: u8) {
        self.quality = quality.clamp(MIN_QUALITY, MAX_QUALITY);
    }

    pub fn set_repeat(&mut self, repeat: i32) {
        self.repeat = repeat.max(MIN_REPEAT);
    }

    pub fn set_buffer_seconds(&mut self, seconds: f32) -> Result<(), Error> {
        if !seconds.is_finite() || seconds <= 0.0 || seconds > MAX_BUFFER_SECONDS {
            return Err(Error::invalid_argument(format!(
                "buffer_seconds must be in (0, {}], got {}",
                MAX_BUFFER_SECONDS, seconds
            )));
        }
        self.buffer_seconds = seconds;
        Ok(())
    }

    /// Recomputes `height` from `aspect` (width / height) when auto aspect is on.
    pub fn apply_aspect(&mut self, aspect: f32) {
        if self.auto_aspect && aspect.is_finite() && aspect > 0.0 {
            let height = (self.width as f32 / aspect).round() as u32;
            self.set_height(height);
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.width < MIN_DIMENSION || self.width > MAX_DIMENSION {
            return Err(Error::invalid_argument(format!(
                "width must be between {} and {}",
                MIN_DIMENSION, MAX_DIMENSION
            )));
        }
        if self.height < MIN_DIMENSION || self.height > MAX_DIMENSION {
            return Err(Error::invalid_argument(format!(
                "height must be between {} and {}",
                MIN_DIMENSION, MAX_DIMENSION
            )));
        }
        if self.fps < MIN_FPS || self.fps > MAX_FPS {
            return Err(Error::invalid_argument(format!(
                "fps must be between {} and {}",
                MIN_FPS, MAX_FPS
            )));
        }
        if self.quality < MIN_QUALITY || self.quality > MAX_QUALITY {
            return Err(Error::invalid_argument(format!(
                "quality must be between {} and {}",
                MIN_QUALITY, MAX_QUALITY
            )));
        }
        if !self.buffer_seconds.is_finite()
            || self.buffer_seconds <= 0.0
            || self.buffer_seconds > MAX_BUFFER_SECONDS
        {
            return Err(Error::invalid_argument(format!(
                "buffer_seconds must be in (0, {}]",
                MAX_BUFFER_SECONDS
            )));
        }
        if self.repeat < MIN_REPEAT {
            return Err(Error::invalid_argument("repeat must be -1 or greater"));
        }
        Ok(())
    }

    fn sanitize(&mut self) {
        self.set_width(self.width);
        self.set_height(self.height);
        self.set_fps(self.fps);
        self.set_quality(self.quality);
        self.set_repeat(self.repeat);
        if !self.buffer_seconds.is_finite() || self.buffer_seconds <= 0.0 {
            self.buffer_seconds = RecorderConfig::default().buffer_seconds;
        }
        self.buffer_seconds = self.buffer_seconds.min(MAX_BUFFER_SECONDS);
    }

    /// Number of frames kept in the rolling buffer.
    pub fn capacity(&self) -> usize {
        ((self.buffer_seconds * self.fps as f32).round() as usize).clamp(1, MAX_BUFFER_FRAMES)
    }

    pub fn time_per_frame(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(MIN_FPS) as f64)
    }

    pub fn frame_delay_ms(&self) -> u32 {
        (1000.0 / self.fps.max(MIN_FPS) as f64).round() as u32
    }

    /// Rough size of a full buffer of RGBA frames.
    pub fn estimated_memory_mb(&self) -> f32 {
        let bytes = self.capacity() as f64 * self.width as f64 * self.height as f64 * 4.0;
        (bytes / (1024.0 * 1024.0)) as f32
    }

    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            repeat: self.repeat,
            sample_interval: self.quality,
            delay_ms: self.frame_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub filename_template: String,
}

impl Default for OutputConfig {
    /// `<pictures>/capgif`, falling back to the home directory.
    fn default() -> Self {
        let base = directories::UserDirs::new()
            .and_then(|dirs| dirs.picture_dir().map(Path::to_path_buf))
            .or_else(|| directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            directory: base.join("capgif"),
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
        }
    }
}

impl OutputConfig {
    fn template_is_safe(&self) -> bool {
        let template = &self.filename_template;
        template.len() <= MAX_FILENAME_TEMPLATE_LEN
            && !template.contains(['/', '\\'])
            && !template.contains("..")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recorder: RecorderConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "capgif", "capgif").map(|p| p.config_dir().to_path_buf())
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<()> {
        self.recorder.validate()?;
        if !self.output.template_is_safe() {
            return Err(anyhow!(
                "filename_template must be at most {} characters without path separators",
                MAX_FILENAME_TEMPLATE_LEN
            ));
        }
        Ok(())
    }

    fn sanitize(&mut self) {
        self.recorder.sanitize();
        if !self.output.template_is_safe() {
            self.output.filename_template = DEFAULT_FILENAME_TEMPLATE.to_string();
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    /// Loads the user config, or defaults when there is none yet.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or_else(|| anyhow!("no config directory available"))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn ensure_output_dir(&self) -> Result<()> {
        let dir = &self.output.directory;
        if dir.as_os_str().is_empty() {
            return Err(anyhow!("Output directory path is empty"));
        }
        if dir.to_string_lossy().contains("..") {
            return Err(anyhow!("Output directory contains path traversal"));
        }
        fs::create_dir_all(dir)?;
        Ok(())
    }

    pub fn generate_filename(&self) -> String {
        self.filename_at(chrono::Local::now())
    }

    /// Expands the template for `time`, keeping only `[A-Za-z0-9_-]`.
    fn filename_at(&self, time: DateTime<Local>) -> String {
        let mut name: String = time
            .format(&self.output.filename_template)
            .to_string()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
            .take(MAX_FILENAME_LEN)
            .collect();
        if name.is_empty() {
            name = format!("gifcapture_{}", time.timestamp());
        }
        name + ".gif"
    }

    pub fn output_path(&self) -> PathBuf {
        self.output.directory.join(self.generate_filename())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recorder.capacity(), 45);
    }

    #[test]
    fn test_setters_clamp() {
        let mut config = RecorderConfig::default();
        config.set_width(2);
        config.set_fps(120);
        config.set_quality(0);
        config.set_repeat(-7);
        assert_eq!(config.width, MIN_DIMENSION);
        assert_eq!(config.fps, MAX_FPS);
        assert_eq!(config.quality, MIN_QUALITY);
        assert_eq!(config.repeat, -1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_buffer_seconds_rejects_non_positive() {
        let mut config = RecorderConfig::default();
        assert!(config.set_buffer_seconds(0.0).is_err());
        assert!(config.set_buffer_seconds(f32::NAN).is_err());
        assert!(config.set_buffer_seconds(-1.0).is_err());
        assert!(config.set_buffer_seconds(1.0e9).is_err());
        assert_eq!(config.buffer_seconds, 3.0);
        assert!(config.set_buffer_seconds(0.5).is_ok());
        assert_eq!(config.capacity(), 8);
    }

    #[test]
    fn test_new_validates() {
        assert!(RecorderConfig::new(16, 16, 10, 10, 1.0, 0).is_ok());
        assert!(matches!(
            RecorderConfig::new(4, 16, 10, 10, 1.0, 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(RecorderConfig::new(16, 16, 31, 10, 1.0, 0).is_err());
        assert!(RecorderConfig::new(16, 16, 10, 101, 1.0, 0).is_err());
        assert!(RecorderConfig::new(16, 16, 10, 10, 0.0, 0).is_err());
        assert!(RecorderConfig::new(16, 16, 10, 10, 1.0, -2).is_err());
        assert!(RecorderConfig::new(16, 16, 30, 10, 1.0e9, 0).is_err());
        assert!(RecorderConfig::new(16, 16, 30, 10, MAX_BUFFER_SECONDS, 0).is_ok());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let mut config = RecorderConfig::new(16, 16, 30, 10, MAX_BUFFER_SECONDS, 0).unwrap();
        assert_eq!(config.capacity(), MAX_BUFFER_FRAMES);

        // fields written directly still yield a bounded buffer
        config.buffer_seconds = 1.0e9;
        assert!(config.validate().is_err());
        assert_eq!(config.capacity(), MAX_BUFFER_FRAMES);
    }

    #[test]
    fn test_auto_aspect() {
        let mut config = RecorderConfig::default();
        config.apply_aspect(16.0 / 9.0);
        assert_eq!(config.height, 180);

        config.auto_aspect = false;
        config.apply_aspect(1.0);
        assert_eq!(config.height, 180);
    }

    #[test]
    fn test_capacity_and_delay() {
        let config = RecorderConfig::new(16, 16, 10, 10, 1.04, 0).unwrap();
        assert_eq!(config.capacity(), 10);
        assert_eq!(config.frame_delay_ms(), 100);
        assert_eq!(config.time_per_frame().as_millis(), 100);

        let config = RecorderConfig::new(16, 16, 30, 10, 0.01, 0).unwrap();
        assert_eq!(config.capacity(), 1);
        assert_eq!(config.frame_delay_ms(), 33);
    }

    #[test]
    fn test_estimated_memory() {
        let config = RecorderConfig::new(256, 256, 10, 10, 1.6, 0).unwrap();
        assert!((config.estimated_memory_mb() - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_parse_toml() {
        let content = r#"
[recorder]
width = 640
height = 360
fps = 60
quality = 20
buffer_seconds = 2.5
repeat = 3

[output]
directory = "/tmp/capgif"
filename_template = "../evil"
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.recorder.fps, MAX_FPS);
        assert!(!config.recorder.auto_aspect);
        assert_eq!(config.recorder.repeat, 3);
        assert_eq!(config.output.filename_template, DEFAULT_FILENAME_TEMPLATE);
    }

    #[test]
    fn test_parse_rejects_unknown_fields() {
        let content = r#"
[recorder]
width = 640
height = 360
fps = 10
quality = 20
buffer_seconds = 2.5
repeat = 3
colour = "red"
"#;
        assert!(Config::parse(content).is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let content = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::parse(&content).unwrap();
        assert_eq!(parsed.recorder, config.recorder);
        assert_eq!(parsed.output.directory, config.output.directory);
    }

    #[test]
    fn test_generate_filename() {
        let config = Config::default();
        let name = config.generate_filename();
        assert!(name.starts_with("gifcapture_"));
        assert!(name.ends_with(".gif"));
        assert!(!name.contains('/'));
    }

    #[test]
    fn test_filename_template_expansion() {
        let time = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let mut config = Config::default();
        assert_eq!(config.filename_at(time), "gifcapture_20240309_070501_000.gif");

        config.output.filename_template = "clip %H:%M".to_string();
        assert_eq!(config.filename_at(time), "clip0705.gif");

        config.output.filename_template = "%%".to_string();
        assert_eq!(config.filename_at(time), format!("gifcapture_{}.gif", time.timestamp()));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("capgif-config-{}", std::process::id()));
        let path = dir.join("nested").join(CONFIG_FILE_NAME);
        let _ = fs::remove_dir_all(&dir);

        let mut config = Config::default();
        config.recorder.set_fps(12);
        config.recorder.set_repeat(-1);
        config.output.directory = dir.join("out");
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.recorder, config.recorder);
        assert_eq!(loaded.output.directory, config.output.directory);

        config.output.filename_template = "../escape".to_string();
        assert!(config.save_to(&path).is_err());
        assert_eq!(Config::load_from(&path).unwrap().recorder.fps, 12);

        assert!(Config::load_from(&dir.join("missing.toml")).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
