pub mod capture;
pub mod error;
pub mod pipeline;

use std::path::Path;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{Capture, CaptureBridge, CaptureSession, FrameBuffer, ReadOutcome};
pub use error::{BridgeError, CaptureError, ConfigError, SessionError};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix for environment overrides, e.g. `FRAMEBRIDGE_BRIDGE__BUDGET_BYTES`
pub const ENV_PREFIX: &str = "FRAMEBRIDGE";

/// Default real-time buffer budget: room for about 3 MB of pending frames
pub const DEFAULT_BUDGET_BYTES: u64 = 3_041_280;

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Synthetic,
    V4l2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Synthetic frame size; defaults to one YUYV frame of `width` x `height`
    pub frame_bytes: Option<usize>,
    pub fourcc: String,
    pub buffer_count: u32,
    /// Synthetic source stops after this many frames
    pub max_frames: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub budget_bytes: u64,
    pub nonblocking: bool,
    pub read_timeout_ms: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 30,
            frame_bytes: None,
            fourcc: "YUYV".into(),
            buffer_count: 4,
            max_frames: None,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
            nonblocking: false,
            read_timeout_ms: None,
        }
    }
}

impl CaptureConfig {
    pub fn frame_size(&self) -> usize {
        self.frame_bytes
            .unwrap_or(self.width as usize * self.height as usize * 2)
    }

    /// Requested time between frames, `1_000_000 / fps` microseconds
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.fps.max(1)))
    }
}

impl BridgeConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `FRAMEBRIDGE_*` environment
    /// variables, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.budget_bytes == 0 {
            return Err(ConfigError::Invalid(
                "bridge.budget_bytes must be positive".into(),
            ));
        }
        if self.capture.fps == 0 {
            return Err(ConfigError::Invalid("capture.fps must be positive".into()));
        }
        if self.capture.frame_size() == 0 {
            return Err(ConfigError::Invalid(
                "capture frame size must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.capture.frame_size(), 640 * 480 * 2);
        assert_eq!(config.capture.frame_interval(), Duration::from_micros(33_333));
        assert_eq!(config.bridge.read_timeout(), None);
    }

    #[test]
    fn loads_toml_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[capture]\nfps = 60\nframe_bytes = 1024\nmax_frames = 10\n\n[bridge]\nbudget_bytes = 4096\nread_timeout_ms = 250\n"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.fps, 60);
        assert_eq!(config.capture.frame_size(), 1024);
        assert_eq!(config.capture.max_frames, Some(10));
        assert_eq!(config.capture.source, SourceKind::Synthetic);
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.bridge.budget_bytes, 4096);
        assert_eq!(config.bridge.read_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_budget_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[bridge]\nbudget_bytes = 0\n").unwrap();
        assert!(matches!(
            Config::load(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = Path::new("/nonexistent/framebridge.toml");
        assert!(matches!(Config::load(Some(path)), Err(ConfigError::Load(_))));
    }

    #[test]
    fn zero_fps_is_rejected() {
        let mut config = Config::default();
        config.capture.fps = 0;
        assert!(config.validate().is_err());
    }
}
