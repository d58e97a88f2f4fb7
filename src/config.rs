//! Front end settings, read from an optional [ron] file. Every field has a
//! default, so an empty file (`()`) is a valid configuration.

use crate::connection::ConnectionOptions;
use crate::experiment_interactor::DEFAULT_INTERPOLATION_POINTS;
use crate::frame_codec::MAX_PAYLOAD;

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, fs, path::Path, time::Duration};

/// Tunables of the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Samples kept per data point.
    pub interpolation_points: usize,
    /// Render tick, in milliseconds.
    pub refresh_ms: u64,
    /// TCP connect timeout, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Read timeout of the receive thread, in milliseconds.
    pub read_timeout_ms: u64,
    /// Longest a single send may block, in milliseconds.
    pub write_timeout_ms: u64,
    /// Largest frame payload accepted.
    pub max_payload: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            interpolation_points: DEFAULT_INTERPOLATION_POINTS,
            refresh_ms: 100,
            connect_timeout_ms: 2000,
            read_timeout_ms: 50,
            write_timeout_ms: 1000,
            max_payload: MAX_PAYLOAD,
        }
    }
}

/// Errors loading a [`BenchConfig`].
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    IoError(std::io::Error),
    /// The file is not valid.
    RonSpannedError(ron::de::SpannedError),
    /// A value is out of range.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ConfigError::IoError(e) => Cow::from(format!("io error: {}", e)),
            ConfigError::RonSpannedError(e) => Cow::from(format!("malformed config: {}", e)),
            ConfigError::Invalid(what) => Cow::from(format!("invalid config: {}", what)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

impl BenchConfig {
    /// Reads and validates a config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        text.parse()
    }

    /// Rejects values the rest of the crate cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interpolation_points < 2 {
            return Err(ConfigError::Invalid("interpolation_points must be at least 2"));
        }
        if self.refresh_ms == 0 {
            return Err(ConfigError::Invalid("refresh_ms must be positive"));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("read_timeout_ms must be positive"));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid("write_timeout_ms must be positive"));
        }
        if self.max_payload == 0 || self.max_payload > MAX_PAYLOAD {
            return Err(ConfigError::Invalid("max_payload must be between 1 and 255"));
        }
        Ok(())
    }

    /// Render tick.
    pub fn refresh(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }

    /// Options for [`crate::connection::Connection::with_options`].
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            max_payload: self.max_payload,
        }
    }
}

impl std::str::FromStr for BenchConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: BenchConfig = ron::from_str(s).map_err(ConfigError::RonSpannedError)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!("()".parse::<BenchConfig>().unwrap(), BenchConfig::default());
    }

    #[test]
    fn partial_override() {
        let config: BenchConfig = "(refresh_ms: 40, interpolation_points: 500)".parse().unwrap();
        assert_eq!(config.refresh(), Duration::from_millis(40));
        assert_eq!(config.interpolation_points, 500);
        assert_eq!(config.connection_options().read_timeout, Duration::from_millis(50));
        assert_eq!(config.connection_options().write_timeout, Duration::from_secs(1));
    }

    #[test]
    fn out_of_range_values() {
        assert!(matches!(
            "(interpolation_points: 1)".parse::<BenchConfig>(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            "(max_payload: 300)".parse::<BenchConfig>(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            "(write_timeout_ms: 0)".parse::<BenchConfig>(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(connect_timeout_ms: 250)").unwrap();
        let config = BenchConfig::from_path(file.path()).unwrap();
        assert_eq!(config.connection_options().connect_timeout, Duration::from_millis(250));
    }
}
