//! Stream Configuration
//!
//! [`StreamConfig`] is immutable once a stream is constructed. It can be
//! built three ways:
//!
//! - Typed, with the builder methods (`with_high_water_mark`, ...)
//! - Loosely, from a JSON-like options object via [`StreamConfig::from_options`],
//!   where wrong-typed or non-positive fields fall back to defaults
//! - From the environment ([`StreamConfig::from_env`]) or a TOML file
//!   ([`load_config_from_path`])
//!
//! # Example
//!
//! ```
//! use flowstream_core::config::{Encoding, StreamConfig};
//!
//! let config = StreamConfig::new()
//!     .with_high_water_mark(1024)
//!     .with_encoding(Encoding::Base64);
//! assert_eq!(config.high_water_mark, 1024);
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default byte threshold for a single chunk
pub const DEFAULT_HIGH_WATER_MARK: usize = 16_384;

/// Default per-event listener cap
pub const DEFAULT_MAX_LISTENERS: usize = 10;

// ============================================================================
// Encoding
// ============================================================================

/// How pushed payloads are normalized before size measurement and buffering
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    /// Bytes kept as-is; text is stored as its UTF-8 bytes
    #[default]
    RawBytes,
    /// Stored as a UTF-8 string (invalid sequences are replaced)
    Utf8String,
    /// Stored as standard base64 text
    Base64,
    /// Stored as a `u8` array
    Uint8,
    /// Stored as little-endian `u16` units (odd trailing byte is zero-padded)
    Uint16,
}

impl Encoding {
    /// Canonical name of this encoding
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RawBytes => "raw-bytes",
            Self::Utf8String => "utf8-string",
            Self::Base64 => "base64",
            Self::Uint8 => "uint8",
            Self::Uint16 => "uint16",
        }
    }

    /// Parse an encoding name, falling back to [`Encoding::RawBytes`] for
    /// anything unrecognized
    #[must_use]
    pub fn from_name_lossy(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buffer" | "bytes" | "raw" | "raw-bytes" => Ok(Self::RawBytes),
            "string" | "utf8" | "utf-8" | "utf8-string" => Ok(Self::Utf8String),
            "base64" => Ok(Self::Base64),
            // "unit8"/"unit16" are accepted as historical misspellings
            "uint8" | "unit8" => Ok(Self::Uint8),
            "uint16" | "unit16" => Ok(Self::Uint16),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Stream configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamConfig {
    /// Maximum size in bytes of a single admitted chunk
    pub high_water_mark: usize,

    /// Whether closing the stream emits a `close` event
    pub emit_close: bool,

    /// Whether the stream may be destroyed after it closes
    pub auto_destroy: bool,

    /// Payload normalization applied before buffering
    pub encoding: Encoding,

    /// Skip payload type and size validation entirely
    pub object_mode: bool,

    /// Maximum listeners per event kind
    pub max_listeners: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            emit_close: true,
            auto_destroy: true,
            encoding: Encoding::RawBytes,
            object_mode: false,
            max_listeners: DEFAULT_MAX_LISTENERS,
        }
    }
}

impl StreamConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the high-water mark
    #[must_use]
    pub fn with_high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes;
        self
    }

    /// Enable or disable the `close` event
    #[must_use]
    pub fn with_emit_close(mut self, emit_close: bool) -> Self {
        self.emit_close = emit_close;
        self
    }

    /// Enable or disable destroy after close
    #[must_use]
    pub fn with_auto_destroy(mut self, auto_destroy: bool) -> Self {
        self.auto_destroy = auto_destroy;
        self
    }

    /// Set the payload encoding
    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Enable or disable object mode
    #[must_use]
    pub fn with_object_mode(mut self, object_mode: bool) -> Self {
        self.object_mode = object_mode;
        self
    }

    /// Set the per-event listener cap
    #[must_use]
    pub fn with_max_listeners(mut self, max: usize) -> Self {
        self.max_listeners = max;
        self
    }

    /// Configuration for opaque values (no size or type checks)
    #[must_use]
    pub fn object_mode() -> Self {
        Self {
            object_mode: true,
            ..Self::default()
        }
    }

    /// Configuration for text streams
    #[must_use]
    pub fn text() -> Self {
        Self {
            encoding: Encoding::Utf8String,
            ..Self::default()
        }
    }

    /// Replace zero thresholds with their defaults
    ///
    /// A stream never runs with a zero high-water mark or listener cap.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.high_water_mark == 0 {
            tracing::warn!(
                default = DEFAULT_HIGH_WATER_MARK,
                "highWaterMark must be positive, using default"
            );
            self.high_water_mark = DEFAULT_HIGH_WATER_MARK;
        }
        if self.max_listeners == 0 {
            tracing::warn!(
                default = DEFAULT_MAX_LISTENERS,
                "maxListeners must be positive, using default"
            );
            self.max_listeners = DEFAULT_MAX_LISTENERS;
        }
        self
    }

    /// Whether the lifecycle flags contradict each other
    ///
    /// A stream that emits `close` must be allowed to destroy itself.
    #[must_use]
    pub fn has_lifecycle_conflict(&self) -> bool {
        self.emit_close && !self.auto_destroy
    }

    /// Build a configuration from a loosely-typed options object
    ///
    /// Keys may be camelCase (`highWaterMark`) or snake_case
    /// (`high_water_mark`). Any field that is missing, of the wrong type or
    /// non-positive falls back to its default. Unknown encodings fall back to
    /// `raw-bytes`. `null` or a non-object yields the defaults.
    #[must_use]
    pub fn from_options(options: &Value) -> Self {
        let defaults = Self::default();
        let Some(map) = options.as_object() else {
            return defaults;
        };

        let field = |camel: &str, snake: &str| map.get(camel).or_else(|| map.get(snake));

        let positive = |camel: &str, snake: &str, fallback: usize| {
            field(camel, snake)
                .and_then(positive_integer)
                .unwrap_or(fallback)
        };

        let flag = |camel: &str, snake: &str, fallback: bool| {
            field(camel, snake)
                .and_then(Value::as_bool)
                .unwrap_or(fallback)
        };

        let encoding = field("encoding", "encoding")
            .and_then(Value::as_str)
            .map(Encoding::from_name_lossy)
            .unwrap_or_default();

        Self {
            high_water_mark: positive(
                "highWaterMark",
                "high_water_mark",
                defaults.high_water_mark,
            ),
            emit_close: flag("emitClose", "emit_close", defaults.emit_close),
            auto_destroy: flag("autoDestroy", "auto_destroy", defaults.auto_destroy),
            encoding,
            object_mode: flag("objectMode", "object_mode", defaults.object_mode),
            max_listeners: positive("maxListeners", "max_listeners", defaults.max_listeners),
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `FLOWSTREAM_HIGH_WATER_MARK`: Chunk size limit in bytes
    /// - `FLOWSTREAM_EMIT_CLOSE`: "0" or "false" to disable
    /// - `FLOWSTREAM_AUTO_DESTROY`: "0" or "false" to disable
    /// - `FLOWSTREAM_ENCODING`: Encoding name (unknown names mean raw-bytes)
    /// - `FLOWSTREAM_OBJECT_MODE`: "1" or "true" to enable
    /// - `FLOWSTREAM_MAX_LISTENERS`: Per-event listener cap
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a configuration from `FLOWSTREAM_*` variables supplied by `lookup`
    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let enabled = |name: &str, fallback: bool| {
            lookup(name)
                .map(|v| {
                    let v = v.to_lowercase();
                    if fallback {
                        v != "0" && v != "false"
                    } else {
                        v == "1" || v == "true"
                    }
                })
                .unwrap_or(fallback)
        };

        Self {
            high_water_mark: lookup("FLOWSTREAM_HIGH_WATER_MARK")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.high_water_mark),
            emit_close: enabled("FLOWSTREAM_EMIT_CLOSE", defaults.emit_close),
            auto_destroy: enabled("FLOWSTREAM_AUTO_DESTROY", defaults.auto_destroy),
            encoding: lookup("FLOWSTREAM_ENCODING")
                .map(|v| Encoding::from_name_lossy(&v))
                .unwrap_or_default(),
            object_mode: enabled("FLOWSTREAM_OBJECT_MODE", defaults.object_mode),
            max_listeners: lookup("FLOWSTREAM_MAX_LISTENERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_listeners),
        }
        .normalized()
    }
}

/// Read a positive whole number, accepting integral floats such as `10.0`
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn positive_integer(value: &Value) -> Option<usize> {
    let n = match value.as_u64() {
        Some(n) => n,
        None => {
            let f = value.as_f64()?;
            if f.fract() != 0.0 || f < 1.0 || f >= u64::MAX as f64 {
                return None;
            }
            f as u64
        }
    };
    usize::try_from(n).ok().filter(|n| *n > 0)
}

// ============================================================================
// Config Files
// ============================================================================

/// Errors loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        /// Path that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML
    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        /// Path that failed
        path: PathBuf,
        /// Underlying parse error
        #[source]
        source: toml::de::Error,
    },

    /// TOML could not be viewed as an options object
    #[error("Config file {path:?} is not a table of stream options")]
    NotATable {
        /// Path that failed
        path: PathBuf,
    },
}

/// Default config file location (`$XDG_CONFIG_HOME/flowstream/stream.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("flowstream").join("stream.toml"))
}

/// Load a stream configuration from a TOML file
///
/// The file goes through the same lenient normalization as
/// [`StreamConfig::from_options`]: a mistyped field does not fail the load,
/// it falls back to its default.
pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<StreamConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let table: toml::Table = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let options = serde_json::to_value(&table).map_err(|_| ConfigError::NotATable {
        path: path.to_path_buf(),
    })?;

    tracing::debug!(path = ?path, "Loaded stream config file");
    Ok(StreamConfig::from_options(&options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = StreamConfig::default();
        assert_eq!(config.high_water_mark, 16_384);
        assert!(config.emit_close);
        assert!(config.auto_destroy);
        assert_eq!(config.encoding, Encoding::RawBytes);
        assert!(!config.object_mode);
        assert_eq!(config.max_listeners, 10);
    }

    #[test]
    fn test_encoding_aliases() {
        assert_eq!(Encoding::from_name_lossy("buffer"), Encoding::RawBytes);
        assert_eq!(Encoding::from_name_lossy("string"), Encoding::Utf8String);
        assert_eq!(Encoding::from_name_lossy("UTF-8"), Encoding::Utf8String);
        assert_eq!(Encoding::from_name_lossy("base64"), Encoding::Base64);
        assert_eq!(Encoding::from_name_lossy("unit8"), Encoding::Uint8);
        assert_eq!(Encoding::from_name_lossy("unit16"), Encoding::Uint16);
        assert_eq!(Encoding::from_name_lossy("latin1"), Encoding::RawBytes);
    }

    #[test]
    fn test_from_options_empty_and_null() {
        assert_eq!(StreamConfig::from_options(&json!({})), StreamConfig::default());
        assert_eq!(StreamConfig::from_options(&Value::Null), StreamConfig::default());
        assert_eq!(StreamConfig::from_options(&json!(42)), StreamConfig::default());
    }

    #[test]
    fn test_from_options_mistyped_fields_fall_back() {
        let config = StreamConfig::from_options(&json!({
            "highWaterMark": "big",
            "emitClose": "yes",
            "autoDestroy": 1,
            "encoding": 7,
            "objectMode": null,
            "maxListeners": -3,
        }));
        assert_eq!(config, StreamConfig::default());
    }

    #[test]
    fn test_from_options_rejects_non_positive_high_water_mark() {
        let config = StreamConfig::from_options(&json!({ "highWaterMark": 0 }));
        assert_eq!(config.high_water_mark, DEFAULT_HIGH_WATER_MARK);

        let config = StreamConfig::from_options(&json!({ "highWaterMark": -5 }));
        assert_eq!(config.high_water_mark, DEFAULT_HIGH_WATER_MARK);

        let config = StreamConfig::from_options(&json!({ "highWaterMark": 2.5 }));
        assert_eq!(config.high_water_mark, DEFAULT_HIGH_WATER_MARK);
    }

    #[test]
    fn test_from_options_accepts_whole_number_floats() {
        let config = StreamConfig::from_options(&json!({
            "highWaterMark": 10.0,
            "maxListeners": 3.0,
        }));
        assert_eq!(config.high_water_mark, 10);
        assert_eq!(config.max_listeners, 3);

        let config = StreamConfig::from_options(&json!({ "highWaterMark": -4.0 }));
        assert_eq!(config.high_water_mark, DEFAULT_HIGH_WATER_MARK);
    }

    #[test]
    fn test_from_vars() {
        let vars: HashMap<&str, &str> = [
            ("FLOWSTREAM_HIGH_WATER_MARK", "1024"),
            ("FLOWSTREAM_EMIT_CLOSE", "FALSE"),
            ("FLOWSTREAM_ENCODING", "utf-8"),
            ("FLOWSTREAM_OBJECT_MODE", "1"),
            ("FLOWSTREAM_MAX_LISTENERS", "0"),
        ]
        .into_iter()
        .collect();

        let config = StreamConfig::from_vars(|name| vars.get(name).map(ToString::to_string));
        assert_eq!(config.high_water_mark, 1024);
        assert!(!config.emit_close);
        assert!(config.auto_destroy);
        assert_eq!(config.encoding, Encoding::Utf8String);
        assert!(config.object_mode);
        assert_eq!(config.max_listeners, DEFAULT_MAX_LISTENERS);
    }

    #[test]
    fn test_from_vars_unset_is_default() {
        assert_eq!(StreamConfig::from_vars(|_| None), StreamConfig::default());

        let config = StreamConfig::from_vars(|name| {
            (name == "FLOWSTREAM_HIGH_WATER_MARK").then(|| "lots".to_string())
        });
        assert_eq!(config.high_water_mark, DEFAULT_HIGH_WATER_MARK);
    }

    #[test]
    fn test_from_options_accepts_both_key_styles() {
        let camel = StreamConfig::from_options(&json!({
            "highWaterMark": 10,
            "emitClose": false,
            "encoding": "base64",
            "maxListeners": 3,
        }));
        let snake = StreamConfig::from_options(&json!({
            "high_water_mark": 10,
            "emit_close": false,
            "encoding": "base64",
            "max_listeners": 3,
        }));
        assert_eq!(camel, snake);
        assert_eq!(camel.high_water_mark, 10);
        assert!(!camel.emit_close);
        assert_eq!(camel.encoding, Encoding::Base64);
        assert_eq!(camel.max_listeners, 3);
    }

    #[test]
    fn test_normalized_replaces_zero() {
        let config = StreamConfig::new()
            .with_high_water_mark(0)
            .with_max_listeners(0)
            .normalized();
        assert_eq!(config.high_water_mark, DEFAULT_HIGH_WATER_MARK);
        assert_eq!(config.max_listeners, DEFAULT_MAX_LISTENERS);
    }

    #[test]
    fn test_lifecycle_conflict() {
        assert!(StreamConfig::new()
            .with_emit_close(true)
            .with_auto_destroy(false)
            .has_lifecycle_conflict());
        assert!(!StreamConfig::new()
            .with_emit_close(false)
            .with_auto_destroy(false)
            .has_lifecycle_conflict());
        assert!(!StreamConfig::default().has_lifecycle_conflict());
    }

    #[test]
    fn test_serde_uses_camel_case() {
        let config = StreamConfig::new().with_encoding(Encoding::Utf8String);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["highWaterMark"], json!(16_384));
        assert_eq!(json["encoding"], json!("utf8-string"));
    }

    #[test]
    fn test_load_config_from_path() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "highWaterMark = 64.0\nencoding = \"unit16\"\nobject_mode = \"nope\""
        )
        .unwrap();

        let config = load_config_from_path(file.path()).unwrap();
        assert_eq!(config.high_water_mark, 64);
        assert_eq!(config.encoding, Encoding::Uint16);
        assert!(!config.object_mode);
    }

    #[test]
    fn test_load_config_invalid_toml() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "highWaterMark = = 3").unwrap();

        let err = load_config_from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config_from_path("/nonexistent/flowstream/stream.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
