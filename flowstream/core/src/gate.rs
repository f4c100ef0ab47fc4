//! Backpressure Gate
//!
//! Admission control for pushed payloads. The gate never mutates stream
//! state: it either returns the normalized [`Chunk`] or an error, and the
//! stream only changes after a successful admission.

use std::sync::Arc;

use bytes::Bytes;

use crate::config::{Encoding, StreamConfig};
use crate::error::{StreamError, StreamResult};
use crate::payload::{Chunk, Payload};

/// Admission control bound to one stream's configuration
#[derive(Clone, Debug)]
pub struct BackpressureGate {
    config: StreamConfig,
}

impl BackpressureGate {
    /// Create a gate for the given (already normalized) configuration
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    /// Configuration the gate enforces
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Admit a payload under this gate's configuration
    pub fn admit(&self, payload: Payload) -> StreamResult<Chunk> {
        admit(payload, &self.config)
    }

    /// Largest raw read a producer should attempt; zero when nothing fits
    #[must_use]
    pub fn max_raw_read(&self) -> usize {
        max_raw_read(&self.config)
    }

    /// Length of the longest prefix of `data` that can be pushed as one chunk
    ///
    /// See [`fitting_prefix`].
    #[must_use]
    pub fn fitting_prefix(&self, data: &[u8], at_eof: bool) -> usize {
        fitting_prefix(data, &self.config, at_eof)
    }
}

/// Decide whether a payload may be accepted
///
/// - In object mode every payload is admitted as-is, without size or type
///   checks. Text and bytes still go through encoding normalization.
/// - Otherwise the payload must be text or bytes, and its size after
///   normalization must not exceed `high_water_mark`.
///
/// The end-of-data sentinel is not a payload and is rejected here; the stream
/// handles it before consulting the gate.
pub fn admit(payload: Payload, config: &StreamConfig) -> StreamResult<Chunk> {
    let data = match payload {
        Payload::Text(text) => Bytes::from(text),
        Payload::Bytes(bytes) => bytes,
        Payload::Object(value) if config.object_mode => return Ok(Chunk::Object(Arc::new(value))),
        other => {
            return Err(StreamError::InvalidPayloadType {
                found: other.kind_name(),
            })
        }
    };

    let chunk = Chunk::encode(data, config.encoding);
    if config.object_mode {
        return Ok(chunk);
    }

    let size = chunk.byte_len();
    if size > config.high_water_mark {
        return Err(StreamError::PayloadTooLarge {
            size,
            limit: config.high_water_mark,
        });
    }

    Ok(chunk)
}

/// Encoded size of one replacement character (U+FFFD)
const REPLACEMENT_LEN: usize = '\u{FFFD}'.len_utf8();

/// Largest raw read whose bytes can be admitted after normalization
///
/// Base64 expands every 3 input bytes to 4 output bytes and `uint16` pads an
/// odd byte. `utf8-string` keeps valid text the same size, so the full
/// high-water mark is returned; invalid bytes grow and are handled by
/// [`fitting_prefix`].
///
/// Zero means no non-empty chunk can ever be admitted under this
/// configuration (base64 below 4 bytes, `uint16` below 2).
#[must_use]
pub fn max_raw_read(config: &StreamConfig) -> usize {
    let hwm = config.high_water_mark;
    match config.encoding {
        Encoding::Base64 => (hwm / 4) * 3,
        Encoding::Uint16 => hwm - (hwm % 2),
        Encoding::RawBytes | Encoding::Utf8String | Encoding::Uint8 => hwm,
    }
}

/// Length of the longest prefix of `data` that the gate will admit
///
/// The prefix never splits an encoding unit unless `at_eof` is set: a
/// partial UTF-8 sequence, a base64 group short of 3 bytes, or an odd
/// `uint16` byte stays behind for the next read. In object mode every byte
/// fits. Returns zero when not even the first unit fits.
#[must_use]
pub fn fitting_prefix(data: &[u8], config: &StreamConfig, at_eof: bool) -> usize {
    if config.object_mode {
        return data.len();
    }

    let limit = max_raw_read(config).min(data.len());
    match config.encoding {
        Encoding::RawBytes | Encoding::Uint8 => limit,
        Encoding::Base64 if at_eof && limit == data.len() => limit,
        Encoding::Base64 => limit - (limit % 3),
        Encoding::Uint16 if at_eof && limit == data.len() => limit,
        Encoding::Uint16 => limit - (limit % 2),
        Encoding::Utf8String => utf8_prefix(data, config.high_water_mark, at_eof),
    }
}

/// Longest prefix whose lossy UTF-8 decoding fits in `limit` bytes
///
/// Walks the input the way `String::from_utf8_lossy` does, so each invalid
/// sequence costs one replacement character. A trailing incomplete sequence
/// is held back unless `at_eof`.
fn utf8_prefix(data: &[u8], limit: usize, at_eof: bool) -> usize {
    let mut taken = 0;
    let mut size = 0;

    while taken < data.len() {
        let rest = &data[taken..];
        let (valid_len, invalid_len) = match std::str::from_utf8(rest) {
            Ok(_) => (rest.len(), None),
            Err(e) => (e.valid_up_to(), Some(e.error_len())),
        };

        if valid_len > 0 {
            let room = limit - size;
            if valid_len > room {
                // back off to a char boundary
                let mut end = room;
                while end > 0 && rest.get(end).is_some_and(|b| (0x80..0xC0).contains(b)) {
                    end -= 1;
                }
                return taken + end;
            }
            taken += valid_len;
            size += valid_len;
            continue;
        }

        let unit = match invalid_len {
            Some(Some(len)) => len,
            Some(None) if at_eof => rest.len(),
            Some(None) | None => return taken,
        };
        if size + REPLACEMENT_LEN > limit {
            return taken;
        }
        taken += unit;
        size += REPLACEMENT_LEN;
    }

    taken
}
