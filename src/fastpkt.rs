//! LED v1 fast-frame datagram codec.
//!
//! Pure protocol logic, no sockets, no heap. The fast path carries one full
//! channel frame per UDP datagram:
//!
//! ```text
//! offset 0  3  "LED"      ASCII magic
//!        3  1  version    0x01
//!        4  1  K          channel count, 1..=255
//!        5  K  values     one byte per channel
//! ```
//!
//! The multi-stream v2 format exists on the server side only; a relay
//! resolves it to v1 before it reaches the device, so v2 is intentionally
//! not handled here.

use crate::config::{FAST_RAW_FALLBACK, NUM_CHANNELS};
use crate::ChannelFrame;

/// ASCII packet magic.
pub const MAGIC: [u8; 3] = *b"LED";

/// Protocol version this device speaks.
pub const VERSION: u8 = 0x01;

/// Bytes before the value payload.
pub const HEADER_LEN: usize = 5;

/// Parse a strict LED v1 datagram into a channel frame.
///
/// Rejects short payloads, wrong magic or version, a zero channel count, and
/// payloads shorter than their claimed count. Extra wire channels beyond the
/// device's are ignored; missing ones read as zero.
pub fn parse_frame(data: &[u8]) -> Option<ChannelFrame> {
    if data.len() < HEADER_LEN + 1 {
        return None;
    }
    if data[..3] != MAGIC {
        return None;
    }
    if data[3] != VERSION {
        return None;
    }
    let count = data[4] as usize;
    if count == 0 {
        return None;
    }
    if data.len() < HEADER_LEN + count {
        return None;
    }

    let mut frame = [0u8; NUM_CHANNELS];
    let used = count.min(NUM_CHANNELS);
    frame[..used].copy_from_slice(&data[HEADER_LEN..HEADER_LEN + used]);
    Some(frame)
}

/// Interpret an unframed payload as raw channel bytes, zero-padded.
pub fn raw_frame(data: &[u8]) -> Option<ChannelFrame> {
    if data.is_empty() {
        return None;
    }
    let mut frame = [0u8; NUM_CHANNELS];
    let used = data.len().min(NUM_CHANNELS);
    frame[..used].copy_from_slice(&data[..used]);
    Some(frame)
}

/// Decode a datagram: strict v1 first, then the raw-bytes fallback when the
/// build enables it.
pub fn decode(data: &[u8]) -> Option<ChannelFrame> {
    parse_frame(data).or_else(|| {
        if FAST_RAW_FALLBACK {
            raw_frame(data)
        } else {
            None
        }
    })
}

/// Build an LED v1 datagram from channel values. Inverse of
/// [`parse_frame`] for every valid K; used by test clients and tooling.
///
/// Returns the number of bytes written, or `None` when `values` is empty,
/// has more than 255 entries, or `buf` is too small.
pub fn encode_frame(values: &[u8], buf: &mut [u8]) -> Option<usize> {
    if values.is_empty() || values.len() > 255 {
        return None;
    }
    let total = HEADER_LEN + values.len();
    if buf.len() < total {
        return None;
    }
    buf[..3].copy_from_slice(&MAGIC);
    buf[3] = VERSION;
    buf[4] = values.len() as u8;
    buf[HEADER_LEN..total].copy_from_slice(values);
    Some(total)
}
