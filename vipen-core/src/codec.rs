//! Wire codec for the ViPen GATT payloads
//!
//! Pure transforms between notification/read buffers and the data model.
//! All multi-byte integers are little-endian.
//!
//! # Layouts
//! ```text
//! Instant reading  [7..9) velocity  [9..11) acceleration  [11..13) kurtosis  [13..15) temperature
//! Waveform header  [0] command [1] block [2] wave id [3] reserved [4..8) timestamp [8..12) coefficient
//! Waveform block   [0] block id [1] wave id [2..150) 74 x i16
//! User data        [0] address [1..3) id [3..7) timestamp [7..15) 4 x i16
//! ```

use crate::error::{ViPenError, ViPenResult};
use crate::model::{
    InstantReading, UserDataRecord, WaveformBlock, WaveformCapture, WaveformHeader,
    SAMPLES_PER_BLOCK, WAVEFORM_BLOCK_COUNT,
};
use bytes::Buf;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Scale applied to every raw measurement integer
pub const SCALE_FACTOR: f64 = 0.01;

/// Minimum length of an instant reading notification
pub const INSTANT_READING_LEN: usize = 15;

/// Length of a user data record
pub const USER_DATA_LEN: usize = 15;

/// Length of the decoded waveform header fields
pub const WAVEFORM_HEADER_LEN: usize = 12;

/// Length of one encoded waveform block
pub const WAVEFORM_BLOCK_LEN: usize = 2 + SAMPLES_PER_BLOCK * 2;

/// Request for a velocity waveform download
pub const DOWNLOAD_REQUEST: [u8; 2] = [0x10, 0x00];

const READING_VALUES_OFFSET: usize = 7;

/// Control opcodes understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum Opcode {
    Start = 0x0001,
    Stop = 0x0002,
}

/// Size of the header region that precedes the waveform blocks
///
/// The device documentation describes a 150-byte header of which only the
/// first 12 bytes carry fields. `COMPACT` assumes the remaining reserved
/// bytes are never transmitted; `PADDED` consumes and ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformLayout {
    pub header_len: usize,
}

impl WaveformLayout {
    /// 12-byte header, 3312-byte capture
    pub const COMPACT: WaveformLayout = WaveformLayout {
        header_len: WAVEFORM_HEADER_LEN,
    };

    /// 150-byte header (138 reserved bytes), 3450-byte capture
    pub const PADDED: WaveformLayout = WaveformLayout {
        header_len: WAVEFORM_BLOCK_LEN,
    };

    /// Total byte length of a complete capture in this layout
    pub fn capture_len(&self) -> usize {
        self.header_len + WAVEFORM_BLOCK_COUNT * WAVEFORM_BLOCK_LEN
    }
}

impl Default for WaveformLayout {
    fn default() -> Self {
        WaveformLayout::COMPACT
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn scale(raw: i16, decimals: i32) -> f64 {
    round_to(raw as f64 * SCALE_FACTOR, decimals)
}

fn ensure_len(structure: &'static str, buf: &[u8], expected: usize) -> ViPenResult<()> {
    if buf.len() < expected {
        return Err(ViPenError::MalformedPayload {
            structure,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Decode an instant reading notification
///
/// # Errors
/// `MalformedPayload` if the buffer is shorter than 15 bytes
pub fn decode_instant_reading(buf: &[u8], captured_at: SystemTime) -> ViPenResult<InstantReading> {
    ensure_len("instant reading", buf, INSTANT_READING_LEN)?;

    let mut cursor = &buf[READING_VALUES_OFFSET..INSTANT_READING_LEN];
    let velocity = cursor.get_i16_le();
    let acceleration = cursor.get_i16_le();
    let kurtosis = cursor.get_i16_le();
    let temperature = cursor.get_i16_le();

    Ok(InstantReading {
        velocity: scale(velocity, 2),
        acceleration: scale(acceleration, 2),
        kurtosis: scale(kurtosis, 2),
        temperature: scale(temperature, 1),
        captured_at,
    })
}

/// Decode the 12 header bytes of a waveform capture
///
/// # Errors
/// `MalformedPayload` if fewer than 12 bytes are available
pub fn decode_waveform_header(buf: &[u8]) -> ViPenResult<WaveformHeader> {
    ensure_len("waveform header", buf, WAVEFORM_HEADER_LEN)?;

    let mut cursor = &buf[..WAVEFORM_HEADER_LEN];
    let command = cursor.get_u8();
    let block = cursor.get_u8();
    let wave_id = cursor.get_u8();
    let _reserved = cursor.get_u8();
    let timestamp = cursor.get_u32_le();
    let coefficient = cursor.get_f32_le();

    Ok(WaveformHeader {
        command,
        block,
        wave_id,
        timestamp,
        coefficient,
    })
}

/// Decode one waveform block starting at `offset`
///
/// # Errors
/// `TruncatedBlock` if fewer than 150 bytes remain; no partial block is produced
pub fn decode_waveform_block(buf: &[u8], offset: usize) -> ViPenResult<WaveformBlock> {
    let available = buf.len().saturating_sub(offset);
    if available < WAVEFORM_BLOCK_LEN {
        return Err(ViPenError::TruncatedBlock {
            offset,
            required: WAVEFORM_BLOCK_LEN,
            available,
        });
    }

    let mut cursor = &buf[offset..offset + WAVEFORM_BLOCK_LEN];
    let index = cursor.get_u8();
    let wave_id = cursor.get_u8();
    let samples = (0..SAMPLES_PER_BLOCK).map(|_| cursor.get_i16_le()).collect();

    Ok(WaveformBlock {
        index,
        wave_id,
        samples,
    })
}

/// Decode a complete capture buffer: header followed by 22 blocks
///
/// # Errors
/// Fails as a whole if the header or any block is truncated
pub fn decode_waveform_capture(buf: &[u8], layout: WaveformLayout) -> ViPenResult<WaveformCapture> {
    let header = decode_waveform_header(buf)?;
    let blocks = (0..WAVEFORM_BLOCK_COUNT)
        .map(|i| decode_waveform_block(buf, layout.header_len + i * WAVEFORM_BLOCK_LEN))
        .collect::<ViPenResult<Vec<_>>>()?;

    Ok(WaveformCapture { header, blocks })
}

/// Decode a user data record read from the device
///
/// # Errors
/// `MalformedPayload` if the buffer is shorter than 15 bytes
pub fn decode_user_data(buf: &[u8]) -> ViPenResult<UserDataRecord> {
    ensure_len("user data", buf, USER_DATA_LEN)?;

    let mut cursor = &buf[..USER_DATA_LEN];
    let address = cursor.get_u8();
    let id = cursor.get_u16_le();
    let timestamp = cursor.get_u32_le();
    let mut values = [0.0; 4];
    for value in values.iter_mut() {
        *value = scale(cursor.get_i16_le(), 2);
    }

    Ok(UserDataRecord {
        address,
        id,
        timestamp,
        values,
    })
}

/// Encode a control command
pub fn encode_command(opcode: Opcode) -> [u8; 2] {
    (opcode as u16).to_le_bytes()
}

/// Encode the waveform download request
pub fn encode_download_request() -> [u8; 2] {
    DOWNLOAD_REQUEST
}
