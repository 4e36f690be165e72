//! Decoded sensor values handed to collaborators

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Number of blocks in one waveform capture
pub const WAVEFORM_BLOCK_COUNT: usize = 22;

/// Number of signed 16-bit samples per waveform block
pub const SAMPLES_PER_BLOCK: usize = 74;

/// One decoded live sample from the reading characteristic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstantReading {
    /// Vibration velocity, mm/s (2 decimals)
    pub velocity: f64,
    /// Vibration acceleration, m/s² (2 decimals)
    pub acceleration: f64,
    /// Kurtosis (2 decimals)
    pub kurtosis: f64,
    /// Surface temperature, °C (1 decimal)
    pub temperature: f64,
    /// Host time at which the notification was received
    pub captured_at: SystemTime,
}

/// Header preceding the waveform blocks of a capture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformHeader {
    pub command: u8,
    pub block: u8,
    pub wave_id: u8,
    /// Device clock at capture time
    pub timestamp: u32,
    /// Scale coefficient converting raw samples to physical units
    pub coefficient: f32,
}

/// One 74-sample segment of a capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformBlock {
    pub index: u8,
    pub wave_id: u8,
    pub samples: Vec<i16>,
}

/// A fully reassembled waveform download
///
/// Only constructed from a complete buffer, so `blocks` always holds
/// exactly [`WAVEFORM_BLOCK_COUNT`] entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformCapture {
    pub header: WaveformHeader,
    pub blocks: Vec<WaveformBlock>,
}

impl WaveformCapture {
    /// Total number of samples across all blocks
    pub fn sample_count(&self) -> usize {
        self.blocks.iter().map(|b| b.samples.len()).sum()
    }

    /// All samples in block order, multiplied by the header coefficient
    pub fn scaled_samples(&self) -> Vec<f64> {
        let coefficient = self.header.coefficient as f64;
        self.blocks
            .iter()
            .flat_map(|b| b.samples.iter())
            .map(|&s| s as f64 * coefficient)
            .collect()
    }
}

/// Auxiliary record stored on the device, fetched with a direct read
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserDataRecord {
    pub address: u8,
    pub id: u16,
    pub timestamp: u32,
    /// Four values scaled by 0.01 (2 decimals)
    pub values: [f64; 4],
}
