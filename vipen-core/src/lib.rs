//! Core types and utilities for the ViPen vibration/temperature sensor
//!
//! This crate provides the error taxonomy, the decoded data model, and the
//! pure wire codec shared by every layer of the ViPen client.

pub mod codec;
pub mod error;
pub mod model;

pub use codec::{
    decode_instant_reading, decode_user_data, decode_waveform_block, decode_waveform_capture,
    decode_waveform_header, encode_command, encode_download_request, Opcode, WaveformLayout,
    WAVEFORM_BLOCK_LEN, WAVEFORM_HEADER_LEN,
};
pub use error::{CaptureError, CommandError, ConnectError, ReadError, ViPenError, ViPenResult};
pub use model::{
    InstantReading, UserDataRecord, WaveformBlock, WaveformCapture, WaveformHeader,
    SAMPLES_PER_BLOCK, WAVEFORM_BLOCK_COUNT,
};
