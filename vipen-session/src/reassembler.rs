//! Waveform fragment reassembly
//!
//! A waveform capture arrives as a run of notifications on the wave data
//! characteristic, each carrying an arbitrary slice of the capture. The
//! reassembler appends slices in arrival order until the expected length is
//! reached, then hands back exactly that many bytes.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::time::Duration;
use vipen_core::{ViPenError, ViPenResult};

/// Reassembles one capture at a time
#[derive(Debug)]
pub struct FragmentReassembler {
    target: usize,
    buffer: BytesMut,
    active: bool,
}

impl FragmentReassembler {
    /// Create a reassembler expecting `target` bytes per capture
    pub fn new(target: usize) -> Self {
        Self {
            target,
            buffer: BytesMut::with_capacity(target),
            active: false,
        }
    }

    /// Expected capture length
    pub fn target(&self) -> usize {
        self.target
    }

    /// Bytes collected by the active capture
    pub fn collected(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start collecting a new capture
    ///
    /// # Errors
    /// `CaptureInProgress` if a capture is already being collected
    pub fn begin(&mut self) -> ViPenResult<()> {
        if self.active {
            return Err(ViPenError::CaptureInProgress);
        }
        self.buffer.clear();
        self.active = true;
        Ok(())
    }

    /// Append a fragment
    ///
    /// # Returns
    /// The complete capture, truncated to the target length, once enough
    /// bytes have arrived. The reassembler is then idle again.
    pub fn on_fragment(&mut self, fragment: &[u8]) -> Option<Bytes> {
        if !self.active {
            log::debug!("Dropping {} byte fragment outside a capture", fragment.len());
            return None;
        }

        self.buffer.extend_from_slice(fragment);
        if self.buffer.len() < self.target {
            return None;
        }

        if self.buffer.len() > self.target {
            log::debug!(
                "Discarding {} bytes past the end of the capture",
                self.buffer.len() - self.target
            );
        }
        let mut complete = std::mem::take(&mut self.buffer);
        complete.truncate(self.target);
        self.active = false;
        Some(complete.freeze())
    }

    /// Abandon the active capture
    ///
    /// # Returns
    /// The `ReassemblyTimeout` describing how far the capture got
    pub fn abort(&mut self) -> ViPenError {
        let err = ViPenError::ReassemblyTimeout {
            collected: self.buffer.len(),
            expected: self.target,
        };
        self.reset();
        err
    }

    /// Drop any partial capture
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.active = false;
    }

    /// Collect one capture from `fragments` and decode it with `parse`
    ///
    /// # Errors
    /// * `CaptureInProgress` if a capture is already active
    /// * `ReassemblyTimeout` if the capture is incomplete after `timeout`
    /// * `LinkLost` if the fragment stream ends first
    /// * Whatever `parse` returns for the completed buffer
    pub async fn reassemble<S, T, F>(
        &mut self,
        fragments: S,
        timeout: Duration,
        parse: F,
    ) -> ViPenResult<T>
    where
        S: Stream<Item = Vec<u8>>,
        F: FnOnce(&[u8]) -> ViPenResult<T>,
    {
        self.begin()?;
        let mut fragments = std::pin::pin!(fragments);

        let outcome = tokio::time::timeout(timeout, async {
            while let Some(fragment) = fragments.next().await {
                if let Some(complete) = self.on_fragment(&fragment) {
                    return Some(complete);
                }
            }
            None
        })
        .await;

        match outcome {
            Ok(Some(complete)) => parse(&complete),
            Ok(None) => {
                log::warn!(
                    "Fragment stream ended after {} of {} bytes",
                    self.collected(),
                    self.target
                );
                self.reset();
                Err(ViPenError::LinkLost)
            }
            Err(_) => {
                let err = self.abort();
                log::warn!("{}", err);
                Err(err)
            }
        }
    }
}
