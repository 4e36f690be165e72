//! Client events and observer registration

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use vipen_core::{InstantReading, ViPenError};
use vipen_session::SessionState;
use vipen_transport::DeviceHandle;

/// Event published by a client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The session state machine moved
    StateChanged(SessionState),
    /// Link established and characteristics resolved
    Connected(DeviceHandle),
    /// A decoded instant reading
    Reading(InstantReading),
    /// The link dropped without being asked to
    LinkLost,
    /// A failure not tied to a caller's request
    Error(ViPenError),
}

/// Registration of an observer callback
///
/// The callback keeps running until the handle is dropped.
#[derive(Debug)]
pub struct ObserverHandle {
    task: JoinHandle<()>,
}

impl ObserverHandle {
    /// Forward every event on `events` to `callback`
    pub(crate) fn spawn<F>(mut events: broadcast::Receiver<ClientEvent>, mut callback: F) -> Self
    where
        F: FnMut(ClientEvent) + Send + 'static,
    {
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => callback(event),
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("Observer lagged, {} events skipped", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Self { task }
    }

    /// Check if the observer has stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
