//! Public client handle

use crate::events::{ClientEvent, ObserverHandle};
use crate::session::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use vipen_core::{
    CaptureError, CommandError, ConnectError, InstantReading, ReadError, UserDataRecord,
    ViPenError, ViPenResult, WaveformCapture,
};
use vipen_session::{SessionState, SessionStatistics, SharedStatistics};

/// Client for one ViPen sensor
///
/// Every method is a request to the session task that owns the link, so a
/// `ViPenClient` can be shared (e.g. behind an `Arc`) and called from
/// several tasks; requests are served one at a time in arrival order.
/// Readings are delivered independently of requests.
///
/// Dropping the client closes the link.
pub struct ViPenClient {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ClientEvent>,
    state: watch::Receiver<SessionState>,
    statistics: SharedStatistics,
    capture_busy: Arc<AtomicBool>,
    pipeline: JoinHandle<()>,
}

/// Clears the capture flag when the download ends or is cancelled
struct CaptureGuard(Arc<AtomicBool>);

impl CaptureGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> ViPenResult<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(ViPenError::CaptureInProgress);
        }
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ViPenClient {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        events: broadcast::Sender<ClientEvent>,
        state: watch::Receiver<SessionState>,
        statistics: SharedStatistics,
        pipeline: JoinHandle<()>,
    ) -> Self {
        Self {
            commands,
            events,
            state,
            statistics,
            capture_busy: Arc::new(AtomicBool::new(false)),
            pipeline,
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<ViPenResult<T>>) -> Command,
    ) -> ViPenResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ViPenError::SessionClosed)?;
        response.await.map_err(|_| ViPenError::SessionClosed)?
    }

    /// Discover the sensor, open the link and arm the reading stream
    ///
    /// Succeeds without doing anything if the session is already ready.
    ///
    /// # Errors
    /// * `NoDeviceSelected` - No advertisement matched the filters
    /// * `ConnectTimeout` - The link did not open in time
    /// * `OperationExhausted` - Service or characteristic setup kept failing
    ///
    /// On failure the session is left `Disconnected` with nothing held.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.request(Command::Connect).await
    }

    /// Stop the measurement, unsubscribe and close the link
    ///
    /// Never fails; disconnecting a closed session does nothing.
    pub async fn disconnect(&self) {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Disconnect(reply)).await.is_err() {
            log::debug!("Disconnect requested after the session ended");
            return;
        }
        let _ = response.await;
    }

    /// Tell the sensor to start measuring
    ///
    /// # Errors
    /// `LinkNotReady` if not connected; no I/O is attempted in that case
    pub async fn start_measurement(&self) -> Result<(), CommandError> {
        self.request(Command::Start).await
    }

    /// Tell the sensor to stop measuring
    pub async fn stop_measurement(&self) -> Result<(), CommandError> {
        self.request(Command::Stop).await
    }

    /// Download one complete waveform capture
    ///
    /// # Errors
    /// * `CaptureInProgress` - Another download is already running
    /// * `ReassemblyTimeout` - The capture did not complete in time
    /// * `TruncatedBlock` / `MalformedPayload` - The capture failed to decode
    pub async fn download_waveform(&self) -> Result<WaveformCapture, CaptureError> {
        let _guard = CaptureGuard::acquire(&self.capture_busy)?;
        self.request(Command::DownloadWaveform).await
    }

    /// Read the user data record stored on the sensor
    pub async fn read_user_data(&self) -> Result<UserDataRecord, ReadError> {
        self.request(Command::ReadUserData).await
    }

    /// Receive every client event
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Call `callback` with every decoded reading
    pub fn on_reading<F>(&self, mut callback: F) -> ObserverHandle
    where
        F: FnMut(InstantReading) + Send + 'static,
    {
        ObserverHandle::spawn(self.subscribe(), move |event| {
            if let ClientEvent::Reading(reading) = event {
                callback(reading);
            }
        })
    }

    /// Call `callback` whenever the link drops unexpectedly
    pub fn on_link_lost<F>(&self, mut callback: F) -> ObserverHandle
    where
        F: FnMut() + Send + 'static,
    {
        ObserverHandle::spawn(self.subscribe(), move |event| {
            if event == ClientEvent::LinkLost {
                callback();
            }
        })
    }

    /// Call `callback` with failures not tied to a request (link loss, failed reconnect)
    pub fn on_error<F>(&self, mut callback: F) -> ObserverHandle
    where
        F: FnMut(ViPenError) + Send + 'static,
    {
        ObserverHandle::spawn(self.subscribe(), move |event| {
            if let ClientEvent::Error(e) = event {
                callback(e);
            }
        })
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follow session state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Snapshot of the session counters
    pub fn statistics(&self) -> SessionStatistics {
        SessionStatistics::snapshot(&self.statistics)
    }
}

impl Drop for ViPenClient {
    fn drop(&mut self) {
        self.pipeline.abort();
    }
}

impl std::fmt::Debug for ViPenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViPenClient")
            .field("state", &self.state())
            .field("capture_busy", &self.capture_busy.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientBuilder;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use vipen_core::{SAMPLES_PER_BLOCK, WaveformLayout};
    use vipen_transport::{
        CharacteristicHandle, GattProfile, GattTransport, MockCall, MockOp, MockTransport,
        TransportEvent, Uuid,
    };

    fn profile() -> GattProfile {
        GattProfile {
            service: Uuid::from_u128(0xA0),
            reading: Uuid::from_u128(0xA1),
            control: Uuid::from_u128(0xA2),
            wave_data: Uuid::from_u128(0xA3),
            user_data: Uuid::from_u128(0xA4),
        }
    }

    fn setup() -> (MockTransport, ViPenClient) {
        let transport = MockTransport::with_profile(&profile());
        let client = ClientBuilder::new(profile())
            .build(Arc::new(transport.clone()))
            .unwrap();
        (transport, client)
    }

    async fn next_event(
        events: &mut broadcast::Receiver<ClientEvent>,
        wanted: impl Fn(&ClientEvent) -> bool,
    ) -> ClientEvent {
        loop {
            let event = events.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    }

    fn reading_payload(velocity: i16, temperature: i16) -> Vec<u8> {
        let mut buf = vec![0u8; 7];
        buf.extend_from_slice(&velocity.to_le_bytes());
        buf.extend_from_slice(&981i16.to_le_bytes());
        buf.extend_from_slice(&300i16.to_le_bytes());
        buf.extend_from_slice(&temperature.to_le_bytes());
        buf
    }

    fn block_samples(block: usize) -> Vec<i16> {
        (0..SAMPLES_PER_BLOCK)
            .map(|i| (block as i16 * 100 + i as i16) * if i % 2 == 0 { 1 } else { -1 })
            .collect()
    }

    /// Header fragment followed by one fragment per block
    fn capture_fragments() -> Vec<Vec<u8>> {
        let mut header = vec![0x10, 22, 7, 0];
        header.extend_from_slice(&1_700_000_123u32.to_le_bytes());
        header.extend_from_slice(&0.25f32.to_le_bytes());

        let mut fragments = vec![header];
        for block in 0..22 {
            let mut fragment = vec![block as u8, 7];
            for sample in block_samples(block) {
                fragment.extend_from_slice(&sample.to_le_bytes());
            }
            fragments.push(fragment);
        }
        fragments
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_walks_the_state_machine() {
        let (transport, client) = setup();
        let mut events = client.subscribe();
        let p = profile();

        assert_ok!(client.connect().await);
        assert_eq!(client.state(), SessionState::Ready);

        let mut states = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                ClientEvent::StateChanged(state) => states.push(state),
                ClientEvent::Connected(device) => {
                    assert_eq!(device.id, "mock-vipen-1");
                    break;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(
            states,
            vec![
                SessionState::Discovering,
                SessionState::Connecting,
                SessionState::ServiceResolving,
                SessionState::Ready,
            ]
        );

        assert_eq!(
            transport.calls(),
            vec![
                MockCall::Discover,
                MockCall::Connect("mock-vipen-1".to_string()),
                MockCall::ResolveService(p.service),
                MockCall::ResolveCharacteristic(p.reading),
                MockCall::ResolveCharacteristic(p.control),
                MockCall::ResolveCharacteristic(p.wave_data),
                MockCall::ResolveCharacteristic(p.user_data),
                MockCall::Subscribe(p.reading),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_before_connect_does_no_io() {
        let (transport, client) = setup();
        assert_eq!(client.start_measurement().await, Err(ViPenError::LinkNotReady));
        assert_eq!(client.download_waveform().await, Err(ViPenError::LinkNotReady));
        assert_eq!(client.read_user_data().await, Err(ViPenError::LinkNotReady));
        assert!(transport.calls().is_empty());
        assert_eq!(client.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connects_open_one_link() {
        let (transport, client) = setup();
        let (first, second) = tokio::join!(client.connect(), client.connect());
        assert_ok!(first);
        assert_ok!(second);
        assert_eq!(transport.connect_count(), 1);
        let discovers = transport
            .calls()
            .into_iter()
            .filter(|c| *c == MockCall::Discover)
            .count();
        assert_eq!(discovers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_matching_device() {
        let transport = MockTransport::new();
        let client = ClientBuilder::new(profile())
            .build(Arc::new(transport.clone()))
            .unwrap();

        assert_eq!(client.connect().await, Err(ViPenError::NoDeviceSelected));
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(!transport.calls().iter().any(|c| matches!(c, MockCall::Connect(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_leaves_session_disconnected() {
        let (transport, client) = setup();
        transport.set_connect_delay(Duration::from_secs(20));
        let started = tokio::time::Instant::now();

        assert_eq!(
            client.connect().await,
            Err(ViPenError::ConnectTimeout(Duration::from_secs(10)))
        );
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(client.state(), SessionState::Disconnected);
        assert_eq!(transport.calls().last(), Some(&MockCall::Disconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn test_characteristic_failure_releases_link() {
        let (transport, client) = setup();
        transport.fail_next(MockOp::ResolveCharacteristic, 3);

        match client.connect().await {
            Err(ViPenError::OperationExhausted {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "resolve reading characteristic");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(!transport.is_connected().await);
        assert!(transport.subscribed().is_empty());
        assert_eq!(client.statistics().operations_exhausted, 1);

        // A later manual connect starts over
        assert_ok!(client.connect().await);
        assert_eq!(client.state(), SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_resolution_gets_five_attempts() {
        let (transport, client) = setup();
        transport.fail_next(MockOp::ResolveService, 4);

        assert_ok!(client.connect().await);
        let attempts = transport
            .calls()
            .into_iter()
            .filter(|c| matches!(c, MockCall::ResolveService(_)))
            .count();
        assert_eq!(attempts, 5);
        assert_eq!(client.statistics().retries, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_measurement() {
        let (transport, client) = setup();
        let control = profile().control;
        client.connect().await.unwrap();
        transport.clear_calls();

        assert_ok!(client.start_measurement().await);
        assert_eq!(client.state(), SessionState::Streaming);
        assert_ok!(client.stop_measurement().await);
        assert_eq!(client.state(), SessionState::Ready);

        let reading = profile().reading;
        assert_eq!(
            transport.calls(),
            vec![
                MockCall::Subscribe(reading),
                MockCall::Write(control, vec![0x01, 0x00]),
                MockCall::Write(control, vec![0x02, 0x00]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_restores_reading_subscription() {
        let (transport, client) = setup();
        let p = profile();
        client.connect().await.unwrap();
        let reading = CharacteristicHandle {
            service: p.service,
            uuid: p.reading,
        };
        transport.unsubscribe(&reading).await.unwrap();
        assert!(!transport.subscribed().contains(&p.reading));

        assert_ok!(client.start_measurement().await);
        assert!(transport.subscribed().contains(&p.reading));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_command_is_exhausted() {
        let (transport, client) = setup();
        client.connect().await.unwrap();
        transport.fail_next(MockOp::Write, 3);

        let result = client.start_measurement().await;
        assert!(matches!(result, Err(ViPenError::OperationExhausted { attempts: 3, .. })));
        assert_eq!(client.state(), SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let (transport, client) = setup();
        client.disconnect().await;
        client.disconnect().await;
        assert!(transport.calls().is_empty());
        assert_eq!(client.state(), SessionState::Disconnected);

        client.connect().await.unwrap();
        client.start_measurement().await.unwrap();
        transport.clear_calls();
        transport.fail_next(MockOp::Write, 1);

        client.disconnect().await;
        let p = profile();
        assert_eq!(
            transport.calls(),
            vec![
                MockCall::Write(p.control, vec![0x02, 0x00]),
                MockCall::Unsubscribe(p.reading),
                MockCall::Disconnect,
            ]
        );
        assert_eq!(client.state(), SessionState::Disconnected);

        transport.clear_calls();
        client.disconnect().await;
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_readings_reach_the_observer() {
        let (transport, client) = setup();
        let reading = profile().reading;
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        let _observer = client.on_reading(move |r| {
            let _ = seen_tx.send(r);
        });

        client.connect().await.unwrap();
        client.start_measurement().await.unwrap();
        transport.notify(reading, reading_payload(1234, 2567));
        transport.notify(reading, vec![0u8; 4]);
        transport.notify(reading, reading_payload(-250, -123));

        let first = seen_rx.recv().await.unwrap();
        assert_eq!(first.velocity, 12.34);
        assert_eq!(first.acceleration, 9.81);
        assert_eq!(first.kurtosis, 3.0);
        assert_eq!(first.temperature, 25.7);
        let second = seen_rx.recv().await.unwrap();
        assert_eq!(second.velocity, -2.5);
        assert_eq!(second.temperature, -1.2);

        let stats = client.statistics();
        assert_eq!(stats.readings_delivered, 2);
        assert_eq!(stats.readings_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_waveform_end_to_end() {
        let (transport, client) = setup();
        let p = profile();
        transport.respond_to_write(&[0x10, 0x00], p.wave_data, capture_fragments());
        client.connect().await.unwrap();

        let capture = client.download_waveform().await.unwrap();

        assert_eq!(capture.header.command, 0x10);
        assert_eq!(capture.header.wave_id, 7);
        assert_eq!(capture.header.timestamp, 1_700_000_123);
        assert_eq!(capture.header.coefficient, 0.25);
        assert_eq!(capture.blocks.len(), 22);
        for (i, block) in capture.blocks.iter().enumerate() {
            assert_eq!(block.index as usize, i);
            assert_eq!(block.wave_id, 7);
            assert_eq!(block.samples, block_samples(i));
        }

        let calls = transport.calls();
        assert!(calls.contains(&MockCall::Subscribe(p.wave_data)));
        assert!(calls.contains(&MockCall::Write(p.control, vec![0x10, 0x00])));
        assert_eq!(calls.last(), Some(&MockCall::Unsubscribe(p.wave_data)));
        assert!(!transport.subscribed().contains(&p.wave_data));
        assert_eq!(client.statistics().captures_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_download_times_out_and_unsubscribes() {
        let (transport, client) = setup();
        let p = profile();
        let partial: Vec<Vec<u8>> = capture_fragments().into_iter().take(6).collect();
        transport.respond_to_write(&[0x10, 0x00], p.wave_data, partial);
        client.connect().await.unwrap();

        assert_eq!(
            client.download_waveform().await,
            Err(ViPenError::ReassemblyTimeout {
                collected: 12 + 5 * 150,
                expected: 3312,
            })
        );
        assert_eq!(transport.calls().last(), Some(&MockCall::Unsubscribe(p.wave_data)));
        assert_eq!(client.state(), SessionState::Ready);
        assert_eq!(client.statistics().captures_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_download_is_rejected() {
        let (transport, client) = setup();
        transport.respond_to_write(&[0x10, 0x00], profile().wave_data, capture_fragments());
        client.connect().await.unwrap();

        let (first, second) = tokio::join!(client.download_waveform(), client.download_waveform());
        assert_ok!(first);
        assert_eq!(second, Err(ViPenError::CaptureInProgress));

        // The flag is released once the first download finishes
        assert_ok!(client.download_waveform().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_user_data() {
        let (transport, client) = setup();
        let mut raw = vec![0x03, 0x34, 0x12];
        raw.extend_from_slice(&1_650_000_000u32.to_le_bytes());
        for value in [1234i16, -1, 0, 32767] {
            raw.extend_from_slice(&value.to_le_bytes());
        }
        transport.set_read_value(profile().user_data, raw);
        client.connect().await.unwrap();

        let record = client.read_user_data().await.unwrap();
        assert_eq!(record.address, 3);
        assert_eq!(record.id, 0x1234);
        assert_eq!(record.timestamp, 1_650_000_000);
        assert_eq!(record.values, [12.34, -0.01, 0.0, 327.67]);

        transport.set_read_value(profile().user_data, vec![0x03, 0x34]);
        assert!(matches!(
            client.read_user_data().await,
            Err(ViPenError::MalformedPayload { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_reconnects_once() {
        let (transport, client) = setup();
        let mut events = client.subscribe();
        let (lost_tx, mut lost_rx) = tokio::sync::mpsc::unbounded_channel();
        let _lost = client.on_link_lost(move || {
            let _ = lost_tx.send(());
        });
        let (error_tx, mut error_rx) = tokio::sync::mpsc::unbounded_channel();
        let _errors = client.on_error(move |e| {
            let _ = error_tx.send(e);
        });
        client.connect().await.unwrap();

        transport.drop_link();
        next_event(&mut events, |e| *e == ClientEvent::LinkLost).await;
        assert_eq!(client.state(), SessionState::Disconnected);
        assert_eq!(lost_rx.recv().await, Some(()));
        assert_eq!(error_rx.recv().await, Some(ViPenError::LinkLost));

        let mut state = client.watch_state();
        tokio::time::timeout(
            Duration::from_secs(10),
            state.wait_for(|s| *s == SessionState::Ready),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(transport.connect_count(), 2);
        let stats = client.statistics();
        assert_eq!(stats.link_losses, 1);
        assert_eq!(stats.reconnect_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_closes_dead_link() {
        let (transport, client) = setup();
        let mut events = client.subscribe();
        client.connect().await.unwrap();
        transport.clear_calls();

        transport.drop_link();
        next_event(&mut events, |e| *e == ClientEvent::LinkLost).await;
        assert_eq!(transport.calls(), vec![MockCall::Disconnect]);

        transport.clear_calls();
        client.disconnect().await;
        assert!(transport.calls().is_empty());
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_connect_cancels_scheduled_reconnect() {
        let (transport, client) = setup();
        let mut events = client.subscribe();
        client.connect().await.unwrap();

        transport.drop_link();
        next_event(&mut events, |e| *e == ClientEvent::LinkLost).await;
        assert_ok!(client.connect().await);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.connect_count(), 2);
        assert_eq!(client.state(), SessionState::Ready);
        assert_eq!(client.statistics().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_link_loss_reschedules_reconnect() {
        let (transport, client) = setup();
        let mut events = client.subscribe();
        client.connect().await.unwrap();

        transport.drop_link();
        next_event(&mut events, |e| *e == ClientEvent::LinkLost).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        transport.push_event(TransportEvent::Disconnected {
            device: "mock-vipen-1".to_string(),
        });

        // The first deadline has passed but the timer was pushed back
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.statistics().reconnect_attempts, 0);
        assert_eq!(transport.connect_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(client.statistics().reconnect_attempts, 1);
        assert_eq!(transport.connect_count(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let stats = client.statistics();
        assert_eq!(stats.reconnect_attempts, 1);
        assert_eq!(stats.link_losses, 1);
        assert_eq!(client.state(), SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_during_download() {
        let (transport, client) = setup();
        let p = profile();
        let partial: Vec<Vec<u8>> = capture_fragments().into_iter().take(6).collect();
        transport.respond_to_write(&[0x10, 0x00], p.wave_data, partial);
        client.connect().await.unwrap();

        let (result, _) = tokio::join!(client.download_waveform(), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            transport.clear_calls();
            transport.drop_link();
        });

        assert_eq!(result, Err(ViPenError::LinkLost));
        assert_eq!(client.state(), SessionState::Disconnected);
        // The unsubscribe is skipped on a dead link, then the link is closed
        assert_eq!(transport.calls(), vec![MockCall::Disconnect]);
        assert!(transport.subscribed().is_empty());
        let stats = client.statistics();
        assert_eq!(stats.captures_failed, 1);
        assert_eq!(stats.link_losses, 1);

        let mut state = client.watch_state();
        tokio::time::timeout(
            Duration::from_secs(10),
            state.wait_for(|s| *s == SessionState::Ready),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(client.statistics().reconnect_attempts, 1);
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_disconnect_cancels_reconnect() {
        let (transport, client) = setup();
        let mut events = client.subscribe();
        client.connect().await.unwrap();

        transport.drop_link();
        next_event(&mut events, |e| *e == ClientEvent::LinkLost).await;
        client.disconnect().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.connect_count(), 1);
        assert_eq!(client.state(), SessionState::Disconnected);
        assert_eq!(client.statistics().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_is_not_retried() {
        let (transport, client) = setup();
        let mut events = client.subscribe();
        client.connect().await.unwrap();
        transport.fail_next(MockOp::Discover, 100);

        transport.drop_link();
        next_event(&mut events, |e| *e == ClientEvent::LinkLost).await;
        let error = next_event(&mut events, |e| {
            matches!(e, ClientEvent::Error(err) if *err != ViPenError::LinkLost)
        })
        .await;
        assert_eq!(
            error,
            ClientEvent::Error(ViPenError::Transport("injected Discover failure".to_string()))
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(client.statistics().reconnect_attempts, 1);
        assert_eq!(client.state(), SessionState::Disconnected);
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_client_closes_link() {
        let (transport, client) = setup();
        client.connect().await.unwrap();
        assert!(transport.is_connected().await);

        drop(client);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = ClientBuilder::new(profile())
            .filters(Vec::new())
            .build(Arc::new(MockTransport::new()));
        assert_err!(result);

        let result = ClientBuilder::new(profile())
            .layout(WaveformLayout { header_len: 4 })
            .build(Arc::new(MockTransport::new()));
        assert!(matches!(result, Err(ViPenError::Config(_))));
    }
}
