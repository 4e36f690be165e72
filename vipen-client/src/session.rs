//! Session actor
//!
//! One task per client owns the link: the device handle, the resolved
//! characteristics, the state machine, the fragment reassembler and the
//! reconnect timer. Callers reach it through [`Command`]s on an mpsc
//! channel and get their answer on a oneshot. Unsolicited transport events
//! are handled in the same loop, so state changes never race.

use crate::config::ClientConfig;
use crate::events::ClientEvent;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use vipen_core::{
    decode_user_data, decode_waveform_capture, encode_command, encode_download_request, Opcode,
    UserDataRecord, ViPenError, ViPenResult, WaveformCapture,
};
use vipen_session::{
    FragmentReassembler, OperationExecutor, RetryPolicy, SessionState, SessionStatistics,
    SharedStatistics,
};
use vipen_transport::{
    CharacteristicHandle, DeviceHandle, GattTransport, ServiceHandle, TransportEvent, Uuid,
};

type Reply<T> = oneshot::Sender<ViPenResult<T>>;

/// Request sent from a client handle to its session actor
#[derive(Debug)]
pub(crate) enum Command {
    Connect(Reply<()>),
    Disconnect(oneshot::Sender<()>),
    Start(Reply<()>),
    Stop(Reply<()>),
    DownloadWaveform(Reply<WaveformCapture>),
    ReadUserData(Reply<UserDataRecord>),
}

/// Handles resolved during connection setup
#[derive(Debug, Clone, Copy)]
struct SessionHandles {
    service: ServiceHandle,
    reading: CharacteristicHandle,
    control: CharacteristicHandle,
    wave_data: CharacteristicHandle,
    user_data: CharacteristicHandle,
}

pub(crate) struct SessionActor {
    transport: Arc<dyn GattTransport>,
    config: ClientConfig,
    executor: OperationExecutor,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<ClientEvent>,
    statistics: SharedStatistics,
    transport_events: broadcast::Receiver<TransportEvent>,
    transport_events_open: bool,
    device: Option<DeviceHandle>,
    handles: Option<SessionHandles>,
    reassembler: FragmentReassembler,
    reconnect_at: Option<Instant>,
}

impl SessionActor {
    pub(crate) fn new(
        transport: Arc<dyn GattTransport>,
        config: ClientConfig,
        state: watch::Sender<SessionState>,
        events: broadcast::Sender<ClientEvent>,
        statistics: SharedStatistics,
    ) -> Self {
        let policy = RetryPolicy::new(config.timing.max_attempts, config.timing.backoff_step);
        let executor = OperationExecutor::new(policy).with_statistics(statistics.clone());
        let transport_events = transport.events();
        let reassembler = FragmentReassembler::new(config.layout.capture_len());
        Self {
            transport,
            config,
            executor,
            state,
            events,
            statistics,
            transport_events,
            transport_events_open: true,
            device: None,
            handles: None,
            reassembler,
            reconnect_at: None,
        }
    }

    /// Serve commands until every client handle is gone
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let reconnect_at = self.reconnect_at;
            let reconnect_due = async move {
                match reconnect_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = self.transport_events.recv(), if self.transport_events_open => {
                    self.handle_transport_event(event).await;
                }
                _ = reconnect_due => {
                    self.reconnect_at = None;
                    self.reconnect().await;
                }
            }
        }

        log::debug!("Client dropped, closing session");
        self.disconnect().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                let _ = reply.send(self.connect().await);
            }
            Command::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::Start(reply) => {
                let _ = reply.send(self.start_measurement().await);
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.stop_measurement().await);
            }
            Command::DownloadWaveform(reply) => {
                let _ = reply.send(self.download_waveform().await);
            }
            Command::ReadUserData(reply) => {
                let _ = reply.send(self.read_user_data().await);
            }
        }
    }

    async fn handle_transport_event(&mut self, event: Result<TransportEvent, RecvError>) {
        match event {
            Ok(TransportEvent::Disconnected { device }) => {
                if self.transport.is_connected().await {
                    log::debug!("Ignoring stale disconnect event for {}", device);
                    return;
                }
                self.on_link_lost().await;
            }
            // Readings are handled by the pipeline; wave fragments outside a capture are stale
            Ok(TransportEvent::Notification { .. }) => {}
            Err(RecvError::Lagged(missed)) => {
                log::debug!("Session skipped {} transport events", missed);
            }
            Err(RecvError::Closed) => {
                log::error!("Transport event channel closed");
                self.transport_events_open = false;
            }
        }
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&mut self, new_state: SessionState) {
        let current = self.current_state();
        if current == new_state {
            return;
        }
        if let Err(e) = current.validate_transition(new_state) {
            log::warn!("{}", e);
        }
        log::debug!("Session state: {} -> {}", current, new_state);
        self.state.send_replace(new_state);
        self.emit(ClientEvent::StateChanged(new_state));
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, f: impl FnOnce(&mut SessionStatistics)) {
        SessionStatistics::update(&self.statistics, f);
    }

    fn ready_handles(&self) -> ViPenResult<SessionHandles> {
        if !self.current_state().is_ready() {
            return Err(ViPenError::LinkNotReady);
        }
        self.handles.ok_or(ViPenError::LinkNotReady)
    }

    async fn connect(&mut self) -> ViPenResult<()> {
        self.reconnect_at = None;
        if self.current_state().is_ready() {
            log::debug!("Already connected");
            return Ok(());
        }

        match self.establish().await {
            Ok(device) => {
                log::info!("Connected to {}", device);
                self.emit(ClientEvent::Connected(device));
                Ok(())
            }
            Err(e) => {
                log::warn!("Connect failed: {}", e);
                self.release().await;
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> ViPenResult<DeviceHandle> {
        let transport = Arc::clone(&self.transport);
        let timing = self.config.timing.clone();

        self.set_state(SessionState::Discovering);
        let device = transport
            .discover(&self.config.filters, timing.discovery_timeout)
            .await?
            .ok_or(ViPenError::NoDeviceSelected)?;
        log::debug!("Selected {}", device);

        self.set_state(SessionState::Connecting);
        self.device = Some(device.clone());
        tokio::time::timeout(timing.connect_timeout, transport.connect(&device))
            .await
            .map_err(|_| ViPenError::ConnectTimeout(timing.connect_timeout))??;

        self.set_state(SessionState::ServiceResolving);
        let handles = self.resolve_handles().await?;
        log::debug!("Resolved service {}", handles.service.uuid);
        self.executor
            .execute(&*transport, "subscribe reading", || {
                transport.subscribe(&handles.reading)
            })
            .await?;
        self.handles = Some(handles);

        self.set_state(SessionState::Ready);
        Ok(device)
    }

    async fn resolve_handles(&self) -> ViPenResult<SessionHandles> {
        let transport = &*self.transport;
        let profile = self.config.profile;

        let service = self
            .executor
            .with_attempts(self.config.timing.service_resolve_attempts)
            .execute(transport, "resolve service", || {
                transport.resolve_service(profile.service)
            })
            .await?;

        let mut resolved = Vec::with_capacity(4);
        for (name, uuid) in profile.characteristics() {
            tokio::time::sleep(self.config.timing.characteristic_pacing).await;
            let operation = format!("resolve {} characteristic", name);
            let handle = self
                .executor
                .execute(transport, &operation, || {
                    transport.resolve_characteristic(&service, uuid)
                })
                .await?;
            resolved.push(handle);
        }

        let &[reading, control, wave_data, user_data] = resolved.as_slice() else {
            return Err(ViPenError::InvalidState(format!(
                "resolved {} characteristics",
                resolved.len()
            )));
        };
        Ok(SessionHandles {
            service,
            reading,
            control,
            wave_data,
            user_data,
        })
    }

    /// Drop every handle and close the link, ignoring failures
    async fn release(&mut self) {
        self.handles = None;
        self.device = None;
        self.reassembler.reset();
        if let Err(e) = self.transport.disconnect().await {
            log::debug!("Closing link failed: {}", e);
        }
    }

    async fn disconnect(&mut self) {
        self.reconnect_at = None;
        let state = self.current_state();
        if matches!(state, SessionState::Idle | SessionState::Disconnected) && self.handles.is_none() {
            self.set_state(SessionState::Disconnected);
            return;
        }

        if let Some(handles) = self.handles {
            if let Err(e) = self
                .transport
                .write(&handles.control, &encode_command(Opcode::Stop))
                .await
            {
                log::debug!("Stop on disconnect failed: {}", e);
            }
            if let Err(e) = self.transport.unsubscribe(&handles.reading).await {
                log::debug!("Unsubscribe on disconnect failed: {}", e);
            }
        }

        if let Some(device) = &self.device {
            log::info!("Disconnecting from {}", device);
        }
        self.release().await;
        self.set_state(SessionState::Disconnected);
    }

    /// Close the dead link and arm the one-shot reconnect
    async fn on_link_lost(&mut self) {
        let reconnect_at = Instant::now() + self.config.timing.reconnect_delay;
        match self.current_state() {
            SessionState::Idle => return,
            SessionState::Disconnected => {
                if self.reconnect_at.is_some() {
                    log::debug!("Link loss repeated, rescheduling reconnect");
                    self.reconnect_at = Some(reconnect_at);
                }
                return;
            }
            _ => {}
        }

        log::warn!("Link lost");
        self.release().await;
        self.record(|s| s.link_losses += 1);
        self.set_state(SessionState::Disconnected);
        self.emit(ClientEvent::LinkLost);
        self.emit(ClientEvent::Error(ViPenError::LinkLost));
        self.reconnect_at = Some(reconnect_at);
    }

    async fn reconnect(&mut self) {
        log::info!("Reconnecting");
        self.record(|s| s.reconnect_attempts += 1);
        if let Err(e) = self.connect().await {
            log::error!("Reconnect failed: {}", e);
            self.emit(ClientEvent::Error(e));
        }
    }

    async fn write_command(&self, handles: &SessionHandles, opcode: Opcode) -> ViPenResult<()> {
        let transport = &*self.transport;
        let frame = encode_command(opcode);
        let operation = format!("write {:?} command", opcode);
        self.executor
            .execute(transport, &operation, || transport.write(&handles.control, &frame))
            .await
    }

    async fn start_measurement(&mut self) -> ViPenResult<()> {
        let handles = self.ready_handles()?;
        // Resubscribing an active subscription is a no-op
        let transport = &*self.transport;
        self.executor
            .execute(transport, "subscribe reading", || {
                transport.subscribe(&handles.reading)
            })
            .await?;
        self.write_command(&handles, Opcode::Start).await?;
        self.set_state(SessionState::Streaming);
        Ok(())
    }

    async fn stop_measurement(&mut self) -> ViPenResult<()> {
        let handles = self.ready_handles()?;
        self.write_command(&handles, Opcode::Stop).await?;
        self.set_state(SessionState::Ready);
        Ok(())
    }

    async fn download_waveform(&mut self) -> ViPenResult<WaveformCapture> {
        let handles = self.ready_handles()?;
        let result = self.capture(&handles).await;

        let transport = &*self.transport;
        if let Err(e) = self
            .executor
            .execute(transport, "unsubscribe wave data", || {
                transport.unsubscribe(&handles.wave_data)
            })
            .await
        {
            log::debug!("Unsubscribe after capture failed: {}", e);
        }
        self.reassembler.reset();

        match &result {
            Ok(capture) => {
                log::info!(
                    "Waveform {} captured, {} samples",
                    capture.header.wave_id,
                    capture.sample_count()
                );
                self.record(|s| s.captures_completed += 1);
            }
            Err(e) => {
                log::warn!("Waveform capture failed: {}", e);
                self.record(|s| s.captures_failed += 1);
            }
        }
        if matches!(result, Err(ViPenError::LinkLost)) {
            self.on_link_lost().await;
        }
        result
    }

    async fn capture(&mut self, handles: &SessionHandles) -> ViPenResult<WaveformCapture> {
        let transport = Arc::clone(&self.transport);
        let timing = self.config.timing.clone();
        let layout = self.config.layout;

        self.executor
            .execute(&*transport, "subscribe wave data", || {
                transport.subscribe(&handles.wave_data)
            })
            .await?;
        tokio::time::sleep(timing.wave_settle_delay).await;
        self.discard_stale_events(handles.wave_data.uuid).await?;

        let request = encode_download_request();
        self.executor
            .execute(&*transport, "write download request", || {
                transport.write(&handles.control, &request)
            })
            .await?;

        let fragments = wave_fragments(&mut self.transport_events, handles.wave_data.uuid);
        self.reassembler
            .reassemble(fragments, timing.capture_timeout, |buf| {
                decode_waveform_capture(buf, layout)
            })
            .await
    }

    /// Drop wave fragments queued before the download request
    async fn discard_stale_events(&mut self, wave_data: Uuid) -> ViPenResult<()> {
        loop {
            match self.transport_events.try_recv() {
                Ok(TransportEvent::Notification { characteristic, .. }) if characteristic == wave_data => {
                    log::debug!("Discarding stale wave fragment");
                }
                Ok(TransportEvent::Notification { .. }) => {}
                Ok(TransportEvent::Disconnected { .. }) => {
                    if !self.transport.is_connected().await {
                        return Err(ViPenError::LinkLost);
                    }
                }
                Err(TryRecvError::Lagged(missed)) => {
                    log::debug!("Skipped {} transport events before capture", missed);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Ok(()),
            }
        }
    }

    async fn read_user_data(&mut self) -> ViPenResult<UserDataRecord> {
        let handles = self.ready_handles()?;
        let transport = &*self.transport;
        let raw = self
            .executor
            .execute(transport, "read user data", || transport.read(&handles.user_data))
            .await?;
        decode_user_data(&raw)
    }
}

/// Wave data notifications from `events`, ending when the link drops
fn wave_fragments(
    events: &mut broadcast::Receiver<TransportEvent>,
    wave_data: Uuid,
) -> impl Stream<Item = Vec<u8>> + '_ {
    futures::stream::unfold(events, move |events| async move {
        loop {
            match events.recv().await {
                Ok(TransportEvent::Notification {
                    characteristic,
                    value,
                }) if characteristic == wave_data => return Some((value, events)),
                Ok(TransportEvent::Notification { .. }) => {}
                Ok(TransportEvent::Disconnected { device }) => {
                    log::warn!("{} disconnected during capture", device);
                    return None;
                }
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Capture lagged, {} transport events skipped", missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}
