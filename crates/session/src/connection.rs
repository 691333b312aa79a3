//! The per-connection event loop.
//!
//! One driver exists per connected peripheral and owns every piece of
//! protocol state for it: the version resolver, the message stream, the
//! secure channel inside the active helper, and — once secured — the query
//! correlation and observer tables. All events funnel through this single
//! context, so none of the protocol machines need locks or back-references.
//!
//! The driver is synchronous and event-fed; [`ConnectionDriver::run`] wraps
//! it in a tokio task for production use, and tests drive the `handle_*`
//! methods directly.

use std::collections::HashMap;
use std::sync::Arc;

use carlink_core::events::SessionEvent;
use carlink_core::{Car, CarId, DeviceId, MessageParams};
use carlink_crypto::{OobToken, Ukey2Provider};
use carlink_keychain::CredentialStore;
use carlink_proto::{Message, OperationType, Query, QueryResponse};
use carlink_transport::{
    ConnectionState, MessageStream, Peripheral, PeripheralEvent, ResolutionStep, StreamEvent,
    VersionResolver,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::association::{AssociationHelper, HelperAction};
use crate::error::AssociationError;
use crate::reconnection::{match_advertisement, ReconnectionHelper};
use crate::secured_channel::{
    ChannelCommand, MessageHandler, SecuredChannel, SecuredChannelError,
};

/// What this connection attempt is for
pub enum ConnectionMode {
    /// First-time pairing.
    Associate { oob_token: Option<OobToken> },

    /// Reestablish a session with a known car from its advertisement.
    Reconnect { advertisement: Vec<u8> },
}

enum ActiveHelper {
    Association(AssociationHelper),
    Reconnection(ReconnectionHelper),
}

enum DriverPhase {
    Idle,
    ResolvingVersions { resolver: VersionResolver },
    Running { helper: ActiveHelper },
    Secured { car: Car },
    Failed,
}

/// Event loop state for one connection.
pub struct ConnectionDriver {
    peripheral: Arc<dyn Peripheral>,
    provider: Arc<dyn Ukey2Provider>,
    store: Arc<dyn CredentialStore>,
    device_id: DeviceId,
    mode: ConnectionMode,
    session_events: mpsc::UnboundedSender<SessionEvent>,

    phase: DriverPhase,
    stream: Option<MessageStream>,
    stream_events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    /// Car matched from the advertisement, before the helper exists.
    reconnect_car: Option<Car>,

    commands_tx: mpsc::UnboundedSender<ChannelCommand>,
    commands_rx: Option<mpsc::UnboundedReceiver<ChannelCommand>>,
    observers: HashMap<Uuid, MessageHandler>,
    pending_queries: HashMap<i32, tokio::sync::oneshot::Sender<
        std::result::Result<Vec<u8>, SecuredChannelError>,
    >>,
    next_query_id: i32,
    feature_status: Option<Vec<u8>>,
}

impl ConnectionDriver {
    pub fn new(
        peripheral: Arc<dyn Peripheral>,
        provider: Arc<dyn Ukey2Provider>,
        store: Arc<dyn CredentialStore>,
        device_id: DeviceId,
        mode: ConnectionMode,
        session_events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            peripheral,
            provider,
            store,
            device_id,
            mode,
            session_events,
            phase: DriverPhase::Idle,
            stream: None,
            stream_events: None,
            reconnect_car: None,
            commands_tx,
            commands_rx: Some(commands_rx),
            observers: HashMap::new(),
            pending_queries: HashMap::new(),
            next_query_id: 0,
            feature_status: None,
        }
    }

    /// Begin the attempt: match the advertisement (when reconnecting) and
    /// open version negotiation.
    pub fn start(&mut self) {
        if let ConnectionMode::Reconnect { advertisement } = &self.mode {
            match match_advertisement(self.store.as_ref(), advertisement) {
                Ok(car) => self.reconnect_car = Some(car),
                Err(e) => {
                    self.fail(e.to_string());
                    return;
                }
            }
        }

        if let Err(e) = self.peripheral.write_value(&VersionResolver::request_bytes()) {
            self.fail(format!("cannot open version exchange: {e}"));
            return;
        }
        self.phase = DriverPhase::ResolvingVersions {
            resolver: VersionResolver::new(),
        };
    }

    /// The secured channel handle, once the attempt completed.
    pub fn secured_channel(&self) -> Option<SecuredChannel> {
        let DriverPhase::Secured { car } = &self.phase else {
            return None;
        };
        Some(SecuredChannel::new(
            car.clone(),
            self.commands_tx.clone(),
            self.feature_status.clone(),
        ))
    }

    /// Feed one event from the GATT layer.
    pub fn handle_peripheral_event(&mut self, event: PeripheralEvent) {
        let disconnected =
            matches!(event, PeripheralEvent::StateChanged(ConnectionState::Disconnected));

        match &mut self.phase {
            DriverPhase::ResolvingVersions { resolver } => {
                if disconnected {
                    self.on_disconnect();
                    return;
                }
                if let PeripheralEvent::ValueUpdated(bytes) = event {
                    match resolver.handle_response(&bytes) {
                        Ok(ResolutionStep::AwaitingCapabilities(_)) => {}
                        Ok(ResolutionStep::Resolved(resolved)) => {
                            self.on_versions_resolved(resolved);
                        }
                        Err(e) => self.fail(e.to_string()),
                    }
                }
            }
            DriverPhase::Running { .. } | DriverPhase::Secured { .. } => {
                if let Some(stream) = self.stream.as_mut() {
                    stream.handle_event(event);
                }
                self.drain_stream_events();
                if disconnected {
                    self.on_disconnect();
                }
            }
            DriverPhase::Idle | DriverPhase::Failed => {}
        }
    }

    /// Feed one request from a `SecuredChannel` handle.
    pub fn handle_command(&mut self, command: ChannelCommand) {
        if !matches!(self.phase, DriverPhase::Secured { .. }) {
            if let ChannelCommand::Query { respond_to, .. } = command {
                let _ = respond_to.send(Err(SecuredChannelError::ConnectionClosed));
            }
            return;
        }

        match command {
            ChannelCommand::Send { payload, params } => {
                if let Some(stream) = self.stream.as_mut() {
                    if let Err(e) = stream.write_encrypted_message(payload, params) {
                        warn!(error = %e, "secured send failed");
                    }
                }
            }
            ChannelCommand::Query {
                recipient,
                request,
                respond_to,
            } => {
                let id = self.next_query_id;
                self.next_query_id = self.next_query_id.wrapping_add(1);

                let query = Query {
                    id,
                    sender: recipient.as_bytes().to_vec(),
                    request,
                };
                let params = MessageParams::new(recipient, OperationType::Query);
                let written = self
                    .stream
                    .as_mut()
                    .map(|stream| stream.write_encrypted_message(query.encode_to_vec(), params));
                match written {
                    Some(Ok(())) => {
                        self.pending_queries.insert(id, respond_to);
                    }
                    _ => {
                        let _ = respond_to.send(Err(SecuredChannelError::ConnectionClosed));
                    }
                }
            }
            ChannelCommand::Observe { recipient, handler } => {
                self.observers.insert(recipient, handler);
            }
        }
    }

    /// Run the loop on tokio until the peripheral's event source closes.
    pub async fn run(mut self, mut peripheral_events: mpsc::UnboundedReceiver<PeripheralEvent>) {
        let Some(mut commands) = self.commands_rx.take() else {
            return;
        };
        self.start();

        loop {
            tokio::select! {
                event = peripheral_events.recv() => match event {
                    Some(event) => self.handle_peripheral_event(event),
                    None => break,
                },
                command = commands.recv() => {
                    if let Some(command) = command {
                        self.handle_command(command);
                    }
                }
            }
        }
    }

    fn on_versions_resolved(&mut self, resolved: carlink_transport::ResolvedVersions) {
        info!(
            stream_version = ?resolved.stream_version,
            security_version = %resolved.security_version,
            "versions resolved"
        );
        let _ = self.session_events.send(SessionEvent::StreamEstablished {
            security_version: resolved.security_version,
        });

        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        self.stream = Some(MessageStream::new(
            self.peripheral.clone(),
            resolved.stream_version,
            stream_tx,
        ));
        self.stream_events = Some(stream_rx);

        let helper = match &mut self.mode {
            ConnectionMode::Associate { oob_token } => {
                ActiveHelper::Association(AssociationHelper::new(
                    resolved.security_version,
                    carlink_channel::SecureBleChannel::for_stream_version(resolved.stream_version),
                    self.provider.clone(),
                    self.store.clone(),
                    self.device_id,
                    oob_token.take(),
                ))
            }
            ConnectionMode::Reconnect { .. } => {
                let Some(car) = self.reconnect_car.clone() else {
                    self.fail("no matched car for reconnection".to_string());
                    return;
                };
                match ReconnectionHelper::new(
                    car,
                    resolved.stream_version,
                    self.provider.clone(),
                    self.store.clone(),
                ) {
                    Ok(helper) => ActiveHelper::Reconnection(helper),
                    Err(e) => {
                        self.fail(e.to_string());
                        return;
                    }
                }
            }
        };
        self.phase = DriverPhase::Running { helper };

        let started = match &mut self.phase {
            DriverPhase::Running { helper } => match helper {
                ActiveHelper::Association(h) => h.start().map_err(|e| e.to_string()),
                ActiveHelper::Reconnection(h) => h.start().map_err(|e| e.to_string()),
            },
            _ => return,
        };
        match started {
            Ok(actions) => self.execute_actions(actions),
            Err(reason) => self.fail(reason),
        }
    }

    fn drain_stream_events(&mut self) {
        let Some(mut events) = self.stream_events.take() else {
            return;
        };
        while let Ok(event) = events.try_recv() {
            self.on_stream_event(event);
        }
        self.stream_events = Some(events);
    }

    fn on_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::MessageReceived { payload, params } => match &mut self.phase {
                DriverPhase::Running { helper } => {
                    let handled = match helper {
                        ActiveHelper::Association(h) => h
                            .handle_stream_message(&payload, params)
                            .map_err(|e| e.to_string()),
                        ActiveHelper::Reconnection(h) => h
                            .handle_stream_message(&payload, params)
                            .map_err(|e| e.to_string()),
                    };
                    match handled {
                        Ok(actions) => self.execute_actions(actions),
                        Err(reason) => self.fail(reason),
                    }
                }
                DriverPhase::Secured { .. } => self.route_secured_message(payload, params),
                _ => {}
            },
            StreamEvent::MessageWritten { recipient } => {
                debug!(%recipient, "message written");
            }
            StreamEvent::WriteError { recipient, reason } => match &self.phase {
                DriverPhase::Running {
                    helper: ActiveHelper::Association(_),
                } => {
                    // Losing a write mid-association means the head unit may
                    // never learn our credentials.
                    self.fail(AssociationError::CannotStoreAssociation.to_string());
                }
                DriverPhase::Running { .. } => self.fail(reason),
                _ => warn!(%recipient, %reason, "write failed"),
            },
            StreamEvent::UnrecoverableError { reason } => self.fail(reason),
        }
    }

    fn execute_actions(&mut self, actions: Vec<HelperAction>) {
        for action in actions {
            match action {
                HelperAction::SendMessage { payload, params } => {
                    let result = self
                        .stream
                        .as_mut()
                        .map(|stream| stream.write_message(payload, params));
                    if !matches!(result, Some(Ok(()))) {
                        self.fail("cannot write to the stream".to_string());
                        return;
                    }
                }
                HelperAction::SendEncryptedMessage { payload, params } => {
                    let result = self
                        .stream
                        .as_mut()
                        .map(|stream| stream.write_encrypted_message(payload, params));
                    if !matches!(result, Some(Ok(()))) {
                        self.fail("cannot write to the stream".to_string());
                        return;
                    }
                }
                HelperAction::InstallEncryptor(cipher) => {
                    if let Some(stream) = self.stream.as_mut() {
                        stream.set_encryptor(Box::new(cipher));
                    }
                }
                HelperAction::DisplayPairingCode(code) => {
                    let _ = self
                        .session_events
                        .send(SessionEvent::PairingCodeAvailable { code });
                }
                HelperAction::Completed { car } => self.on_completed(car),
            }
        }
    }

    fn on_completed(&mut self, car: Car) {
        let reconnected = matches!(
            self.phase,
            DriverPhase::Running {
                helper: ActiveHelper::Reconnection(_)
            }
        );

        self.feature_status = self
            .store
            .get_record(&car.id)
            .ok()
            .and_then(|record| record.feature_status.clone());

        let event = if reconnected {
            SessionEvent::Reconnected { car: car.clone() }
        } else {
            SessionEvent::AssociationCompleted { car: car.clone() }
        };
        let _ = self.session_events.send(event);

        info!(car_id = %car.id, reconnected, "connection secured");
        self.phase = DriverPhase::Secured { car };
    }

    fn route_secured_message(&mut self, payload: Vec<u8>, params: MessageParams) {
        if params.operation == OperationType::QueryResponse {
            let Ok(response) = QueryResponse::decode(payload.as_slice()) else {
                warn!("undecodable query response");
                return;
            };
            let Some(respond_to) = self.pending_queries.remove(&response.query_id) else {
                debug!(query_id = response.query_id, "response for unknown query");
                return;
            };
            let result = if response.is_successful {
                Ok(response.response)
            } else {
                Err(SecuredChannelError::QueryFailed)
            };
            let _ = respond_to.send(result);
            return;
        }

        match self.observers.get_mut(&params.recipient) {
            Some(handler) => handler(payload, params),
            None => debug!(recipient = %params.recipient, "message for unobserved recipient"),
        }
    }

    fn on_disconnect(&mut self) {
        let _ = self.session_events.send(SessionEvent::Disconnected);
        self.abort_pending_queries();
        self.phase = DriverPhase::Failed;
    }

    fn fail(&mut self, reason: String) {
        if matches!(self.phase, DriverPhase::Failed) {
            return;
        }
        warn!(%reason, "connection attempt failed");

        let car_id: Option<CarId> = match &self.phase {
            DriverPhase::Secured { car } => Some(car.id.clone()),
            _ => self.reconnect_car.as_ref().map(|car| car.id.clone()),
        };
        let _ = self
            .session_events
            .send(SessionEvent::AttemptFailed { car_id, reason });

        if let Some(stream) = self.stream.as_mut() {
            stream.invalidate();
        }
        self.abort_pending_queries();
        self.phase = DriverPhase::Failed;
    }

    fn abort_pending_queries(&mut self) {
        for (_, respond_to) in self.pending_queries.drain() {
            let _ = respond_to.send(Err(SecuredChannelError::ConnectionClosed));
        }
    }
}
