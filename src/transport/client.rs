//! The client façade and its driver task.
//!
//! [`RaknetClient`] is a cheap handle: every operation is a command sent
//! to a driver task that owns the UDP socket, the connection state
//! (idle, handshaking, or connected) and the listener slot. The driver
//! multiplexes socket receives, commands and a timer tick in one
//! `select!` loop, so the receive path is strictly single-threaded.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace};

use crate::discovery::{DiscoveredServer, DiscoveryBus, DiscoveryMode, DiscoveryState};
use crate::error::RaknetError;
use crate::listener::ClientListener;
use crate::protocol::{
    ack::AckPayload,
    constants::{
        CUSTOM_PACKET_MAX, CUSTOM_PACKET_MIN, ID_ACK, ID_NAK, LOCAL_IP_ADDRESSES_V4,
        MAXIMUM_MTU_SIZE, SESSION_TICK_INTERVAL, UDP_HEADER_SIZE,
    },
    packet::{
        ConnectionRequest, ConnectionRequestAccepted, DecodeError, NewIncomingConnection, Packet,
        RaknetEncodable, RaknetPacket, UnconnectedPong,
    },
    reliability::Reliability,
    types::RaknetTime,
};
use crate::session::{Session, SessionEvent};
use crate::transport::{
    datagram::Datagram,
    handshake::{HandshakeAdvance, Preparation},
};

/// Construction options for [`RaknetClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Port pinged for LAN discovery; `None` disables discovery entirely.
    pub discovery_port: Option<u16>,
    /// How broadcast pings are issued while discovery is enabled.
    pub discovery_mode: DiscoveryMode,
    /// When set (the default) the driver ticks itself; otherwise the
    /// caller drives timers through [`RaknetClient::update`].
    pub threaded: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            discovery_port: None,
            discovery_mode: DiscoveryMode::AllConnections,
            threaded: true,
        }
    }
}

impl ClientConfig {
    pub fn with_discovery_port(mut self, port: u16) -> Self {
        self.discovery_port = Some(port);
        self
    }

    pub fn discovery_mode(mut self, mode: DiscoveryMode) -> Self {
        self.discovery_mode = mode;
        self
    }

    pub fn threaded(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }
}

enum Command {
    SetListener(Arc<dyn ClientListener>),
    SetDiscoveryMode(DiscoveryMode),
    Connect {
        addr: SocketAddr,
        done: oneshot::Sender<Result<(), RaknetError>>,
    },
    Disconnect {
        reason: String,
    },
    Send {
        reliability: Reliability,
        channel: u8,
        payload: Bytes,
        done: oneshot::Sender<Result<(), RaknetError>>,
    },
    Update,
    Close,
}

/// A RakNet client endpoint.
///
/// Dropping the handle (or calling [`RaknetClient::close`]) stops the
/// driver task, tears down any session and unregisters from the
/// discovery bus. Leaking the handle leaks the socket and the bus
/// registration with it.
pub struct RaknetClient {
    guid: u64,
    epoch: Instant,
    local_addr: SocketAddr,
    cmd_tx: mpsc::Sender<Command>,
    discovery: Option<Arc<DiscoveryState>>,
}

impl RaknetClient {
    /// Bind a UDP socket (broadcast on, address reuse off) and spawn the
    /// driver. With a discovery port configured, the client registers on
    /// the process-wide [`DiscoveryBus`].
    pub async fn bind(config: ClientConfig) -> std::io::Result<Self> {
        Self::bind_inner(config, None).await
    }

    /// Like [`RaknetClient::bind`], but register on an explicit bus.
    pub async fn bind_with_bus(config: ClientConfig, bus: &DiscoveryBus) -> std::io::Result<Self> {
        Self::bind_inner(config, Some(bus.clone())).await
    }

    async fn bind_inner(config: ClientConfig, bus: Option<DiscoveryBus>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let guid: u64 = rand::random();
        let epoch = Instant::now();
        let listener: Arc<RwLock<Option<Arc<dyn ClientListener>>>> = Arc::new(RwLock::new(None));
        let (cmd_tx, cmd_rx) = mpsc::channel(128);

        let (discovery, bus) = match config.discovery_port {
            Some(port) => {
                let bus = bus.unwrap_or_else(|| DiscoveryBus::global().clone());
                let state = Arc::new(DiscoveryState::new(
                    guid,
                    port,
                    epoch,
                    config.discovery_mode,
                    socket.clone(),
                    listener.clone(),
                ));
                bus.register(state.clone());
                (Some(state), Some(bus))
            }
            None => (None, None),
        };

        debug!(guid, %local_addr, "client bound");
        let driver = Driver {
            socket,
            guid,
            epoch,
            threaded: config.threaded,
            listener,
            state: ClientState::Idle,
            discovery: discovery.clone(),
            bus,
            cmd_rx,
            malformed: 0,
        };
        tokio::spawn(driver.run());

        Ok(Self {
            guid,
            epoch,
            local_addr,
            cmd_tx,
            discovery,
        })
    }

    pub fn guid(&self) -> u64 {
        self.guid
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Milliseconds since this client was constructed; the relative clock
    /// embedded in outgoing pings.
    pub fn timestamp(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Install the listener. Must happen before `connect`; discovery
    /// callbacks also stay silent until one is set.
    pub async fn set_listener(&self, listener: Arc<dyn ClientListener>) {
        let _ = self.cmd_tx.send(Command::SetListener(listener)).await;
    }

    pub async fn set_discovery_mode(&self, mode: DiscoveryMode) {
        let _ = self.cmd_tx.send(Command::SetDiscoveryMode(mode)).await;
    }

    /// Servers currently answering broadcast pings.
    pub fn discovered_servers(&self) -> Vec<DiscoveredServer> {
        self.discovery
            .as_ref()
            .map(|d| d.snapshot())
            .unwrap_or_default()
    }

    /// Run the handshake against `addr`. Resolves once the login is
    /// accepted, or with the failure reason. A concurrent
    /// [`RaknetClient::disconnect`] cancels the attempt.
    pub async fn connect(&self, addr: SocketAddr) -> Result<(), RaknetError> {
        let (done, outcome) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect { addr, done })
            .await
            .map_err(|_| RaknetError::Closed)?;
        outcome.await.map_err(|_| RaknetError::Closed)?
    }

    /// Queue a payload on the established session.
    pub async fn send(
        &self,
        reliability: Reliability,
        channel: u8,
        payload: impl Into<Bytes>,
    ) -> Result<(), RaknetError> {
        let (done, outcome) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                reliability,
                channel,
                payload: payload.into(),
                done,
            })
            .await
            .map_err(|_| RaknetError::Closed)?;
        outcome.await.map_err(|_| RaknetError::Closed)?
    }

    /// Leave the current session (or cancel a handshake in flight). A
    /// second call is a no-op.
    pub async fn disconnect(&self, reason: &str) {
        let _ = self
            .cmd_tx
            .send(Command::Disconnect {
                reason: reason.to_string(),
            })
            .await;
    }

    /// Drive timers once; only needed when the client was configured with
    /// `threaded = false`.
    pub async fn update(&self) {
        let _ = self.cmd_tx.send(Command::Update).await;
    }

    /// Stop the driver, tearing down the session and the discovery
    /// registration. Idempotent.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
    }
}

impl Drop for RaknetClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.try_send(Command::Close);
    }
}

enum ClientState {
    Idle,
    /// Handshake in flight; the session appears once REPLY_2 arrives and
    /// the login request is on the wire.
    Handshaking {
        prep: Preparation,
        session: Option<Session>,
    },
    Connected {
        session: Session,
    },
}

enum Route {
    Handshake,
    Session,
    Drop,
}

struct Driver {
    socket: Arc<UdpSocket>,
    guid: u64,
    epoch: Instant,
    threaded: bool,
    listener: Arc<RwLock<Option<Arc<dyn ClientListener>>>>,
    state: ClientState,
    discovery: Option<Arc<DiscoveryState>>,
    bus: Option<DiscoveryBus>,
    cmd_rx: mpsc::Receiver<Command>,
    malformed: u64,
}

/// What woke the driver loop; resolved inside `select!` so the handlers
/// below it can borrow the driver mutably.
enum Wake {
    Datagram(Bytes, SocketAddr),
    RecvError(std::io::Error),
    Command(Option<Command>),
    Tick,
}

impl Driver {
    async fn run(mut self) {
        let socket = Arc::clone(&self.socket);
        let mut buf = vec![0u8; MAXIMUM_MTU_SIZE as usize + UDP_HEADER_SIZE + 64];
        let mut tick = tokio::time::interval(SESSION_TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let wake = tokio::select! {
                res = socket.recv_from(&mut buf) => match res {
                    Ok((len, sender)) => Wake::Datagram(Bytes::copy_from_slice(&buf[..len]), sender),
                    Err(e) => Wake::RecvError(e),
                },
                cmd = self.cmd_rx.recv() => Wake::Command(cmd),
                _ = tick.tick(), if self.threaded => Wake::Tick,
            };

            match wake {
                Wake::Datagram(bytes, sender) => self.handle_datagram(bytes, sender).await,
                Wake::RecvError(e) => {
                    if e.kind() == std::io::ErrorKind::ConnectionReset {
                        // Windows ICMP port unreachable - ignore
                        continue;
                    }
                    self.handle_transport_error(None, e);
                }
                Wake::Command(Some(cmd)) => {
                    if self.handle_command(cmd).await {
                        break;
                    }
                }
                Wake::Command(None) => break,
                Wake::Tick => self.on_tick(Instant::now()).await,
            }
        }

        self.shutdown().await;
    }

    fn listener(&self) -> Option<Arc<dyn ClientListener>> {
        self.listener
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn note_malformed(&mut self, sender: SocketAddr, error: DecodeError) {
        self.malformed += 1;
        debug!(%sender, %error, count = self.malformed, "malformed packet dropped");
    }

    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::SetListener(listener) => {
                *self.listener.write().unwrap_or_else(|e| e.into_inner()) = Some(listener);
            }
            Command::SetDiscoveryMode(mode) => {
                if let Some(discovery) = &self.discovery {
                    discovery.set_mode(mode);
                }
            }
            Command::Connect { addr, done } => self.start_connect(addr, done).await,
            Command::Disconnect { reason } => {
                self.teardown_session(&reason, Instant::now()).await;
            }
            Command::Send {
                reliability,
                channel,
                payload,
                done,
            } => {
                let result = match &mut self.state {
                    ClientState::Connected { session } => session.send(reliability, channel, payload),
                    _ => Err(RaknetError::NotConnected),
                };
                let _ = done.send(result);
                self.update_session(Instant::now()).await;
            }
            Command::Update => self.on_tick(Instant::now()).await,
            Command::Close => return true,
        }
        false
    }

    async fn start_connect(
        &mut self,
        addr: SocketAddr,
        done: oneshot::Sender<Result<(), RaknetError>>,
    ) {
        if self.listener().is_none() {
            let _ = done.send(Err(RaknetError::NoListener));
            return;
        }
        if !matches!(self.state, ClientState::Idle) {
            let _ = done.send(Err(RaknetError::AlreadyConnected));
            return;
        }

        info!(%addr, "connecting");
        let now = Instant::now();
        self.state = ClientState::Handshaking {
            prep: Preparation::new(addr, self.guid, now, done),
            session: None,
        };
        self.drive_handshake(now).await;
    }

    async fn on_tick(&mut self, now: Instant) {
        let timed_out = matches!(
            &self.state,
            ClientState::Connected { session } if session.is_timed_out(now)
        );
        if timed_out {
            self.teardown_session("timeout", now).await;
            return;
        }

        match &self.state {
            ClientState::Handshaking { .. } => self.drive_handshake(now).await,
            ClientState::Connected { .. } => self.update_session(now).await,
            ClientState::Idle => {}
        }
    }

    async fn drive_handshake(&mut self, now: Instant) {
        let (packets, addr) = {
            let ClientState::Handshaking { prep, .. } = &mut self.state else {
                return;
            };
            (prep.poll(now), prep.addr)
        };
        for packet in packets {
            self.send_raw(&packet.to_bytes(), addr).await;
        }
        self.finish_failed_handshake();
        // The login phase retransmits CONNECTION_REQUEST via the session;
        // a failed attempt is already back to idle and emits nothing.
        self.update_session(now).await;
    }

    fn finish_failed_handshake(&mut self) {
        if matches!(&self.state, ClientState::Handshaking { prep, .. } if prep.is_failed()) {
            self.state = ClientState::Idle;
        }
    }

    async fn update_session(&mut self, now: Instant) {
        if let ClientState::Handshaking {
            session: Some(session),
            ..
        }
        | ClientState::Connected { session } = &mut self.state
        {
            session.update(now);
        }
        self.flush_session_output().await;
    }

    async fn flush_session_output(&mut self) {
        let (peer, out) = match &mut self.state {
            ClientState::Handshaking {
                session: Some(session),
                ..
            }
            | ClientState::Connected { session } => (session.peer(), session.take_outgoing()),
            _ => return,
        };
        for bytes in out {
            self.send_raw(&bytes, peer).await;
        }
    }

    async fn send_raw(&mut self, bytes: &[u8], target: SocketAddr) {
        let result = self.socket.send_to(bytes, target).await;
        if let Err(e) = result {
            self.handle_transport_error(Some(target), e);
        }
    }

    fn handle_transport_error(&mut self, addr: Option<SocketAddr>, err: std::io::Error) {
        error!(?addr, error = %err, "transport error");
        let err = RaknetError::Transport(err);
        if let Some(listener) = self.listener() {
            listener.on_handler_exception(addr, &err);
        }
        if let ClientState::Handshaking { prep, .. } = &mut self.state {
            prep.fail(err);
        }
        self.finish_failed_handshake();
    }

    async fn handle_datagram(&mut self, bytes: Bytes, sender: SocketAddr) {
        let Some(&id) = bytes.first() else {
            return;
        };

        // Discovery traffic is handled regardless of connection state.
        if id == UnconnectedPong::ID {
            let mut body = bytes.slice(1..);
            match UnconnectedPong::decode_body(&mut body) {
                Ok(pong) => {
                    if let Some(discovery) = &self.discovery {
                        discovery.handle_pong(sender, pong);
                    }
                }
                Err(e) => self.note_malformed(sender, e),
            }
            return;
        }

        let now = Instant::now();
        let is_session_traffic =
            (CUSTOM_PACKET_MIN..=CUSTOM_PACKET_MAX).contains(&id) || id == ID_ACK || id == ID_NAK;

        let route = match &self.state {
            ClientState::Handshaking { prep, session } if sender == prep.addr => {
                if is_session_traffic {
                    if session.is_some() {
                        Route::Session
                    } else {
                        Route::Drop
                    }
                } else {
                    Route::Handshake
                }
            }
            ClientState::Connected { session }
                if sender == session.peer() && is_session_traffic =>
            {
                Route::Session
            }
            _ => Route::Drop,
        };

        match route {
            Route::Handshake => self.handle_handshake_bytes(bytes, sender, now).await,
            Route::Session => self.handle_session_bytes(bytes, sender, now).await,
            Route::Drop => trace!(%sender, id, "unroutable packet dropped"),
        }
    }

    async fn handle_handshake_bytes(&mut self, bytes: Bytes, sender: SocketAddr, now: Instant) {
        let mut slice = bytes.clone();
        let packet = match RaknetPacket::decode(&mut slice) {
            Ok(packet) => packet,
            Err(e) => {
                self.note_malformed(sender, e);
                return;
            }
        };

        let advance = {
            let ClientState::Handshaking { prep, .. } = &mut self.state else {
                return;
            };
            prep.handle_packet(&packet, now)
        };

        if let Some(HandshakeAdvance::Ready { server_guid, mtu }) = advance {
            self.install_login_session(server_guid, mtu, now).await;
        }
        self.finish_failed_handshake();
        // A reply may have armed the next request; emit it now rather
        // than waiting out the tick.
        self.drive_handshake(now).await;
    }

    /// REPLY_2 arrived: create the session and put the login request on
    /// the wire under reliable-ordered delivery.
    async fn install_login_session(&mut self, server_guid: u64, mtu: u16, now: Instant) {
        let request = RaknetPacket::from(ConnectionRequest {
            client_guid: self.guid,
            timestamp: RaknetTime(now.duration_since(self.epoch).as_millis() as u64),
            secure: false,
        });

        {
            let ClientState::Handshaking { prep, session } = &mut self.state else {
                return;
            };
            let mut new_session = Session::new(prep.addr, server_guid, mtu, self.epoch, now);
            let _ = new_session.send_packet(&request, Reliability::ReliableOrdered, 0);
            *session = Some(new_session);
        }
        self.update_session(now).await;
    }

    /// CONNECTION_REQUEST_ACCEPTED arrived: answer with
    /// NEW_INCOMING_CONNECTION, promote the session and resolve the
    /// pending `connect` call.
    async fn complete_login(&mut self, accepted: ConnectionRequestAccepted, now: Instant) {
        let state = std::mem::replace(&mut self.state, ClientState::Idle);
        match state {
            ClientState::Handshaking {
                mut prep,
                session: Some(mut session),
            } => {
                let ack = RaknetPacket::from(NewIncomingConnection {
                    server_address: prep.addr,
                    system_addresses: LOCAL_IP_ADDRESSES_V4.map(SocketAddr::V4),
                    request_timestamp: accepted.accepted_timestamp,
                    accepted_timestamp: RaknetTime(
                        now.duration_since(self.epoch).as_millis() as u64
                    ),
                });
                let _ = session.send_packet(&ack, Reliability::ReliableOrdered, 0);

                let peer = session.peer();
                let mtu = session.mtu();
                prep.succeed();
                self.state = ClientState::Connected { session };
                info!(%peer, mtu, "connected");
                if let Some(listener) = self.listener() {
                    listener.on_connect(peer);
                }
                self.update_session(now).await;
            }
            other => self.state = other,
        }
    }

    async fn handle_session_bytes(&mut self, bytes: Bytes, sender: SocketAddr, now: Instant) {
        enum Inbound {
            Datagram(Datagram),
            Ack(AckPayload),
            Nak(AckPayload),
        }

        let id = bytes[0];
        let inbound = if id == ID_ACK || id == ID_NAK {
            let mut body = bytes.slice(1..);
            match AckPayload::decode_raknet(&mut body) {
                Ok(payload) if id == ID_ACK => Inbound::Ack(payload),
                Ok(payload) => Inbound::Nak(payload),
                Err(e) => {
                    self.note_malformed(sender, e);
                    return;
                }
            }
        } else {
            let mut slice = bytes.clone();
            match Datagram::decode(&mut slice) {
                Ok(dgram) => Inbound::Datagram(dgram),
                Err(e) => {
                    self.note_malformed(sender, e);
                    return;
                }
            }
        };

        let events = {
            let session = match &mut self.state {
                ClientState::Handshaking {
                    session: Some(session),
                    ..
                }
                | ClientState::Connected { session } => session,
                _ => return,
            };
            match inbound {
                Inbound::Datagram(dgram) => session.handle_datagram(dgram, now),
                Inbound::Ack(payload) => {
                    session.touch(now);
                    session.handle_ack(payload);
                    Vec::new()
                }
                Inbound::Nak(payload) => {
                    session.touch(now);
                    session.handle_nak(payload);
                    Vec::new()
                }
            }
        };

        self.process_session_events(events, now).await;
        self.update_session(now).await;
    }

    async fn process_session_events(&mut self, events: Vec<SessionEvent>, now: Instant) {
        for event in events {
            match event {
                SessionEvent::Packet {
                    payload,
                    reliability,
                    channel,
                } => {
                    if let Some(listener) = self.listener() {
                        listener.on_packet_receive(payload, reliability, channel);
                    }
                }
                SessionEvent::LoginAccepted(accepted) => self.complete_login(*accepted, now).await,
                SessionEvent::RemoteDisconnect => {
                    self.teardown_session("disconnected by server", now).await;
                }
            }
        }
    }

    /// Leave whatever connection state we are in: close an established
    /// session (flushing its goodbye), or cancel an in-flight handshake.
    async fn teardown_session(&mut self, reason: &str, now: Instant) {
        let state = std::mem::replace(&mut self.state, ClientState::Idle);
        match state {
            ClientState::Connected { mut session } => {
                let peer = session.peer();
                session.close(now);
                for bytes in session.take_outgoing() {
                    self.send_raw(&bytes, peer).await;
                }
                info!(%peer, reason, "session closed");
                if let Some(listener) = self.listener() {
                    listener.on_disconnect(peer, reason);
                }
            }
            ClientState::Handshaking { mut prep, .. } => {
                prep.fail(RaknetError::ConnectionCancelled(reason.to_string()));
            }
            ClientState::Idle => {}
        }
    }

    async fn shutdown(&mut self) {
        self.teardown_session("client closed", Instant::now()).await;
        if let Some(bus) = &self.bus {
            bus.unregister(self.guid);
        }
        debug!(guid = self.guid, malformed = self.malformed, "client driver stopped");
    }
}
