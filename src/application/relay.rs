//! Relay service
//!
//! Owns the session registry and the transport, and turns every transport
//! event into session state changes and rewritten, forwarded messages. Events
//! are handled one at a time, so a message is fully rewritten and sent (or
//! its session torn down) before the next event is looked at.

use super::dump;
use crate::domain::session::{Endpoint, LegRole, Protocol, Session, SessionRegistry, Side};
use crate::domain::shared::{AddrPort, Handle, ProxyError, Result, SessionId};
use crate::infrastructure::protocols::sip::{
    contact, FrameState, Message, Transport, TransportEvent,
};
use crate::interface::metrics;
use std::net::SocketAddrV4;
use tracing::{debug, info, trace};

const REGISTER: &[u8] = b"REGISTER";

/// Relay settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Call-control target all sessions are relayed to
    pub box_addr: SocketAddrV4,
    /// Dump messages received from or sent to the Fon
    pub dump_fon: bool,
    /// Dump messages received from or sent to the Box
    pub dump_box: bool,
}

impl RelayConfig {
    pub fn new(box_addr: SocketAddrV4) -> Self {
        Self {
            box_addr,
            dump_fon: false,
            dump_box: false,
        }
    }

    fn dumps(&self, side: Side) -> bool {
        match side {
            Side::Fon => self.dump_fon,
            Side::Box => self.dump_box,
        }
    }
}

/// Event loop driver
pub struct Relay<T: Transport> {
    transport: T,
    registry: SessionRegistry,
    config: RelayConfig,
    box_peer: AddrPort,
}

impl<T: Transport> Relay<T> {
    pub fn new(transport: T, config: RelayConfig) -> Self {
        Self {
            transport,
            registry: SessionRegistry::new(),
            box_peer: AddrPort::from(config.box_addr),
            config,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Serve events until the transport shuts down.
    ///
    /// Only a listening socket failure ends the loop with an error.
    pub async fn run(&mut self) -> Result<()> {
        info!("Relaying to Box {}", self.config.box_addr);

        while let Some(event) = self.transport.next_event().await {
            self.handle_event(event).await?;
        }
        Ok(())
    }

    pub async fn handle_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Accepted {
                handle,
                peer,
                local,
            } => self.on_accept(handle, peer, local).await,
            TransportEvent::Datagram { peer, local, bytes } => {
                self.on_datagram(peer, local, &bytes).await
            }
            TransportEvent::Data { handle, bytes } => self.on_data(handle, &bytes).await,
            TransportEvent::Closed { handle } => self.on_hangup(handle, None),
            TransportEvent::Failed { handle, error } => {
                self.on_hangup(handle, Some(ProxyError::Io(error)))
            }
            TransportEvent::ListenerFailed { error } => return Err(ProxyError::Io(error)),
        }
        Ok(())
    }

    async fn on_accept(&mut self, handle: Handle, peer: SocketAddrV4, local: SocketAddrV4) {
        let id = self.registry.create();
        debug!("[{}] Connect {}/tcp", id, peer);

        if let Err(e) = self.open_tcp_legs(id, handle, peer, local).await {
            debug!("[{}] Client initialization failed: {}", id, e);
            if self.registry.lookup(handle).is_none() {
                self.transport.close(handle);
            }
            self.disconnect(id);
        }
    }

    async fn open_tcp_legs(
        &mut self,
        id: SessionId,
        handle: Handle,
        peer: SocketAddrV4,
        local: SocketAddrV4,
    ) -> Result<()> {
        self.registry.attach(
            id,
            LegRole::FonTcp,
            Endpoint::new(handle, peer.into(), local.into()),
        )?;

        let link = self.transport.connect_tcp(self.config.box_addr).await?;
        let box_peer = self.box_peer.clone();
        self.attach_link(id, LegRole::BoxTcp, link.handle, box_peer, link.local, Message::new())?;

        self.mark_connected(id, Protocol::Tcp);
        Ok(())
    }

    fn attach_link(
        &mut self,
        id: SessionId,
        role: LegRole,
        handle: Handle,
        peer: AddrPort,
        local: SocketAddrV4,
        message: Message,
    ) -> Result<()> {
        let endpoint = Endpoint::with_message(handle, peer, local.into(), message);
        self.registry.attach(id, role, endpoint).inspect_err(|_| {
            self.transport.close(handle);
        })
    }

    fn mark_connected(&mut self, id: SessionId, protocol: Protocol) {
        if let Some(session) = self.registry.get_mut(id) {
            session.connect();
            metrics::record_session_connected(protocol);
            metrics::update_active_sessions(self.registry.len());
        }
    }

    async fn on_datagram(&mut self, peer: SocketAddrV4, local: SocketAddrV4, bytes: &[u8]) {
        if let Err(e) = self.accept_datagram(peer, local, bytes).await {
            trace!("Packet from {}/udp dropped: {}", peer, e);
            if e.is_malformed() {
                trace!("{}", dump::hex_prefix(bytes));
            }
            metrics::record_message_rejected(e.kind());
        }
    }

    /// Classify a datagram from the shared socket and set up its session.
    async fn accept_datagram(
        &mut self,
        peer: SocketAddrV4,
        local: SocketAddrV4,
        bytes: &[u8],
    ) -> Result<()> {
        let mut message = Message::new();
        match message.feed(bytes)? {
            FrameState::Ready => {}
            FrameState::Initial => return Ok(()),
            _ => return Err(ProxyError::malformed("incomplete datagram")),
        }

        let (span, header) = if message.is_request() {
            (message.fields().from, "From")
        } else {
            (message.fields().to, "To")
        };
        let identity = span
            .and_then(|span| contact::identity(message.span_bytes(span)))
            .map(|id| String::from_utf8_lossy(id).into_owned())
            .ok_or_else(|| ProxyError::policy(format!("failed to decode {} header", header)))?;

        let Some(id) = self.udp_session(&identity, peer, &message)? else {
            return Ok(());
        };

        if let Err(e) = self.open_udp_legs(id, peer, local, message).await {
            debug!("[{}] Client UDP initialization failed - disconnecting: {}", id, e);
            self.disconnect(id);
            return Err(e);
        }

        self.pump(id, LegRole::FonUdp, FrameState::Ready).await;
        Ok(())
    }

    /// Session a first datagram belongs to, creating it for a registration.
    ///
    /// `None` means the datagram is ignored because its session is being
    /// disconnected.
    fn udp_session(
        &mut self,
        identity: &str,
        peer: SocketAddrV4,
        message: &Message,
    ) -> Result<Option<SessionId>> {
        let existing = self.registry.find_by_identity(identity.as_bytes());

        let id = if message.method().eq_ignore_ascii_case(REGISTER) {
            let peer = AddrPort::from(peer);
            let known = existing.and_then(|id| {
                self.registry.get(id).map(|session| {
                    let same_leg = session
                        .leg(LegRole::FonUdp)
                        .is_some_and(|leg| leg.peer == peer);
                    (id, same_leg, session.is_connected())
                })
            });

            match known {
                Some((id, true, connected)) => {
                    if !connected {
                        return Ok(None);
                    }
                    id
                }
                Some((stale, false, connected)) => {
                    if connected {
                        debug!("[{}] Registration from {} replaces stale session", stale, peer);
                        self.disconnect(stale);
                    }
                    self.registry.create_with_identity(identity)
                }
                None => self.registry.create_with_identity(identity),
            }
        } else {
            let id = existing
                .ok_or_else(|| ProxyError::policy(format!("contact '{}' not found", identity)))?;
            let Some(session) = self.registry.get(id) else {
                return Ok(None);
            };
            if !session.is_connected() {
                return Ok(None);
            }
            if session.protocol() == Some(Protocol::Tcp) {
                return Err(ProxyError::policy(format!(
                    "contact '{}' is connected over TCP",
                    identity
                )));
            }
            id
        };

        if self
            .registry
            .get(id)
            .is_some_and(|session| session.has_leg(LegRole::FonUdp))
        {
            return Err(ProxyError::policy(format!(
                "contact '{}' already connected",
                identity
            )));
        }
        Ok(Some(id))
    }

    async fn open_udp_legs(
        &mut self,
        id: SessionId,
        peer: SocketAddrV4,
        local: SocketAddrV4,
        message: Message,
    ) -> Result<()> {
        let fon = self.transport.connect_udp(peer, Some(local)).await?;
        self.attach_link(id, LegRole::FonUdp, fon.handle, peer.into(), fon.local, message)?;

        let link = self.transport.connect_udp(self.config.box_addr, None).await?;
        let box_peer = self.box_peer.clone();
        self.attach_link(id, LegRole::BoxUdp, link.handle, box_peer, link.local, Message::new())?;

        if let Some(session) = self.registry.get(id).filter(|s| !s.is_connected()) {
            debug!(
                "[{}] Connect {}/udp, contact '{}'",
                id,
                peer,
                session.identity().unwrap_or_default()
            );
            self.mark_connected(id, Protocol::Udp);
        }
        Ok(())
    }

    async fn on_data(&mut self, handle: Handle, bytes: &[u8]) {
        let Some((id, role)) = self.registry.lookup(handle) else {
            trace!("Data on unknown leg {} ignored", handle);
            return;
        };

        match self.feed(id, role, bytes) {
            Ok(Some(state)) => self.pump(id, role, state).await,
            Ok(None) => {}
            Err(e) => self.fail(id, role, &e),
        }
    }

    /// Feed bytes to a leg's message; `None` if the session no longer relays.
    fn feed(&mut self, id: SessionId, role: LegRole, bytes: &[u8]) -> Result<Option<FrameState>> {
        let Some(session) = self.registry.get_mut(id).filter(|s| s.is_connected()) else {
            return Ok(None);
        };
        let Some(endpoint) = session.leg_mut(role) else {
            return Ok(None);
        };
        endpoint.message.feed(bytes).map(Some)
    }

    /// Relay every complete message buffered on a leg.
    async fn pump(&mut self, id: SessionId, role: LegRole, state: FrameState) {
        if let Err(e) = self.drain(id, role, state).await {
            self.fail(id, role, &e);
        }
    }

    async fn drain(&mut self, id: SessionId, role: LegRole, mut state: FrameState) -> Result<()> {
        loop {
            match state {
                FrameState::Ready => {
                    self.relay(id, role).await?;
                    match self.feed(id, role, &[])? {
                        Some(next) => state = next,
                        None => return Ok(()),
                    }
                }
                FrameState::Incomplete if role.protocol() == Protocol::Udp => {
                    return Err(ProxyError::malformed("incomplete datagram"));
                }
                _ => return Ok(()),
            }
        }
    }

    fn fail(&mut self, id: SessionId, role: LegRole, error: &ProxyError) {
        if let Some(leg) = self.registry.get(id).and_then(|session| session.leg(role)) {
            trace!(
                "[{}] Packet from {}/{} rejected - disconnecting: {}",
                id,
                leg.peer,
                role.protocol(),
                error
            );
            if error.is_malformed() {
                trace!("[{}] {}", id, dump::hex_prefix(leg.message.buffered()));
            }
        }
        metrics::record_message_rejected(error.kind());
        self.disconnect(id);
    }

    /// Rewrite the ready message on `from` and send it to the paired leg.
    async fn relay(&mut self, id: SessionId, from: LegRole) -> Result<()> {
        let to = from.peer();

        if self.config.dumps(from.side()) {
            if let Some(src) = self.registry.get(id).and_then(|s| s.leg(from)) {
                dump::log_message(
                    from.protocol(),
                    (Some(from.side()), &src.peer),
                    (None, &src.local),
                    src.message.as_bytes(),
                );
            }
        }

        match from.side() {
            Side::Fon => self.fon_to_box(id, from, to)?,
            Side::Box => self.box_to_fon(id, from, to)?,
        }

        let session = self
            .registry
            .get_mut(id)
            .ok_or_else(|| ProxyError::policy(format!("session {} not found", id)))?;
        let (src, dst) = session
            .leg_pair_mut(from, to)
            .ok_or_else(|| ProxyError::policy(format!("no {} leg", to)))?;

        src.message.resync_content_length()?;

        if self.config.dumps(to.side()) {
            dump::log_message(
                from.protocol(),
                (None, &dst.local),
                (Some(to.side()), &dst.peer),
                src.message.as_bytes(),
            );
        }

        self.transport
            .send(dst.handle(), src.message.as_bytes())
            .await?;
        metrics::record_message_relayed(from.side(), from.protocol());
        Ok(())
    }

    fn fon_to_box(&mut self, id: SessionId, from: LegRole, to: LegRole) -> Result<()> {
        let unbound = self
            .registry
            .get(id)
            .is_some_and(|session| session.identity().is_none());
        if unbound && from.protocol() == Protocol::Tcp {
            self.bind_tcp_contact(id, from)?;
        }

        let session = self
            .registry
            .get_mut(id)
            .ok_or_else(|| ProxyError::policy(format!("session {} not found", id)))?;
        let contact = session.contact().cloned();
        let relay = session.relay().cloned();
        let (src, dst) = session
            .leg_pair_mut(from, to)
            .ok_or_else(|| ProxyError::policy(format!("no {} leg", to)))?;

        let mut learned = None;
        if let Some(contact) = contact {
            src.message.rewrite_header_addresses(Some(&contact), &dst.local)?;
            src.message.rewrite_body_addresses(Some(&contact), &src.peer)?;
        } else if src.message.body_len() > 0 {
            let relay = match relay {
                Some(relay) => Some(relay),
                None => {
                    learned = src
                        .message
                        .first_foreign_body_address(&[&src.peer, &dst.peer]);
                    learned.clone()
                }
            };
            if let Some(relay) = relay {
                src.message.rewrite_body_addresses(Some(&relay), &src.peer)?;
            }
        }

        if let Some(relay) = learned {
            trace!("[{}] RTP peer {}", id, relay);
            session.set_relay(relay);
        }
        Ok(())
    }

    /// Resolve identity and contact address from the first TCP message.
    fn bind_tcp_contact(&mut self, id: SessionId, from: LegRole) -> Result<()> {
        let message = &self
            .registry
            .get(id)
            .and_then(|session| session.leg(from))
            .ok_or_else(|| ProxyError::policy(format!("no {} leg", from)))?
            .message;

        const REJECTED: &str = "First Fon TCP message not recognized";
        if !message.is_request() {
            return Err(ProxyError::policy(format!("{}, SIP method expected", REJECTED)));
        }
        let span = message
            .fields()
            .contact
            .ok_or_else(|| ProxyError::policy(format!("{}, Contact header expected", REJECTED)))?;
        let (identity, address) = contact::decode_contact(message.span_bytes(span)).ok_or_else(
            || ProxyError::policy(format!("{}, failed to decode Contact header", REJECTED)),
        )?;
        let identity = String::from_utf8_lossy(identity).into_owned();
        let method = String::from_utf8_lossy(message.method()).into_owned();

        let stale = self
            .registry
            .find_by_identity(identity.as_bytes())
            .filter(|&other| other != id);
        if let Some(stale) = stale {
            if self.registry.get(stale).is_some_and(Session::is_connected) {
                debug!("[{}] Disconnecting stale connection [{}]", id, stale);
                self.disconnect(stale);
            }
        }

        self.registry.bind_identity(id, &identity)?;
        trace!("[{}] {} Contact '{}' @{}", id, method, identity, address);
        if let Some(session) = self.registry.get_mut(id) {
            session.set_contact(address);
        }
        Ok(())
    }

    fn box_to_fon(&mut self, id: SessionId, from: LegRole, to: LegRole) -> Result<()> {
        let session = self
            .registry
            .get_mut(id)
            .ok_or_else(|| ProxyError::policy(format!("session {} not found", id)))?;
        let contact = session.contact().cloned();
        let relay = session.relay().cloned();
        let (src, dst) = session
            .leg_pair_mut(from, to)
            .ok_or_else(|| ProxyError::policy(format!("no {} leg", to)))?;

        src.message.rewrite_via_received_port(&dst.peer)?;

        if let Some(contact) = contact {
            src.message.rewrite_header_addresses(Some(&src.local), &contact)?;
            src.message.rewrite_body_addresses(Some(&dst.peer), &contact)?;
        } else if let Some(relay) = relay {
            src.message.rewrite_body_addresses(Some(&dst.peer), &relay)?;
        }
        Ok(())
    }

    fn on_hangup(&mut self, handle: Handle, error: Option<ProxyError>) {
        let Some((id, role)) = self.registry.lookup(handle) else {
            trace!("Hangup on unknown leg {} ignored", handle);
            return;
        };

        match error {
            Some(e) => debug!("[{}] {} leg failed: {}", id, role, e),
            None => debug!("[{}] {} leg closed", id, role),
        }
        self.disconnect(id);
    }

    /// Close every leg of a session and remove it.
    pub fn disconnect(&mut self, id: SessionId) {
        let transport = &mut self.transport;
        let removed = self.registry.teardown(id, |role, handle| {
            trace!("[{}] Closing {} leg {}", id, role, handle);
            transport.close(handle);
        });

        if removed {
            debug!("[{}] Disconnect", id);
            metrics::update_active_sessions(self.registry.len());
        }
    }
}
