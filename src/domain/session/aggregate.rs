//! Session aggregate root

use crate::domain::session::entity::Endpoint;
use crate::domain::session::value_object::{LegRole, Protocol, SessionState};
use crate::domain::shared::error::ProxyError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AddrPort, SessionId};

/// One device's NAT mapping
///
/// A session owns up to four legs. It relays over either its TCP pair or its
/// UDP pair, never both, and is connected only while that pair is complete.
#[derive(Debug)]
pub struct Session {
    /// Aggregate root ID
    id: SessionId,
    /// Contact identity, immutable once set
    identity: Option<String>,
    state: SessionState,
    connected: bool,
    /// Legs indexed by [`LegRole::index`]
    legs: [Option<Endpoint>; 4],
    /// Address the device announced in its first TCP `Contact`
    contact: Option<AddrPort>,
    /// Media relay address learned from the first UDP body
    relay: Option<AddrPort>,
}

impl Session {
    /// Create a session whose identity is resolved from its first message
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            identity: None,
            state: SessionState::Pending,
            connected: false,
            legs: Default::default(),
            contact: None,
            relay: None,
        }
    }

    /// Create a session for an identity that is already known
    pub fn with_identity(id: SessionId, identity: impl Into<String>) -> Self {
        let mut session = Self::new(id);
        session.identity = Some(identity.into());
        session.state = SessionState::Bound;
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Mark the active leg pair as established.
    pub fn connect(&mut self) {
        if self.state != SessionState::TornDown {
            self.connected = true;
        }
    }

    /// Set the contact identity. Fails if one is already set.
    pub fn bind_identity(&mut self, identity: impl Into<String>) -> Result<()> {
        if !self.state.can_transition_to(SessionState::Bound) || self.identity.is_some() {
            return Err(ProxyError::policy(format!(
                "session {} already bound to '{}'",
                self.id,
                self.identity.as_deref().unwrap_or_default()
            )));
        }

        self.identity = Some(identity.into());
        self.state = SessionState::Bound;
        Ok(())
    }

    /// Stop relaying; the session is disconnected from now on.
    pub fn tear_down(&mut self) {
        self.connected = false;
        self.state = SessionState::TornDown;
    }

    pub fn contact(&self) -> Option<&AddrPort> {
        self.contact.as_ref()
    }

    pub fn set_contact(&mut self, contact: AddrPort) {
        self.contact = Some(contact);
    }

    pub fn relay(&self) -> Option<&AddrPort> {
        self.relay.as_ref()
    }

    pub fn set_relay(&mut self, relay: AddrPort) {
        self.relay = Some(relay);
    }

    pub fn leg(&self, role: LegRole) -> Option<&Endpoint> {
        self.legs[role.index()].as_ref()
    }

    pub fn leg_mut(&mut self, role: LegRole) -> Option<&mut Endpoint> {
        self.legs[role.index()].as_mut()
    }

    pub fn has_leg(&self, role: LegRole) -> bool {
        self.legs[role.index()].is_some()
    }

    /// Protocol of the legs this session holds, if any
    pub fn protocol(&self) -> Option<Protocol> {
        LegRole::ALL
            .into_iter()
            .find(|role| self.has_leg(*role))
            .map(|role| role.protocol())
    }

    /// Install a leg. Fails if the slot is taken or the other pair is in use.
    pub fn attach(&mut self, role: LegRole, endpoint: Endpoint) -> Result<()> {
        if self.has_leg(role) {
            return Err(ProxyError::policy(format!(
                "session {} already has a {} leg",
                self.id, role
            )));
        }
        if self.protocol().is_some_and(|protocol| protocol != role.protocol()) {
            return Err(ProxyError::policy(format!(
                "session {} cannot mix TCP and UDP legs",
                self.id
            )));
        }

        self.legs[role.index()] = Some(endpoint);
        Ok(())
    }

    pub fn detach(&mut self, role: LegRole) -> Option<Endpoint> {
        self.legs[role.index()].take()
    }

    /// Sending and receiving leg of one relay direction.
    pub fn leg_pair_mut(
        &mut self,
        from: LegRole,
        to: LegRole,
    ) -> Option<(&mut Endpoint, &mut Endpoint)> {
        let (i, j) = (from.index(), to.index());
        if i == j {
            return None;
        }

        let (low, high) = self.legs.split_at_mut(i.max(j));
        let (first, second) = (low[i.min(j)].as_mut()?, high[0].as_mut()?);
        Some(if i < j { (first, second) } else { (second, first) })
    }
}
