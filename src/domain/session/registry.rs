//! Session registry
//!
//! Owns every live session and the lookup from transport handle to the leg
//! it belongs to. The registry is owned by the relay task; nothing here is
//! shared or locked.

use crate::domain::session::aggregate::Session;
use crate::domain::session::entity::Endpoint;
use crate::domain::session::value_object::LegRole;
use crate::domain::shared::error::ProxyError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{Handle, SessionId};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Session>,
    handles: HashMap<Handle, (SessionId, LegRole)>,
    last_id: u32,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> SessionId {
        loop {
            self.last_id = self.last_id.wrapping_add(1);
            let id = SessionId::new(self.last_id);
            if self.last_id != 0 && !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Create a session with an unknown identity.
    pub fn create(&mut self) -> SessionId {
        let id = self.allocate_id();
        self.sessions.insert(id, Session::new(id));
        id
    }

    /// Create a session for a known identity.
    pub fn create_with_identity(&mut self, identity: &str) -> SessionId {
        let id = self.allocate_id();
        self.sessions.insert(id, Session::with_identity(id, identity));
        id
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut Session> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| ProxyError::policy(format!("session {} not found", id)))
    }

    /// Newest session holding `identity`, compared case-insensitively.
    pub fn find_by_identity(&self, identity: &[u8]) -> Option<SessionId> {
        self.sessions
            .values()
            .rev()
            .find(|session| {
                session
                    .identity()
                    .is_some_and(|own| own.as_bytes().eq_ignore_ascii_case(identity))
            })
            .map(Session::id)
    }

    /// Session and role owning a transport handle.
    pub fn lookup(&self, handle: Handle) -> Option<(SessionId, LegRole)> {
        self.handles.get(&handle).copied()
    }

    pub fn attach(&mut self, id: SessionId, role: LegRole, endpoint: Endpoint) -> Result<()> {
        let handle = endpoint.handle();
        self.session_mut(id)?.attach(role, endpoint)?;
        self.handles.insert(handle, (id, role));
        Ok(())
    }

    pub fn detach(&mut self, id: SessionId, role: LegRole) -> Option<Endpoint> {
        let endpoint = self.sessions.get_mut(&id)?.detach(role)?;
        self.handles.remove(&endpoint.handle());
        Some(endpoint)
    }

    pub fn bind_identity(&mut self, id: SessionId, identity: &str) -> Result<()> {
        self.session_mut(id)?.bind_identity(identity)
    }

    /// Disconnect a session leg by leg and remove it.
    ///
    /// Legs are closed in [`LegRole::ALL`] order through `close`. Returns
    /// false if the session did not exist.
    pub fn teardown<F>(&mut self, id: SessionId, mut close: F) -> bool
    where
        F: FnMut(LegRole, Handle),
    {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        session.tear_down();

        for role in LegRole::ALL {
            if let Some(endpoint) = self.detach(id, role) {
                close(role, endpoint.handle());
            }
        }

        self.sessions.remove(&id);
        true
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
