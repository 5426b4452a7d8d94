//! Session value objects

use std::fmt;

/// Side of the relay a leg belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Mobile client
    Fon,
    /// Call-control target
    Box,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Fon => "Fon",
            Side::Box => "Box",
        }
    }
}

/// Transport protocol of a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of one of the four legs a session can own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegRole {
    FonTcp,
    FonUdp,
    BoxTcp,
    BoxUdp,
}

impl LegRole {
    /// Teardown order: client legs first, then the target legs.
    pub const ALL: [LegRole; 4] = [
        LegRole::FonTcp,
        LegRole::FonUdp,
        LegRole::BoxTcp,
        LegRole::BoxUdp,
    ];

    pub fn side(&self) -> Side {
        match self {
            LegRole::FonTcp | LegRole::FonUdp => Side::Fon,
            LegRole::BoxTcp | LegRole::BoxUdp => Side::Box,
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            LegRole::FonTcp | LegRole::BoxTcp => Protocol::Tcp,
            LegRole::FonUdp | LegRole::BoxUdp => Protocol::Udp,
        }
    }

    /// The leg messages from this leg are relayed to.
    pub fn peer(&self) -> LegRole {
        match self {
            LegRole::FonTcp => LegRole::BoxTcp,
            LegRole::FonUdp => LegRole::BoxUdp,
            LegRole::BoxTcp => LegRole::FonTcp,
            LegRole::BoxUdp => LegRole::FonUdp,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            LegRole::FonTcp => 0,
            LegRole::FonUdp => 1,
            LegRole::BoxTcp => 2,
            LegRole::BoxUdp => 3,
        }
    }
}

impl fmt::Display for LegRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}",
            self.side().as_str().to_lowercase(),
            self.protocol().as_str().to_lowercase()
        )
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Contact identity not known yet
    Pending,
    /// Contact identity known
    Bound,
    /// Being disconnected; no further messages are relayed
    TornDown,
}

impl SessionState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, new_state),
            (Pending, Bound) | (Pending, TornDown) | (Bound, TornDown)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leg_role_pairs() {
        for role in LegRole::ALL {
            assert_eq!(role.peer().peer(), role);
            assert_ne!(role.peer().side(), role.side());
            assert_eq!(role.peer().protocol(), role.protocol());
        }
    }

    #[test]
    fn test_leg_role_display() {
        assert_eq!(LegRole::FonUdp.to_string(), "fon.udp");
        assert_eq!(LegRole::BoxTcp.to_string(), "box.tcp");
    }

    #[test]
    fn test_state_transitions() {
        assert!(SessionState::Pending.can_transition_to(SessionState::Bound));
        assert!(SessionState::Bound.can_transition_to(SessionState::TornDown));
        assert!(!SessionState::TornDown.can_transition_to(SessionState::Bound));
        assert!(!SessionState::Bound.can_transition_to(SessionState::Pending));
    }
}
