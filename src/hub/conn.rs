use std::collections::HashSet;

/// Lifecycle of one socket connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated { user_id: String },
    Joined { user_id: String, rooms: HashSet<String> },
    Disconnected,
}

impl ConnectionState {
    pub fn authenticate(&mut self, user_id: &str) -> bool {
        if !matches!(self, ConnectionState::Connecting) {
            return false;
        }
        *self = ConnectionState::Authenticated { user_id: user_id.to_owned() };
        true
    }

    /// Returns true if the room was not joined before.
    pub fn join(&mut self, room_id: &str) -> bool {
        match self {
            ConnectionState::Authenticated { user_id } => {
                let user_id = std::mem::take(user_id);
                *self = ConnectionState::Joined {
                    user_id,
                    rooms: HashSet::from([room_id.to_owned()]),
                };
                true
            }
            ConnectionState::Joined { rooms, .. } => rooms.insert(room_id.to_owned()),
            ConnectionState::Connecting | ConnectionState::Disconnected => false,
        }
    }

    /// Returns true if the room was joined.
    pub fn leave(&mut self, room_id: &str) -> bool {
        let ConnectionState::Joined { user_id, rooms } = self else {
            return false;
        };
        if !rooms.remove(room_id) {
            return false;
        }
        if rooms.is_empty() {
            let user_id = std::mem::take(user_id);
            *self = ConnectionState::Authenticated { user_id };
        }
        true
    }

    pub fn has_joined(&self, room_id: &str) -> bool {
        matches!(self, ConnectionState::Joined { rooms, .. } if rooms.contains(room_id))
    }

    pub fn rooms(&self) -> Vec<String> {
        match self {
            ConnectionState::Joined { rooms, .. } => rooms.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Moves to `Disconnected`, handing back the rooms that were joined.
    pub fn close(&mut self) -> Vec<String> {
        let rooms = self.rooms();
        *self = ConnectionState::Disconnected;
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_the_happy_path() {
        let mut state = ConnectionState::Connecting;
        assert!(!state.join("r1"));
        assert!(state.authenticate("u1"));
        assert!(!state.authenticate("u2"));

        assert!(state.join("r1"));
        assert!(!state.join("r1"));
        assert!(state.join("r2"));
        assert!(state.has_joined("r2"));

        assert!(state.leave("r1"));
        assert!(state.leave("r2"));
        assert_eq!(state, ConnectionState::Authenticated { user_id: "u1".into() });
    }

    #[test]
    fn close_is_terminal() {
        let mut state = ConnectionState::Connecting;
        state.authenticate("u1");
        state.join("r1");

        assert_eq!(state.close(), vec!["r1".to_owned()]);
        assert_eq!(state, ConnectionState::Disconnected);
        assert!(!state.join("r1"));
        assert!(!state.authenticate("u1"));
    }
}
