//! Room naming for socket fan-out.
//!
//! Every room-targeted emission in the system goes through this type, so the
//! wire-visible room grammar lives in exactly one place. Clients join rooms
//! by these names and servers target them; changing the format is a breaking
//! protocol change.

use uuid::Uuid;

/// A fan-out destination shared by a set of connections.
///
/// Wire format (stable):
/// - `user_{uuid}`: one user's personal notification room
/// - `clinic_{uuid}`: everyone logged into a clinic
/// - `patient_{uuid}`: everyone currently viewing a patient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    User(Uuid),
    Clinic(Uuid),
    Patient(Uuid),
}

impl Room {
    pub fn user(id: Uuid) -> Self {
        Self::User(id)
    }

    pub fn clinic(id: Uuid) -> Self {
        Self::Clinic(id)
    }

    pub fn patient(id: Uuid) -> Self {
        Self::Patient(id)
    }

    /// The exact name clients see in join/leave frames.
    pub fn wire_name(&self) -> String {
        match self {
            Self::User(id) => format!("user_{}", id),
            Self::Clinic(id) => format!("clinic_{}", id),
            Self::Patient(id) => format!("patient_{}", id),
        }
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_wire_names() {
        let id = Uuid::parse_str("0193e07c-0000-7000-8000-000000000001").unwrap();
        assert_eq!(Room::user(id).wire_name(), format!("user_{}", id));
        assert_eq!(Room::clinic(id).wire_name(), format!("clinic_{}", id));
        assert_eq!(Room::patient(id).wire_name(), format!("patient_{}", id));
    }

    #[test]
    fn test_room_display_matches_wire_name() {
        let room = Room::clinic(Uuid::nil());
        assert_eq!(room.to_string(), room.wire_name());
        assert_eq!(room.to_string(), "clinic_00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_rooms_are_distinct_per_kind() {
        let id = Uuid::new_v4();
        assert_ne!(Room::user(id), Room::clinic(id));
        assert_ne!(Room::clinic(id), Room::patient(id));
    }
}
