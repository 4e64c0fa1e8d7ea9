use std::fmt::{Debug, Formatter};

use num_enum::TryFromPrimitive;

/// A [MessageKind] tags every frame on the wire and selects the handler on the receiving side.
///
/// Negative values are reserved for the messaging layer's own control traffic (see
///  [ControlKind]); applications register handlers for kinds >= 0 and attach whatever payload
///  semantics they like to them.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MessageKind(pub i32);

impl MessageKind {
    pub const ACKNOWLEDGMENT: MessageKind = MessageKind(ControlKind::Acknowledgment as i32);
    pub const HEARTBEAT: MessageKind = MessageKind(ControlKind::Heartbeat as i32);
    pub const HANDSHAKE: MessageKind = MessageKind(ControlKind::Handshake as i32);

    pub fn is_control(&self) -> bool {
        self.0 < 0
    }

    pub fn as_control(&self) -> Option<ControlKind> {
        ControlKind::try_from(self.0).ok()
    }
}

impl Debug for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.as_control() {
            Some(control) => write!(f, "{}({:?})", self.0, control),
            None => write!(f, "{}", self.0),
        }
    }
}

/// wire values reserved for the messaging layer itself
#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive)]
#[repr(i32)]
pub enum ControlKind {
    Acknowledgment = -1,
    Heartbeat = -2,
    Handshake = -3,
}

impl From<ControlKind> for MessageKind {
    fn from(value: ControlKind) -> Self {
        MessageKind(value as i32)
    }
}
