use serde::{Deserialize, Serialize};

use super::error::{ObjrpcError, Result, WireError};
use super::value::PacketBody;

/// Identifier correlating a request packet with its response.
///
/// Allocated per peer connection from a monotonically increasing counter;
/// uniqueness is only required among the requests outstanding on one
/// connection.
pub type PacketId = u64;

/// Wire action codes.
///
/// Context attach/detach, event subscription and capability negotiation all
/// ride on `Task`; only field access gets dedicated codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read a property or invoke a method
    Get = 0x01,
    /// Write a property
    Set = 0x02,
    /// Run a named peer-to-peer task
    Task = 0x03,
}

impl Action {
    pub fn from_code(code: u8) -> Option<Action> {
        match code {
            0x01 => Some(Action::Get),
            0x02 => Some(Action::Set),
            0x03 => Some(Action::Task),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

const ACTION_MASK: u8 = 0b0011_1111;
const ERROR_BIT: u8 = 6;
const IMPULSE_BIT: u8 = 7;

/// One protocol packet.
///
/// Flag bit layout, low to high:
///
/// ```text
///     name | offset | bits
///   -------+--------+------
///   action |      0 |    6
///    error |      6 |    1
///  impulse |      7 |    1
/// ```
///
/// `impulse` is 1 for requests and 0 for responses; the error bit marks a
/// response whose body carries a [`WireError`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Packet {
    pub flags: u8,
    pub id: PacketId,
    pub body: PacketBody,
}

impl Packet {
    /// Creates a request packet (impulse bit set).
    pub fn request(id: PacketId, action: Action, body: PacketBody) -> Self {
        let mut packet = Packet {
            flags: 0,
            id,
            body,
        };
        packet.set_action(action);
        packet.set_impulse(true);
        packet
    }

    /// Creates a success response carrying the same id and action as the
    /// request it answers.
    pub fn response(id: PacketId, action: Action, body: PacketBody) -> Self {
        let mut packet = Packet {
            flags: 0,
            id,
            body,
        };
        packet.set_action(action);
        packet
    }

    /// Creates an error-flagged response.
    pub fn error_response(id: PacketId, action: Action, error: WireError) -> Self {
        let mut packet = Packet::response(id, action, PacketBody::Error(error));
        packet.set_error(true);
        packet
    }

    pub fn set_action(&mut self, action: Action) {
        self.flags = (self.flags & !ACTION_MASK) | (action.code() & ACTION_MASK);
    }

    /// Decodes the action bits; an unknown code is a protocol violation.
    pub fn action(&self) -> Result<Action> {
        let code = self.flags & ACTION_MASK;
        Action::from_code(code)
            .ok_or_else(|| ObjrpcError::NotValid(format!("unknown action code {code:#04x}")))
    }

    pub fn set_impulse(&mut self, impulse: bool) {
        if impulse {
            self.flags |= 1 << IMPULSE_BIT;
        } else {
            self.flags &= !(1 << IMPULSE_BIT);
        }
    }

    /// True for requests, false for responses.
    pub fn impulse(&self) -> bool {
        (self.flags >> IMPULSE_BIT) & 1 == 1
    }

    pub fn set_error(&mut self, error: bool) {
        if error {
            self.flags |= 1 << ERROR_BIT;
        } else {
            self.flags &= !(1 << ERROR_BIT);
        }
    }

    pub fn is_error(&self) -> bool {
        (self.flags >> ERROR_BIT) & 1 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::value::WireValue;

    fn body() -> PacketBody {
        PacketBody::Result(WireValue::null())
    }

    #[test]
    fn test_action_codes_round_trip() {
        for action in [Action::Get, Action::Set, Action::Task] {
            assert_eq!(Action::from_code(action.code()), Some(action));
        }
        assert_eq!(Action::from_code(0x3f), None);
    }

    #[test]
    fn test_request_sets_impulse_and_action() {
        let packet = Packet::request(42, Action::Get, body());
        assert!(packet.impulse());
        assert!(!packet.is_error());
        assert_eq!(packet.action().unwrap(), Action::Get);
        assert_eq!(packet.id, 42);
    }

    #[test]
    fn test_response_clears_impulse() {
        let packet = Packet::response(7, Action::Task, body());
        assert!(!packet.impulse());
        assert_eq!(packet.action().unwrap(), Action::Task);
    }

    #[test]
    fn test_error_response_sets_error_bit() {
        let packet = Packet::error_response(7, Action::Set, WireError::new("not_found", "nope"));
        assert!(packet.is_error());
        assert!(!packet.impulse());
        assert_eq!(packet.action().unwrap(), Action::Set);
    }

    #[test]
    fn test_flag_bits_are_independent() {
        let mut packet = Packet::request(1, Action::Set, body());
        packet.set_error(true);
        assert!(packet.impulse());
        assert!(packet.is_error());
        assert_eq!(packet.action().unwrap(), Action::Set);

        packet.set_impulse(false);
        assert!(packet.is_error());
        assert_eq!(packet.action().unwrap(), Action::Set);

        packet.set_action(Action::Task);
        assert!(packet.is_error());
        assert!(!packet.impulse());
    }

    #[test]
    fn test_unknown_action_code_is_rejected() {
        let mut packet = Packet::request(1, Action::Get, body());
        packet.flags = (packet.flags & !0b0011_1111) | 0x2a;
        assert!(matches!(packet.action(), Err(ObjrpcError::NotValid(_))));
    }
}
