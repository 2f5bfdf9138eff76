//! The closed RPC status enum.

use std::fmt;

/// Call-level status of an RPC, shared by server and client.
///
/// This enum is closed: the wire protocol assigns each variant a fixed
/// tag and unknown tags are a framing error. Argument-level rejections
/// (bad direction, out-of-range step count) travel as
/// [`ActionError`](crate::action::ActionError) payloads inside the
/// affected response instead of widening this set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// The call succeeded.
    Ok = 0,
    /// The referenced agent id is unknown.
    InvalidAgentId = 1,
    /// The server could not parse the request.
    ServerParseMessageError = 2,
    /// The client could not parse the response.
    ClientParseMessageError = 3,
    /// The server ran out of memory handling the call.
    ServerOutOfMemory = 4,
    /// The client ran out of memory handling the response.
    ClientOutOfMemory = 5,
    /// The client lacks the permission for this call. The call did not
    /// mutate any state.
    PermissionDenied = 6,
}

impl Status {
    /// Stable wire tag of this status.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Inverse of [`tag`](Status::tag). Returns `None` for unknown tags.
    pub fn from_tag(tag: u8) -> Option<Status> {
        match tag {
            0 => Some(Status::Ok),
            1 => Some(Status::InvalidAgentId),
            2 => Some(Status::ServerParseMessageError),
            3 => Some(Status::ClientParseMessageError),
            4 => Some(Status::ServerOutOfMemory),
            5 => Some(Status::ClientOutOfMemory),
            6 => Some(Status::PermissionDenied),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::InvalidAgentId => "invalid agent id",
            Status::ServerParseMessageError => "server parse error",
            Status::ClientParseMessageError => "client parse error",
            Status::ServerOutOfMemory => "server out of memory",
            Status::ClientOutOfMemory => "client out of memory",
            Status::PermissionDenied => "permission denied",
        };
        write!(f, "{name}")
    }
}
