//! Connection identities.

use std::fmt;
use std::str::FromStr;

const PREFIX: &str = "client#";

/// Relay-assigned name of one connected peer, rendered as `client#<n>`.
///
/// Identities are handed out in increasing order and never reused, so the
/// ordering of `ConnectionId` values is also the order of acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn seq(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

/// Returned when a string is not the canonical rendering of a [`ConnectionId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotAnIdentity;

impl FromStr for ConnectionId {
    type Err = NotAnIdentity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix(PREFIX).ok_or(NotAnIdentity)?;
        // Only the canonical form names a connection: "client#01" is not "client#1".
        if digits.is_empty()
            || !digits.bytes().all(|b| b.is_ascii_digit())
            || (digits.len() > 1 && digits.starts_with('0'))
        {
            return Err(NotAnIdentity);
        }
        digits.parse().map(Self).map_err(|_| NotAnIdentity)
    }
}
