//! LAN discovery datagram format
//!
//! A discovery datagram is a single line of text:
//!
//! ```text
//! <prefix><peer_id>:<username>:<port>
//! ```
//!
//! `:` separates the fields, so neither the peer id nor the username may
//! contain it.

use crate::error::FrameError;

const DELIMITER: char = ':';

/// One peer advertisement carried by a discovery datagram
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryFrame {
    pub peer_id: String,
    pub username: String,
    pub port: u16,
}

impl DiscoveryFrame {
    /// Build a frame for a local identity, rejecting values that cannot be encoded
    pub fn new(
        peer_id: impl Into<String>,
        username: impl Into<String>,
        port: u16,
    ) -> Result<Self, FrameError> {
        let peer_id = peer_id.into();
        let username = username.into();

        check_field("peer id", &peer_id)?;
        check_field("username", &username)?;

        Ok(Self {
            peer_id,
            username,
            port,
        })
    }

    /// Render the datagram text
    pub fn encode(&self, prefix: &str) -> String {
        format!(
            "{}{}{}{}{}{}",
            prefix, self.peer_id, DELIMITER, self.username, DELIMITER, self.port
        )
    }

    /// Parse datagram text received from the network
    pub fn decode(prefix: &str, text: &str) -> Result<Self, FrameError> {
        let body = text
            .trim_end_matches(['\r', '\n', '\0'])
            .strip_prefix(prefix)
            .ok_or(FrameError::MissingPrefix)?;

        let fields: Vec<&str> = body.split(DELIMITER).collect();
        let [peer_id, username, port] = fields.as_slice() else {
            return Err(FrameError::FieldCount(fields.len()));
        };

        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| FrameError::InvalidPort((*port).to_string()))?;

        Ok(Self {
            peer_id: (*peer_id).to_string(),
            username: (*username).to_string(),
            port,
        })
    }
}

fn check_field(field: &'static str, value: &str) -> Result<(), FrameError> {
    if value.is_empty() {
        return Err(FrameError::EmptyField(field));
    }
    if value.contains(DELIMITER) {
        return Err(FrameError::ReservedDelimiter {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
