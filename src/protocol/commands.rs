// Commands - Wire schemas for collation sync
//
// Four commands with fixed ids:
// - 0 Status: handshake, no fields
// - 1 Collations: reply carrying collations for a request id
// - 2 GetCollations: request collations by hash
// - 3 NewCollationHashes: announce (hash, period) pairs
//
// A frame is the command id (plus the sub-protocol offset) followed by the
// postcard encoding of the command's fields in declaration order.

use crate::collation::Collation;
use crate::merkle::Hash32;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sub-protocol name
pub const PROTOCOL_NAME: &str = "sha";
/// Sub-protocol version
pub const PROTOCOL_VERSION: u8 = 0;
/// Number of command slots the sub-protocol occupies
pub const CMD_LENGTH: u8 = 4;

/// Protocol errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty frame")]
    EmptyFrame,

    #[error("Unknown command id {0}")]
    UnknownCommand(u8),

    #[error("Failed to decode {command}: {reason}")]
    DecodeFailed { command: &'static str, reason: String },

    #[error("Failed to encode {command}: {reason}")]
    EncodeFailed { command: &'static str, reason: String },
}

/// A decoded sub-protocol command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Status,
    Collations {
        request_id: u64,
        collations: Vec<Collation>,
    },
    GetCollations {
        request_id: u64,
        collation_hashes: Vec<Hash32>,
    },
    NewCollationHashes {
        collation_hashes_and_periods: Vec<(Hash32, u64)>,
    },
}

// Field layouts, in wire order
#[derive(Serialize, Deserialize)]
struct CollationsFields {
    request_id: u64,
    collations: Vec<Collation>,
}

#[derive(Serialize, Deserialize)]
struct GetCollationsFields {
    request_id: u64,
    collation_hashes: Vec<Hash32>,
}

#[derive(Serialize, Deserialize)]
struct NewCollationHashesFields {
    collation_hashes_and_periods: Vec<(Hash32, u64)>,
}

// Borrowed encode-side layouts; same wire form as the owned ones above
#[derive(Serialize)]
struct CollationsRef<'a> {
    request_id: u64,
    collations: &'a [Collation],
}

#[derive(Serialize)]
struct GetCollationsRef<'a> {
    request_id: u64,
    collation_hashes: &'a [Hash32],
}

#[derive(Serialize)]
struct NewCollationHashesRef<'a> {
    collation_hashes_and_periods: &'a [(Hash32, u64)],
}

impl Command {
    pub const STATUS_ID: u8 = 0;
    pub const COLLATIONS_ID: u8 = 1;
    pub const GET_COLLATIONS_ID: u8 = 2;
    pub const NEW_COLLATION_HASHES_ID: u8 = 3;

    /// Command id relative to the sub-protocol
    pub fn cmd_id(&self) -> u8 {
        match self {
            Command::Status => Self::STATUS_ID,
            Command::Collations { .. } => Self::COLLATIONS_ID,
            Command::GetCollations { .. } => Self::GET_COLLATIONS_ID,
            Command::NewCollationHashes { .. } => Self::NEW_COLLATION_HASHES_ID,
        }
    }

    /// Command name, for logs and errors
    pub fn name(&self) -> &'static str {
        name_of(self.cmd_id())
    }

    /// Request id, for the commands that carry one
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Command::Collations { request_id, .. } | Command::GetCollations { request_id, .. } => {
                Some(*request_id)
            }
            Command::Status | Command::NewCollationHashes { .. } => None,
        }
    }
}

fn name_of(cmd_id: u8) -> &'static str {
    match cmd_id {
        Command::STATUS_ID => "Status",
        Command::COLLATIONS_ID => "Collations",
        Command::GET_COLLATIONS_ID => "GetCollations",
        Command::NEW_COLLATION_HASHES_ID => "NewCollationHashes",
        _ => "Unknown",
    }
}

/// Frame codec for the sub-protocol
///
/// `offset` is where the sub-protocol's command ids start on a shared
/// connection; it is zero when the protocol runs alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandCodec {
    offset: u8,
}

impl CommandCodec {
    /// Codec with ids starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec with ids starting at `offset`
    pub fn with_offset(offset: u8) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> u8 {
        self.offset
    }

    /// Encode a command into a frame
    pub fn encode(&self, command: &Command) -> Result<Vec<u8>, ProtocolError> {
        let fields = match command {
            Command::Status => Ok(Vec::new()),
            Command::Collations {
                request_id,
                collations,
            } => postcard::to_allocvec(&CollationsRef {
                request_id: *request_id,
                collations,
            }),
            Command::GetCollations {
                request_id,
                collation_hashes,
            } => postcard::to_allocvec(&GetCollationsRef {
                request_id: *request_id,
                collation_hashes,
            }),
            Command::NewCollationHashes {
                collation_hashes_and_periods,
            } => postcard::to_allocvec(&NewCollationHashesRef {
                collation_hashes_and_periods,
            }),
        }
        .map_err(|e| ProtocolError::EncodeFailed {
            command: command.name(),
            reason: e.to_string(),
        })?;

        let mut frame = Vec::with_capacity(1 + fields.len());
        frame.push(self.offset.wrapping_add(command.cmd_id()));
        frame.extend_from_slice(&fields);
        Ok(frame)
    }

    /// Decode a frame into a command
    pub fn decode(&self, frame: &[u8]) -> Result<Command, ProtocolError> {
        let (&raw_id, payload) = frame.split_first().ok_or(ProtocolError::EmptyFrame)?;
        let cmd_id = raw_id
            .checked_sub(self.offset)
            .filter(|id| *id < CMD_LENGTH)
            .ok_or(ProtocolError::UnknownCommand(raw_id))?;

        let decode_failed = |e: postcard::Error| ProtocolError::DecodeFailed {
            command: name_of(cmd_id),
            reason: e.to_string(),
        };

        let command = match cmd_id {
            Command::STATUS_ID => {
                if !payload.is_empty() {
                    return Err(ProtocolError::DecodeFailed {
                        command: "Status",
                        reason: format!("{} unexpected payload bytes", payload.len()),
                    });
                }
                Command::Status
            }
            Command::COLLATIONS_ID => {
                let fields: CollationsFields = postcard::from_bytes(payload).map_err(decode_failed)?;
                Command::Collations {
                    request_id: fields.request_id,
                    collations: fields.collations,
                }
            }
            Command::GET_COLLATIONS_ID => {
                let fields: GetCollationsFields =
                    postcard::from_bytes(payload).map_err(decode_failed)?;
                Command::GetCollations {
                    request_id: fields.request_id,
                    collation_hashes: fields.collation_hashes,
                }
            }
            Command::NEW_COLLATION_HASHES_ID => {
                let fields: NewCollationHashesFields =
                    postcard::from_bytes(payload).map_err(decode_failed)?;
                Command::NewCollationHashes {
                    collation_hashes_and_periods: fields.collation_hashes_and_periods,
                }
            }
            other => return Err(ProtocolError::UnknownCommand(other)),
        };

        Ok(command)
    }
}
