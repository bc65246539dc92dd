// Protocol module - THE "sha" SUB-PROTOCOL
// Command schemas exchanged between sharding peers and their frame codec

mod commands;

pub use commands::{
    Command, CommandCodec, ProtocolError, CMD_LENGTH, PROTOCOL_NAME, PROTOCOL_VERSION,
};
