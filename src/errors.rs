//! The error types shared across the wire codec, command dispatch, and replication.

use thiserror::Error;

/// Errors that can occur while reading or writing RESP frames on a connection.
///
/// This is the error type threaded through the codec and the connection handler; it
/// covers both transport failures and malformed wire data. A `RespError` terminates the
/// session that produced it (§7 of the design: protocol/I-O errors are session-fatal).
#[derive(Error, Debug)]
pub enum RespError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors produced by a command handler while it is inspecting or mutating the
/// keyspace. Unlike `RespError`, a `CommandError` never closes the session: the
/// connection handler converts it into a RESP `Error` frame and keeps reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CommandError(pub String);

impl CommandError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors produced while parsing an on-disk RDB snapshot. These are never fatal to the
/// process: the caller logs them and starts with an empty keyspace (§7).
#[derive(Error, Debug)]
pub enum RdbError {
    #[error("IO error reading RDB file: {0}")]
    Io(#[from] std::io::Error),

    #[error("RDB file has an invalid magic header")]
    BadMagic,

    #[error("RDB file is malformed: {0}")]
    Malformed(String),

    #[error("RDB opcode {0:#04x} is not supported by this loader")]
    UnsupportedOpcode(u8),

    #[error("RDB value type tag {0:#04x} is not supported by this loader")]
    UnsupportedValueType(u8),

    #[error("RDB size encoding scheme is not supported")]
    UnsupportedEncoding,
}
