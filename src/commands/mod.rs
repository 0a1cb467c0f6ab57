//! The command registry: parsing request frames into a closed `Command` enum and
//! executing them against a `ServerContext`.
//!
//! §9 design note: the source dispatches through a mutable map of function values keyed
//! by command name. We replace that with a closed tagged variant plus a pure `execute`
//! match — new commands are new `Command` variants, not new map entries.

mod generic;
mod streams;
mod string;

use std::sync::Arc;

use bytes::Bytes;

use crate::errors::CommandError;
use crate::protocol::Frame;
use crate::server::ServerContext;

/// One parsed `REPLCONF` sub-command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplConfArg {
    ListeningPort(u16),
    Capa(String),
    Ack(u64),
    GetAck,
}

/// Every request this server understands, already parsed out of its `Frame::Array`.
///
/// `ReplConf`, `Psync`, and `Wait` are handled specially by the connection handler (they
/// need access to the connection's writer and replica registration, which a pure
/// `execute` cannot express) — `execute` returns `None` for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping(Option<Bytes>),
    Echo(Bytes),
    Get(Bytes),
    Set {
        key: Bytes,
        value: Bytes,
        expiry_at: Option<std::time::SystemTime>,
    },
    Del(Vec<Bytes>),
    Keys(Bytes),
    Type(Bytes),
    XAdd {
        key: Bytes,
        id: (u64, u64),
        fields: Vec<(Bytes, Bytes)>,
    },
    ConfigGet(Bytes),
    Info(Bytes),
    ReplConf(ReplConfArg),
    Psync,
    Wait {
        num_replicas: i64,
        timeout_ms: i64,
    },
    Unknown(String),
}

impl Command {
    /// `args` is `1..n` of the request's top-level Array; `name` is the already
    /// uppercased command name at index 0.
    pub fn parse(name: &str, args: &[Frame]) -> Result<Command, CommandError> {
        match name {
            "PING" => Ok(Command::Ping(bulk_at(args, 0).ok())),
            "ECHO" => Ok(Command::Echo(required_bulk(args, 0, "ECHO")?)),
            "GET" => Ok(Command::Get(required_bulk(args, 0, "GET")?)),
            "SET" => string::parse_set(args),
            "DEL" => {
                let keys = args
                    .iter()
                    .map(|f| f.as_bulk().cloned().ok_or_else(bad_args))
                    .collect::<Result<Vec<_>, _>>()?;
                if keys.is_empty() {
                    return Err(CommandError::new(
                        "wrong number of arguments for 'del' command",
                    ));
                }
                Ok(Command::Del(keys))
            }
            "KEYS" => Ok(Command::Keys(required_bulk(args, 0, "KEYS")?)),
            "TYPE" => Ok(Command::Type(required_bulk(args, 0, "TYPE")?)),
            "XADD" => streams::parse_xadd(args),
            "CONFIG" => generic::parse_config(args),
            "INFO" => Ok(Command::Info(bulk_at(args, 0).unwrap_or_default())),
            "REPLCONF" => generic::parse_replconf(args),
            "PSYNC" => Ok(Command::Psync),
            "WAIT" => generic::parse_wait(args),
            other => Ok(Command::Unknown(other.to_string())),
        }
    }
}

fn bad_args() -> CommandError {
    CommandError::new("wrong number of arguments")
}

fn bulk_at(args: &[Frame], idx: usize) -> Result<Bytes, ()> {
    args.get(idx).and_then(Frame::as_bulk).cloned().ok_or(())
}

fn required_bulk(args: &[Frame], idx: usize, cmd: &str) -> Result<Bytes, CommandError> {
    bulk_at(args, idx).map_err(|_| {
        CommandError::new(format!(
            "wrong number of arguments for '{}' command",
            cmd.to_lowercase()
        ))
    })
}

/// Executes every command that is a pure function of the keyspace and server config.
/// Returns `None` for the three commands the connection handler special-cases
/// (`ReplConf`, `Psync`, `Wait`): the handler never calls `execute` for those, but
/// keeping them in the match makes the closed enum exhaustive and self-documenting.
pub fn execute(ctx: &Arc<ServerContext>, cmd: &Command) -> Option<Frame> {
    let reply = match cmd {
        Command::Ping(None) => Frame::SimpleString("PONG".into()),
        Command::Ping(Some(msg)) => Frame::Bulk(msg.clone()),
        Command::Echo(msg) => Frame::Bulk(msg.clone()),
        Command::Get(key) => match ctx.keyspace.get(key) {
            Some(v) => Frame::Bulk(v),
            None => Frame::Null,
        },
        Command::Set {
            key,
            value,
            expiry_at,
        } => match ctx.keyspace.set(key.clone(), value.clone(), *expiry_at) {
            Ok(()) => Frame::SimpleString("OK".into()),
            Err(e) => Frame::Error(e.0),
        },
        Command::Del(keys) => Frame::Integer(ctx.keyspace.del(keys)),
        Command::Keys(pattern) => match ctx.keyspace.keys(pattern) {
            Ok(keys) => Frame::Array(keys.into_iter().map(Frame::Bulk).collect()),
            Err(e) => Frame::Error(e.0),
        },
        Command::Type(key) => Frame::SimpleString(ctx.keyspace.key_type(key).to_string()),
        Command::XAdd { key, id, fields } => streams::execute_xadd(ctx, key, *id, fields),
        Command::ConfigGet(name) => generic::execute_config_get(ctx, name),
        Command::Info(section) => generic::execute_info(ctx, section),
        Command::Unknown(_) => Frame::SimpleString(String::new()),
        Command::ReplConf(_) | Command::Psync | Command::Wait { .. } => return None,
    };
    Some(reply)
}

/// A command is write-class if it must be propagated to replicas (§4.4 step 4).
pub fn is_write_class(cmd: &Command) -> bool {
    matches!(cmd, Command::Set { .. } | Command::Del(_))
}
