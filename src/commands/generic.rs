//! `CONFIG GET`, `INFO`, `REPLCONF`, and `WAIT` parsing/execution.

use std::sync::Arc;

use bytes::Bytes;

use crate::errors::CommandError;
use crate::protocol::Frame;
use crate::server::{Role, ServerContext};

use super::{Command, ReplConfArg};

pub fn parse_config(args: &[Frame]) -> Result<Command, CommandError> {
    let sub = args
        .first()
        .and_then(Frame::as_bulk)
        .map(|b| String::from_utf8_lossy(b).to_ascii_uppercase())
        .ok_or_else(|| CommandError::new("wrong number of arguments for 'config' command"))?;
    if sub != "GET" {
        return Err(CommandError::new("CONFIG only supports GET in this server"));
    }
    let name = args
        .get(1)
        .and_then(Frame::as_bulk)
        .cloned()
        .ok_or_else(|| CommandError::new("wrong number of arguments for 'config|get' command"))?;
    Ok(Command::ConfigGet(name))
}

pub fn execute_config_get(ctx: &Arc<ServerContext>, name: &Bytes) -> Frame {
    let key = String::from_utf8_lossy(name).to_ascii_lowercase();
    let value = match key.as_str() {
        "dir" => Some(ctx.config.dir.clone()),
        "dbfilename" => Some(ctx.config.dbfilename.clone()),
        _ => None,
    };
    match value {
        Some(v) => Frame::Array(vec![
            Frame::Bulk(name.clone()),
            Frame::Bulk(Bytes::from(v)),
        ]),
        None => Frame::Array(vec![]),
    }
}

pub fn execute_info(ctx: &Arc<ServerContext>, section: &Bytes) -> Frame {
    let section = String::from_utf8_lossy(section).to_ascii_lowercase();
    if section != "replication" && !section.is_empty() {
        return Frame::SimpleString(String::new());
    }
    let role = match &ctx.role {
        Role::Master { .. } => "master",
        Role::Replica { .. } => "slave",
    };
    let offset = ctx.bytes_written.load(std::sync::atomic::Ordering::SeqCst);
    Frame::SimpleString(format!(
        "role:{role}master_replid:{}master_repl_offset:{offset}",
        ctx.replid
    ))
}

pub fn parse_replconf(args: &[Frame]) -> Result<Command, CommandError> {
    let sub = args
        .first()
        .and_then(Frame::as_bulk)
        .map(|b| String::from_utf8_lossy(b).to_ascii_uppercase())
        .ok_or_else(|| CommandError::new("wrong number of arguments for 'replconf' command"))?;
    match sub.as_str() {
        "LISTENING-PORT" => {
            let port = args
                .get(1)
                .and_then(Frame::as_bulk)
                .and_then(|b| std::str::from_utf8(b).ok())
                .and_then(|s| s.parse::<u16>().ok())
                .ok_or_else(|| CommandError::new("invalid listening-port"))?;
            Ok(Command::ReplConf(ReplConfArg::ListeningPort(port)))
        }
        "CAPA" => {
            let capa = args
                .get(1)
                .and_then(Frame::as_bulk)
                .map(|b| String::from_utf8_lossy(b).to_string())
                .unwrap_or_default();
            Ok(Command::ReplConf(ReplConfArg::Capa(capa)))
        }
        "GETACK" => Ok(Command::ReplConf(ReplConfArg::GetAck)),
        "ACK" => {
            let offset = args
                .get(1)
                .and_then(Frame::as_bulk)
                .and_then(|b| std::str::from_utf8(b).ok())
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| CommandError::new("invalid ack offset"))?;
            Ok(Command::ReplConf(ReplConfArg::Ack(offset)))
        }
        other => Err(CommandError::new(format!("unknown REPLCONF subcommand '{other}'"))),
    }
}

pub fn parse_wait(args: &[Frame]) -> Result<Command, CommandError> {
    if args.len() != 2 {
        return Err(CommandError::new(
            "wrong number of arguments for 'wait' command",
        ));
    }
    let num_replicas = parse_i64(&args[0])?;
    let timeout_ms = parse_i64(&args[1])?;
    Ok(Command::Wait {
        num_replicas,
        timeout_ms,
    })
}

fn parse_i64(frame: &Frame) -> Result<i64, CommandError> {
    frame
        .as_bulk()
        .and_then(|b| std::str::from_utf8(b).ok())
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| CommandError::new("value is not an integer or out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn bulk(s: &str) -> Frame {
        Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn parses_config_get() {
        let cmd = parse_config(&[bulk("GET"), bulk("dir")]).unwrap();
        assert_eq!(cmd, Command::ConfigGet(Bytes::from_static(b"dir")));
    }

    #[test]
    fn parses_replconf_ack() {
        let cmd = parse_replconf(&[bulk("ACK"), bulk("31")]).unwrap();
        assert_eq!(cmd, Command::ReplConf(ReplConfArg::Ack(31)));
    }

    #[test]
    fn parses_wait() {
        let cmd = parse_wait(&[bulk("1"), bulk("500")]).unwrap();
        assert_eq!(
            cmd,
            Command::Wait {
                num_replicas: 1,
                timeout_ms: 500
            }
        );
    }

    #[test]
    fn rejects_unknown_replconf_subcommand() {
        assert!(parse_replconf(&[bulk("BOGUS")]).is_err());
    }
}
