//! `XADD` parsing and execution.

use std::sync::Arc;

use bytes::Bytes;

use crate::errors::CommandError;
use crate::protocol::Frame;
use crate::server::ServerContext;

use super::Command;

pub fn parse_xadd(args: &[Frame]) -> Result<Command, CommandError> {
    if args.len() < 4 {
        return Err(CommandError::new(
            "wrong number of arguments for 'xadd' command",
        ));
    }
    let key = args[0]
        .as_bulk()
        .cloned()
        .ok_or_else(|| CommandError::new("XADD key must be a bulk string"))?;
    let id_raw = args[1]
        .as_bulk()
        .ok_or_else(|| CommandError::new("XADD id must be a bulk string"))?;
    let id = parse_id(id_raw)?;

    let field_args = &args[2..];
    if field_args.is_empty() || field_args.len() % 2 != 0 {
        return Err(CommandError::new(
            "wrong number of arguments for 'xadd' command",
        ));
    }
    // §9: fields pair straightforwardly as (args[i], args[i+1]) — the source's
    // args[i]/args[i+2] pairing was a bug, not behavior to preserve.
    let mut fields = Vec::with_capacity(field_args.len() / 2);
    for pair in field_args.chunks_exact(2) {
        let field = pair[0]
            .as_bulk()
            .cloned()
            .ok_or_else(|| CommandError::new("XADD field must be a bulk string"))?;
        let value = pair[1]
            .as_bulk()
            .cloned()
            .ok_or_else(|| CommandError::new("XADD value must be a bulk string"))?;
        fields.push((field, value));
    }

    Ok(Command::XAdd { key, id, fields })
}

fn parse_id(raw: &[u8]) -> Result<(u64, u64), CommandError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| CommandError::new("Invalid stream ID specified as stream command argument"))?;
    let (ms, seq) = text
        .split_once('-')
        .ok_or_else(|| CommandError::new("Invalid stream ID specified as stream command argument"))?;
    let ms = ms
        .parse::<u64>()
        .map_err(|_| CommandError::new("Invalid stream ID specified as stream command argument"))?;
    let seq = seq
        .parse::<u64>()
        .map_err(|_| CommandError::new("Invalid stream ID specified as stream command argument"))?;
    Ok((ms, seq))
}

pub fn execute_xadd(
    ctx: &Arc<ServerContext>,
    key: &Bytes,
    id: (u64, u64),
    fields: &[(Bytes, Bytes)],
) -> Frame {
    match ctx.keyspace.xadd(key.clone(), id, fields.to_vec()) {
        Ok((ms, seq)) => Frame::SimpleString(format!("{ms}-{seq}")),
        Err(e) => Frame::Error(e.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn bulk(s: &str) -> Frame {
        Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn parses_valid_xadd() {
        let cmd = parse_xadd(&[bulk("stream"), bulk("1-1"), bulk("field"), bulk("value")]).unwrap();
        match cmd {
            Command::XAdd { id, fields, .. } => {
                assert_eq!(id, (1, 1));
                assert_eq!(fields, vec![(Bytes::from_static(b"field"), Bytes::from_static(b"value"))]);
            }
            _ => panic!("expected XAdd"),
        }
    }

    #[test]
    fn rejects_malformed_id() {
        assert!(parse_xadd(&[bulk("stream"), bulk("not-an-id"), bulk("f"), bulk("v")]).is_err());
    }

    #[test]
    fn rejects_odd_field_count() {
        assert!(parse_xadd(&[bulk("stream"), bulk("1-1"), bulk("field")]).is_err());
    }
}
