//! `SET` argument parsing, including the `PX`/`PXAT` expiry modifiers.

use std::time::{Duration, SystemTime};

use crate::errors::CommandError;
use crate::protocol::Frame;

use super::Command;

pub fn parse_set(args: &[Frame]) -> Result<Command, CommandError> {
    if args.len() < 2 {
        return Err(CommandError::new(
            "wrong number of arguments for 'set' command",
        ));
    }
    let key = args[0]
        .as_bulk()
        .cloned()
        .ok_or_else(|| CommandError::new("SET key must be a bulk string"))?;
    let value = args[1]
        .as_bulk()
        .cloned()
        .ok_or_else(|| CommandError::new("SET value must be a bulk string"))?;

    let mut expiry_at = None;
    let mut i = 2;
    while i < args.len() {
        let opt = args[i]
            .as_bulk()
            .ok_or_else(|| CommandError::new("syntax error"))?;
        let opt = String::from_utf8_lossy(opt).to_ascii_uppercase();
        match opt.as_str() {
            "PX" => {
                let ms = parse_int_arg(args, i + 1)?;
                expiry_at = Some(SystemTime::now() + Duration::from_millis(ms as u64));
                i += 2;
            }
            "PXAT" => {
                let epoch_ms = parse_int_arg(args, i + 1)?;
                expiry_at = Some(
                    SystemTime::UNIX_EPOCH + Duration::from_millis(epoch_ms as u64),
                );
                i += 2;
            }
            _ => return Err(CommandError::new("syntax error")),
        }
    }

    Ok(Command::Set {
        key,
        value,
        expiry_at,
    })
}

fn parse_int_arg(args: &[Frame], idx: usize) -> Result<i64, CommandError> {
    let bytes = args
        .get(idx)
        .and_then(Frame::as_bulk)
        .ok_or_else(|| CommandError::new("syntax error"))?;
    std::str::from_utf8(bytes)
        .ok()
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
    fn parses_bare_set() {
        let cmd = parse_set(&[bulk("foo"), bulk("bar")]).unwrap();
        match cmd {
            Command::Set { key, value, expiry_at } => {
                assert_eq!(key, "foo");
                assert_eq!(value, "bar");
                assert_eq!(expiry_at, None);
            }
            _ => panic!("expected Set"),
        }
    }

    #[test]
    fn parses_px_as_relative_future_time() {
        let cmd = parse_set(&[bulk("foo"), bulk("bar"), bulk("PX"), bulk("100")]).unwrap();
        match cmd {
            Command::Set { expiry_at, .. } => {
                assert!(expiry_at.unwrap() > SystemTime::now());
            }
            _ => panic!("expected Set"),
        }
    }

    #[test]
    fn rejects_non_integer_px() {
        assert!(parse_set(&[bulk("foo"), bulk("bar"), bulk("PX"), bulk("nope")]).is_err());
    }

    #[test]
    fn rejects_unknown_option() {
        assert!(parse_set(&[bulk("foo"), bulk("bar"), bulk("XX")]).is_err());
    }
}
