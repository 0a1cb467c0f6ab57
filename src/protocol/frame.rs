//! The `Frame` tagged value and its canonical RESP encoding.

use bytes::Bytes;

/// A single RESP value, decoded or ready to be encoded.
///
/// `RdbBlob` is not a real RESP type; it models the length-prefixed, non-CRLF-terminated
/// snapshot body that follows a `FULLRESYNC` reply (see the module docs on replication).
/// It is only ever produced explicitly (never by [`super::FrameReader::read_frame`]) and
/// only ever encoded through [`super::FrameWriter::write_rdb_blob`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
    Set(Vec<Frame>),
}

impl Frame {
    /// Builds an `Array` of `Bulk` frames from plain byte slices, the shape every
    /// outbound command (PING, REPLCONF, PSYNC, the propagated SET/DEL...) takes.
    pub fn command(parts: &[&[u8]]) -> Frame {
        Frame::Array(
            parts
                .iter()
                .map(|p| Frame::Bulk(Bytes::copy_from_slice(p)))
                .collect(),
        )
    }

    /// Returns the bulk-string payload, if this frame is one.
    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Frame::Bulk(b) => Some(b),
            _ => None,
        }
    }

    /// Encodes this frame into a freshly allocated byte vector. Used both to produce the
    /// bytes actually written to a socket and, for write-class client commands, to
    /// reconstruct the verbatim bytes fanned out to replicas (§4.4 step 4 of the design:
    /// propagation forwards the original request frame).
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode(self, &mut out);
        out
    }
}

const CRLF: &[u8] = b"\r\n";

fn encode(frame: &Frame, out: &mut Vec<u8>) {
    match frame {
        Frame::SimpleString(s) => {
            out.push(b'+');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(CRLF);
        }
        Frame::Error(s) => {
            out.push(b'-');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(CRLF);
        }
        Frame::Integer(n) => {
            out.push(b':');
            out.extend_from_slice(n.to_string().as_bytes());
            out.extend_from_slice(CRLF);
        }
        Frame::Bulk(b) => {
            out.push(b'$');
            out.extend_from_slice(b.len().to_string().as_bytes());
            out.extend_from_slice(CRLF);
            out.extend_from_slice(b);
            out.extend_from_slice(CRLF);
        }
        Frame::Null => out.extend_from_slice(b"$-1\r\n"),
        Frame::Array(items) => {
            out.push(b'*');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(CRLF);
            for item in items {
                encode(item, out);
            }
        }
        Frame::Set(items) => {
            out.push(b'~');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(CRLF);
            for item in items {
                encode(item, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_simple_string() {
        assert_eq!(
            Frame::SimpleString("OK".into()).encode_to_vec(),
            b"+OK\r\n"
        );
    }

    #[test]
    fn encodes_null_bulk() {
        assert_eq!(Frame::Null.encode_to_vec(), b"$-1\r\n");
    }

    #[test]
    fn encodes_bulk_string() {
        assert_eq!(
            Frame::Bulk(Bytes::from_static(b"bar")).encode_to_vec(),
            b"$3\r\nbar\r\n"
        );
    }

    #[test]
    fn encodes_nested_array() {
        let frame = Frame::command(&[b"SET", b"foo", b"bar"]);
        assert_eq!(
            frame.encode_to_vec(),
            b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"
        );
    }

    #[test]
    fn encodes_set_type() {
        let frame = Frame::Set(vec![Frame::Integer(1), Frame::Integer(2)]);
        assert_eq!(frame.encode_to_vec(), b"~2\r\n:1\r\n:2\r\n");
    }
}
