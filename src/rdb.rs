//! The on-disk RDB snapshot reader (§6). Read-only: this system never writes an RDB
//! file (§1 Non-goals name SAVE/BGSAVE explicitly). Parses a snapshot into a stream of
//! (key, value, optional-expiry) triples and injects each one into the keyspace through
//! the same path a live `SET` uses (`Keyspace::load_entry`).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use base64::prelude::*;
use bytes::Bytes;

use crate::errors::RdbError;
use crate::keyspace::Keyspace;

const MAGIC: &[u8; 5] = b"REDIS";

const EXPIRE_MS: u8 = 0xFC;
const EXPIRE_SEC: u8 = 0xFD;
const RESIZE_DB: u8 = 0xFB;
const SELECT_DB: u8 = 0xFE;
const AUX: u8 = 0xFA;
const EOF: u8 = 0xFF;
const TYPE_STRING: u8 = 0x00;

/// A syntactically valid, empty RDB file (magic + version + EOF opcode + checksum,
/// §6: "a static 88-byte constant"), sent to a freshly `PSYNC`ing replica when no
/// snapshot file is configured to preload.
const EMPTY_RDB_BASE64: &str = "UkVESVMwMDEx+glyZWRpcy12ZXIFNy4yLjD6CnJlZGlzLWJpdHPAQPoFY3RpbWXCbQi8ZfoIdXNlZC1tZW3CsMQQAPoIYW9mLWJhc2XAAP/wbjv+wP9aog==";

pub fn empty_rdb() -> Vec<u8> {
    BASE64_STANDARD
        .decode(EMPTY_RDB_BASE64)
        .expect("embedded empty-RDB constant is valid base64")
}

/// Loads `dir/dbfilename` into `keyspace`, if both are configured and the file exists.
/// Any parse failure is logged and swallowed — the server starts with an empty
/// keyspace rather than refusing to boot (§7: "RDB-parse errors at startup: logged and
/// ignored").
pub fn load_into(dir: &str, dbfilename: &str, keyspace: &Arc<Keyspace>) {
    if dir.is_empty() || dbfilename.is_empty() {
        return;
    }
    let path = Path::new(dir).join(dbfilename);
    if !path.exists() {
        tracing::info!(path = %path.display(), "no RDB snapshot file found, starting empty");
        return;
    }
    match File::open(&path)
        .map_err(RdbError::from)
        .and_then(|file| load_from_reader(BufReader::new(file), keyspace))
    {
        Ok(count) => tracing::info!(path = %path.display(), keys = count, "loaded RDB snapshot"),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to load RDB snapshot, starting empty")
        }
    }
}

/// Parses a full RDB byte stream (from a file or a `PSYNC` snapshot blob) and injects
/// every decoded entry into `keyspace`. Returns the number of entries loaded.
pub fn load_from_reader<R: Read>(reader: R, keyspace: &Arc<Keyspace>) -> Result<usize, RdbError> {
    let mut rdb = RdbReader { inner: reader };
    rdb.load_into(keyspace)
}

struct RdbReader<R> {
    inner: R,
}

impl<R: Read> RdbReader<R> {
    fn load_into(&mut self, keyspace: &Arc<Keyspace>) -> Result<usize, RdbError> {
        self.read_header()?;
        let mut loaded = 0usize;
        loop {
            match self.read_byte()? {
                EOF => break,
                AUX => {
                    let _key = self.read_string()?;
                    let _value = self.read_string()?;
                }
                SELECT_DB => {
                    let _db_index = self.read_byte()?;
                }
                RESIZE_DB => {
                    let _table_size = self.read_size()?;
                    let _expires_size = self.read_size()?;
                }
                EXPIRE_MS => {
                    let mut buf = [0u8; 8];
                    self.inner.read_exact(&mut buf)?;
                    let expiry_at = expiry_from_millis(u64::from_le_bytes(buf));
                    let value_type = self.read_byte()?;
                    loaded += self.read_entry(keyspace, value_type, Some(expiry_at))?;
                }
                EXPIRE_SEC => {
                    let mut buf = [0u8; 4];
                    self.inner.read_exact(&mut buf)?;
                    let expiry_at = expiry_from_millis(u32::from_le_bytes(buf) as u64 * 1000);
                    let value_type = self.read_byte()?;
                    loaded += self.read_entry(keyspace, value_type, Some(expiry_at))?;
                }
                value_type => {
                    loaded += self.read_entry(keyspace, value_type, None)?;
                }
            }
        }
        Ok(loaded)
    }

    fn read_entry(
        &mut self,
        keyspace: &Arc<Keyspace>,
        value_type: u8,
        expiry_at: Option<SystemTime>,
    ) -> Result<usize, RdbError> {
        if value_type != TYPE_STRING {
            return Err(RdbError::UnsupportedValueType(value_type));
        }
        let key = self.read_string()?;
        let value = self.read_string()?;
        keyspace.load_entry(Bytes::from(key), Bytes::from(value), expiry_at);
        Ok(1)
    }

    fn read_header(&mut self) -> Result<(), RdbError> {
        let mut magic = [0u8; 5];
        self.inner.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(RdbError::BadMagic);
        }
        let mut version = [0u8; 4];
        self.inner.read_exact(&mut version)?;
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, RdbError> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Size encoding (§6): the top two bits of the first byte select the scheme.
    fn read_size(&mut self) -> Result<usize, RdbError> {
        let first = self.read_byte()?;
        match first >> 6 {
            0b00 => Ok((first & 0x3F) as usize),
            0b01 => {
                let second = self.read_byte()?;
                Ok((((first & 0x3F) as usize) << 8) | second as usize)
            }
            0b10 => {
                let mut buf = [0u8; 4];
                self.inner.read_exact(&mut buf)?;
                Ok(u32::from_be_bytes(buf) as usize)
            }
            _ => Err(RdbError::UnsupportedEncoding),
        }
    }

    fn read_string(&mut self) -> Result<Vec<u8>, RdbError> {
        let len = self.read_size()?;
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }
}

fn expiry_from_millis(ms: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_size(len: usize, out: &mut Vec<u8>) {
        assert!(len < 64);
        out.push(len as u8);
    }

    fn encode_string(s: &[u8], out: &mut Vec<u8>) {
        encode_size(s.len(), out);
        out.extend_from_slice(s);
    }

    #[test]
    fn loads_empty_rdb_constant_with_zero_entries() {
        let keyspace = Arc::new(Keyspace::new());
        let bytes = empty_rdb();
        let count = load_from_reader(std::io::Cursor::new(bytes), &keyspace).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn loads_a_hand_built_snapshot_with_one_string_key() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"REDIS0011");
        bytes.push(SELECT_DB);
        bytes.push(0); // db index
        bytes.push(RESIZE_DB);
        encode_size(1, &mut bytes);
        encode_size(0, &mut bytes);
        bytes.push(TYPE_STRING);
        encode_string(b"foo", &mut bytes);
        encode_string(b"bar", &mut bytes);
        bytes.push(EOF);

        let keyspace = Arc::new(Keyspace::new());
        let count = load_from_reader(std::io::Cursor::new(bytes), &keyspace).unwrap();
        assert_eq!(count, 1);
        assert_eq!(keyspace.get(b"foo"), Some(Bytes::from_static(b"bar")));
    }

    #[test]
    fn drops_an_entry_whose_expiry_has_already_passed() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"REDIS0011");
        bytes.push(SELECT_DB);
        bytes.push(0);
        bytes.push(EXPIRE_MS);
        bytes.extend_from_slice(&1u64.to_le_bytes()); // 1ms past epoch: long expired
        bytes.push(TYPE_STRING);
        encode_string(b"stale", &mut bytes);
        encode_string(b"gone", &mut bytes);
        bytes.push(EOF);

        let keyspace = Arc::new(Keyspace::new());
        load_from_reader(std::io::Cursor::new(bytes), &keyspace).unwrap();
        assert_eq!(keyspace.get(b"stale"), None);
    }

    #[test]
    fn rejects_bad_magic() {
        let keyspace = Arc::new(Keyspace::new());
        let err = load_from_reader(std::io::Cursor::new(b"NOTREDIS".to_vec()), &keyspace).unwrap_err();
        assert!(matches!(err, RdbError::BadMagic));
    }

    #[test]
    fn load_into_is_a_no_op_when_unconfigured() {
        let keyspace = Arc::new(Keyspace::new());
        load_into("", "", &keyspace);
        assert_eq!(keyspace.keys(b"*").unwrap().len(), 0);
    }

    #[test]
    fn load_into_reads_a_snapshot_file_from_disk() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"REDIS0011");
        bytes.push(SELECT_DB);
        bytes.push(0);
        bytes.push(TYPE_STRING);
        encode_string(b"ondisk", &mut bytes);
        encode_string(b"value", &mut bytes);
        bytes.push(EOF);

        let dir = tempfile::tempdir().expect("creating temp dir");
        std::fs::write(dir.path().join("dump.rdb"), &bytes).expect("writing fixture");

        let keyspace = Arc::new(Keyspace::new());
        load_into(dir.path().to_str().unwrap(), "dump.rdb", &keyspace);
        assert_eq!(keyspace.get(b"ondisk"), Some(Bytes::from_static(b"value")));
    }
}
