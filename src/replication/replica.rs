//! The outbound replication client: the four-step handshake (§4.5.1) and the
//! post-handshake command ingestion loop (§4.5.2).

use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;

use crate::commands::{self, Command, ReplConfArg};
use crate::protocol::{Frame, FrameReader, FrameWriter};
use crate::rdb;
use crate::server::{Role, ServerContext};

/// Performs the handshake against `ctx`'s configured master and spawns the background
/// thread that ingests the live command stream afterward. Any handshake failure is
/// returned to the caller, which treats it as fatal to the process (§7: "Handshake
/// errors (replica side, at startup): fatal; the process exits non-zero").
pub fn start(ctx: Arc<ServerContext>, listening_port: u16) -> anyhow::Result<()> {
    let stream = connect_and_sync(&ctx, listening_port)?;
    std::thread::Builder::new()
        .name("replica-ingest".into())
        .spawn(move || ingest(ctx, stream))
        .context("failed to spawn replication ingestion thread")?;
    Ok(())
}

/// Runs the four-step handshake, applies the returned RDB snapshot to the keyspace,
/// and returns the still-open connection ready for post-handshake streaming.
fn connect_and_sync(ctx: &Arc<ServerContext>, listening_port: u16) -> anyhow::Result<TcpStream> {
    let (host, port) = match &ctx.role {
        Role::Replica {
            master_host,
            master_port,
        } => (master_host.clone(), *master_port),
        Role::Master { .. } => unreachable!("connect_and_sync called on a master context"),
    };

    let stream = TcpStream::connect((host.as_str(), port))
        .with_context(|| format!("connecting to master at {host}:{port}"))?;
    stream.set_nodelay(true).ok();

    let mut reader = FrameReader::new(stream.try_clone().context("cloning handshake socket")?);
    let mut writer = FrameWriter::new(stream.try_clone().context("cloning handshake socket")?);

    send_command(&mut writer, &[b"PING"])?;
    expect_reply(&mut reader, "PING")?;

    send_command(
        &mut writer,
        &[
            b"REPLCONF",
            b"listening-port",
            listening_port.to_string().as_bytes(),
        ],
    )?;
    expect_reply(&mut reader, "REPLCONF listening-port")?;

    send_command(&mut writer, &[b"REPLCONF", b"capa", b"psync2"])?;
    expect_reply(&mut reader, "REPLCONF capa")?;

    send_command(&mut writer, &[b"PSYNC", b"?", b"-1"])?;
    let fullresync = reader
        .read_frame()
        .context("reading PSYNC reply")?
        .ok_or_else(|| anyhow::anyhow!("master closed the connection during PSYNC"))?;
    match &fullresync {
        Frame::SimpleString(s) if s.starts_with("FULLRESYNC") => {}
        other => anyhow::bail!("unexpected PSYNC reply: {other:?}"),
    }

    let snapshot = reader
        .read_rdb_blob()
        .context("reading RDB snapshot after FULLRESYNC")?;
    apply_snapshot(ctx, &snapshot);

    tracing::info!(host, port, "replication handshake complete");
    Ok(stream)
}

fn send_command(writer: &mut FrameWriter<TcpStream>, parts: &[&[u8]]) -> anyhow::Result<()> {
    writer.write_frame(&Frame::command(parts))?;
    writer.flush()?;
    Ok(())
}

fn expect_reply(reader: &mut FrameReader<TcpStream>, step: &str) -> anyhow::Result<()> {
    match reader.read_frame()? {
        Some(_) => Ok(()),
        None => anyhow::bail!("master closed the connection during {step}"),
    }
}

fn apply_snapshot(ctx: &Arc<ServerContext>, snapshot: &[u8]) {
    match rdb::load_from_reader(std::io::Cursor::new(snapshot), &ctx.keyspace) {
        Ok(count) => tracing::info!(keys = count, "applied snapshot received from master"),
        Err(err) => tracing::warn!(error = %err, "failed to apply snapshot received from master"),
    }
}

/// Reads and applies propagated commands from the master until the connection closes
/// or an I/O or protocol error occurs (§4.5.2). Never responds, except to
/// `REPLCONF GETACK *`.
fn ingest(ctx: Arc<ServerContext>, stream: TcpStream) {
    let mut reader = match stream.try_clone() {
        Ok(s) => FrameReader::new(s),
        Err(err) => {
            tracing::error!(error = %err, "failed to clone replication stream for reading");
            return;
        }
    };
    let mut writer = FrameWriter::new(stream);

    loop {
        let frame = match reader.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::warn!("master closed the replication connection");
                break;
            }
            Err(err) => {
                tracing::warn!(error = %err, "replication stream read failed");
                break;
            }
        };
        let encoded_len = frame.encode_to_vec().len() as u64;

        let Frame::Array(items) = &frame else {
            tracing::warn!("ignoring non-array frame on the replication stream");
            continue;
        };
        let Some(name) = items
            .first()
            .and_then(Frame::as_bulk)
            .map(|b| String::from_utf8_lossy(b).to_ascii_uppercase())
        else {
            continue;
        };
        let args = &items[1..];

        let command = match Command::parse(&name, args) {
            Ok(cmd) => cmd,
            Err(err) => {
                tracing::warn!(error = %err.0, "failed to parse propagated command");
                ctx.bytes_written.fetch_add(encoded_len, Ordering::SeqCst);
                continue;
            }
        };

        if let Command::ReplConf(ReplConfArg::GetAck) = &command {
            // The offset reported is the one observed *before* this GETACK frame is
            // folded into bytes_written (§4.5.2).
            let offset = ctx.bytes_written.load(Ordering::SeqCst);
            let ack = Frame::command(&[b"REPLCONF", b"ACK", offset.to_string().as_bytes()]);
            let sent = writer.write_frame(&ack).and_then(|_| writer.flush());
            if let Err(err) = sent {
                tracing::warn!(error = %err, "failed to send REPLCONF ACK");
                break;
            }
        } else {
            commands::execute(&ctx, &command);
        }

        ctx.bytes_written.fetch_add(encoded_len, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    use crate::keyspace::Keyspace;

    #[test]
    fn applies_an_empty_snapshot_without_panicking() {
        let keyspace = StdArc::new(Keyspace::new());
        let empty = rdb::empty_rdb();
        let count = rdb::load_from_reader(std::io::Cursor::new(empty), &keyspace).unwrap();
        assert_eq!(count, 0);
    }
}
