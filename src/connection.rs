//! Per-connection request handling (§4.4): decode, dispatch, and — for the three
//! commands that need more than the keyspace (`PSYNC`, `REPLCONF`, `WAIT`) — the
//! connection-level state a pure `commands::execute` can't reach.

use std::fs;
use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::commands::{self, Command, ReplConfArg};
use crate::config::Config;
use crate::protocol::{Frame, FrameReader, FrameWriter};
use crate::rdb;
use crate::replication::master;
use crate::server::{Role, ServerContext};

/// Handles one accepted connection until the peer disconnects or a transport-level
/// error occurs. A connection that issues `PSYNC` is handed off to
/// [`serve_replica_feed`] once the snapshot has been sent and is never treated as an
/// ordinary client connection again (§4.5.3).
pub fn handle(ctx: Arc<ServerContext>, stream: TcpStream) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());

    let mut reader = match stream.try_clone() {
        Ok(s) => FrameReader::new(s),
        Err(err) => {
            tracing::warn!(%peer, error = %err, "failed to clone connection for reading");
            return;
        }
    };
    let mut writer = FrameWriter::new(match stream.try_clone() {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(%peer, error = %err, "failed to clone connection for writing");
            return;
        }
    });

    loop {
        let frame = match reader.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(%peer, error = %err, "connection closed after a protocol error");
                break;
            }
        };

        let Frame::Array(items) = &frame else {
            // §4.4 step 2: a non-array top-level frame is logged and skipped, not
            // answered — an unsolicited reply here would misalign a pipelining
            // client's request/response ordering.
            tracing::warn!(%peer, ?frame, "ignoring a non-array top-level request frame");
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
                let _ = writer.write_frame(&Frame::Error(err.0));
                let _ = writer.flush();
                continue;
            }
        };

        match &command {
            Command::Psync => {
                if handle_psync(&ctx, &stream, &mut writer).is_err() {
                    break;
                }
                // The connection is now a replica feed: the write half is driven by
                // `master::propagate`/`request_acks` from other threads, and this
                // thread's job narrows to relaying `REPLCONF ACK` into the wait
                // barrier until the connection drops.
                serve_replica_feed(&ctx, &mut reader, &peer);
                break;
            }
            Command::ReplConf(arg) => handle_replconf(&ctx, arg, &mut writer),
            Command::Wait {
                num_replicas,
                timeout_ms,
            } => handle_wait(&ctx, *num_replicas, *timeout_ms, &mut writer),
            _ => {
                let propagate_bytes = commands::is_write_class(&command).then(|| frame.encode_to_vec());
                if let Some(reply) = commands::execute(&ctx, &command) {
                    let _ = writer.write_frame(&reply);
                    let _ = writer.flush();
                }
                if let Some(bytes) = propagate_bytes {
                    if ctx.is_master() {
                        master::propagate(&ctx, &bytes);
                    }
                }
            }
        }
    }
}

fn handle_psync(
    ctx: &Arc<ServerContext>,
    stream: &TcpStream,
    writer: &mut FrameWriter<TcpStream>,
) -> Result<(), ()> {
    if !ctx.is_master() {
        let _ = writer.write_frame(&Frame::Error(
            "ERR PSYNC is only valid against a master".into(),
        ));
        let _ = writer.flush();
        return Err(());
    }
    let offset = ctx.bytes_written.load(Ordering::SeqCst);
    let fullresync = Frame::SimpleString(format!("FULLRESYNC {} {offset}", ctx.replid));
    if writer.write_frame(&fullresync).is_err() || writer.flush().is_err() {
        return Err(());
    }
    let snapshot = snapshot_bytes(&ctx.config);
    if writer.write_rdb_blob(&snapshot).is_err() {
        return Err(());
    }
    master::register(ctx, stream);
    Ok(())
}

/// Reads frames from an established replica connection for as long as it stays open,
/// relaying every `REPLCONF ACK` into the master's `WAIT` barrier (§4.5.4). All other
/// traffic on this connection (there shouldn't be any) is ignored.
fn serve_replica_feed(ctx: &Arc<ServerContext>, reader: &mut FrameReader<TcpStream>, peer: &str) {
    loop {
        let frame = match reader.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!(%peer, "replica disconnected");
                break;
            }
            Err(err) => {
                tracing::warn!(%peer, error = %err, "replica connection read failed");
                break;
            }
        };
        let Frame::Array(items) = &frame else { continue };
        let Some(name) = items
            .first()
            .and_then(Frame::as_bulk)
            .map(|b| String::from_utf8_lossy(b).to_ascii_uppercase())
        else {
            continue;
        };
        if name == "REPLCONF" {
            if let Ok(Command::ReplConf(ReplConfArg::Ack(_))) = Command::parse(&name, &items[1..]) {
                if let Role::Master { wait_barrier, .. } = &ctx.role {
                    wait_barrier.notify();
                }
            }
        }
    }
}

fn handle_replconf(ctx: &Arc<ServerContext>, arg: &ReplConfArg, writer: &mut FrameWriter<TcpStream>) {
    match arg {
        ReplConfArg::Ack(_) => {
            // A client-path ACK outside the replica feed loop; nothing to reply to.
            if let Role::Master { wait_barrier, .. } = &ctx.role {
                wait_barrier.notify();
            }
        }
        ReplConfArg::GetAck => {}
        ReplConfArg::ListeningPort(_) | ReplConfArg::Capa(_) => {
            let _ = writer.write_frame(&Frame::SimpleString("OK".into()));
            let _ = writer.flush();
        }
    }
}

/// `WAIT numreplicas timeout` (§4.5.4): blocks for up to `timeout_ms` milliseconds for
/// `num_replicas` replicas to acknowledge the current write offset, replying with how
/// many actually did.
fn handle_wait(
    ctx: &Arc<ServerContext>,
    num_replicas: i64,
    timeout_ms: i64,
    writer: &mut FrameWriter<TcpStream>,
) {
    let reply = match &ctx.role {
        Role::Replica { .. } => Frame::Integer(0),
        Role::Master { wait_barrier, .. } => {
            let connected = master::replica_count(ctx) as i64;
            if ctx.bytes_written.load(Ordering::SeqCst) == 0 {
                Frame::Integer(connected)
            } else {
                wait_barrier.begin();
                master::request_acks(ctx);
                let acked = wait_barrier.wait_for(num_replicas, Duration::from_millis(timeout_ms.max(0) as u64));
                Frame::Integer(acked)
            }
        }
    };
    let _ = writer.write_frame(&reply);
    let _ = writer.flush();
}

/// The raw bytes to hand a freshly-`PSYNC`ing replica: the configured RDB file,
/// forwarded byte-for-byte rather than re-parsed, or the embedded empty snapshot if
/// none is configured (§4.5.1 step 4).
fn snapshot_bytes(config: &Config) -> Vec<u8> {
    if config.dir.is_empty() || config.dbfilename.is_empty() {
        return rdb::empty_rdb();
    }
    let path = std::path::Path::new(&config.dir).join(&config.dbfilename);
    fs::read(&path).unwrap_or_else(|_| rdb::empty_rdb())
}
