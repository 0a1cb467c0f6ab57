//! Master-side replica bookkeeping: registration, command fan-out, and the
//! `bytes_written` offset (§4.5.3).

use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::protocol::Frame;
use crate::server::{ReplicaHandle, Role, ServerContext};

/// Registers `stream` as a replica once its PSYNC has been answered with FULLRESYNC and
/// the snapshot fully written (§4.5.3 step 3; §4.5.4 state machine: Syncing→Streaming).
/// A no-op if `ctx` is not a master — callers only reach PSYNC handling on the master
/// side, but this stays defensive rather than panicking.
pub fn register(ctx: &Arc<ServerContext>, stream: &TcpStream) {
    let Role::Master { replicas, .. } = &ctx.role else {
        return;
    };
    let addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(err) => {
            tracing::warn!(error = %err, "dropping PSYNC connection with no peer address");
            return;
        }
    };
    let cloned = match stream.try_clone() {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(%addr, error = %err, "failed to clone replica stream for registration");
            return;
        }
    };
    replicas
        .lock()
        .expect("replica set lock poisoned")
        .push(ReplicaHandle { stream: cloned, addr });
    tracing::info!(%addr, "replica registered");
}

/// Fans `bytes` (the verbatim encoded request frame, §4.4 step 4) out to every
/// registered replica and advances `bytes_written`. Ordering to any single replica
/// matches call order; there is no ordering guarantee across replicas (§5). A replica
/// whose write fails is dropped from the set (§4.5.3: "Fan-out failures remove the
/// failing replica from the set").
pub fn propagate(ctx: &Arc<ServerContext>, bytes: &[u8]) {
    if let Role::Master { replicas, .. } = &ctx.role {
        let mut guard = replicas.lock().expect("replica set lock poisoned");
        guard.retain_mut(|replica| match replica.stream.write_all(bytes) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(addr = %replica.addr, error = %err, "dropping replica after a failed write");
                false
            }
        });
    }
    ctx.bytes_written.fetch_add(bytes.len() as u64, Ordering::SeqCst);
}

/// Sends `REPLCONF GETACK *` to every registered replica (§4.5.4: the probe `WAIT`
/// uses to solicit fresh acknowledgements). Returns the number of replicas the probe
/// was sent to, used for the zero-write shortcut and as the acknowledgement target.
pub fn request_acks(ctx: &Arc<ServerContext>) -> usize {
    let Role::Master { replicas, .. } = &ctx.role else {
        return 0;
    };
    let getack = Frame::command(&[b"REPLCONF", b"GETACK", b"*"]).encode_to_vec();
    let mut guard = replicas.lock().expect("replica set lock poisoned");
    guard.retain_mut(|replica| replica.stream.write_all(&getack).is_ok());
    guard.len()
}

/// The number of currently registered replicas, used by `WAIT`'s zero-write shortcut
/// (§4.5.4) and by `INFO`/diagnostics.
pub fn replica_count(ctx: &Arc<ServerContext>) -> usize {
    match &ctx.role {
        Role::Master { replicas, .. } => replicas.lock().expect("replica set lock poisoned").len(),
        Role::Replica { .. } => 0,
    }
}
