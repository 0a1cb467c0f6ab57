//! The process-wide server context (§9 design note): the keyspace, replication role,
//! and configuration threaded to every connection and command handler as one `Arc`,
//! replacing the source's reliance on process globals.

pub mod bootstrap;

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::keyspace::Keyspace;
use crate::replication::wait::WaitBarrier;

/// A connection that has completed PSYNC and is now being streamed write commands
/// (§3: `ReplicaSession`). Removed from the master's set on any I/O failure.
pub struct ReplicaHandle {
    pub stream: TcpStream,
    pub addr: SocketAddr,
}

/// The replication role a running server holds, and the state specific to it.
pub enum Role {
    Master {
        replicas: Mutex<Vec<ReplicaHandle>>,
        wait_barrier: WaitBarrier,
    },
    Replica {
        master_host: String,
        master_port: u16,
    },
}

/// Everything a command or connection handler needs to read or mutate.
pub struct ServerContext {
    pub config: Config,
    pub keyspace: Arc<Keyspace>,
    pub role: Role,
    /// A 40-hex-character replication ID, fixed for this process's lifetime (§4.2).
    pub replid: String,
    /// Bytes of propagated write commands emitted (master) or applied (replica) since
    /// process start (§3: Replication offset).
    pub bytes_written: AtomicU64,
}

impl ServerContext {
    pub fn new_master(config: Config, keyspace: Arc<Keyspace>) -> Arc<Self> {
        Arc::new(Self {
            config,
            keyspace,
            role: Role::Master {
                replicas: Mutex::new(Vec::new()),
                wait_barrier: WaitBarrier::new(),
            },
            replid: generate_replid(),
            bytes_written: AtomicU64::new(0),
        })
    }

    pub fn new_replica(
        config: Config,
        keyspace: Arc<Keyspace>,
        master_host: String,
        master_port: u16,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            keyspace,
            role: Role::Replica {
                master_host,
                master_port,
            },
            replid: generate_replid(),
            bytes_written: AtomicU64::new(0),
        })
    }

    pub fn is_master(&self) -> bool {
        matches!(self.role, Role::Master { .. })
    }
}

/// Generates a 40-hex-character replication ID. Real Redis derives this from a PRNG
/// seeded at startup; this server only needs the *shape* to be right (§4.2: "a fixed
/// constant per master lifetime"), so a small xorshift seeded from the clock is enough.
fn generate_replid() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x2545F4914F6CDD1D);
    let mut x = seed ^ 0x9E3779B97F4A7C15;
    let mut replid = String::with_capacity(40);
    for _ in 0..40 {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        replid.push(std::char::from_digit((x % 16) as u32, 16).expect("0..16 is a valid digit"));
    }
    replid
}
