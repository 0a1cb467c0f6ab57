//! Master/replica replication (§4.5): the handshake state machine, RDB snapshot
//! transfer, command propagation, replication-offset bookkeeping, and the `WAIT`
//! acknowledgement quorum.

pub mod master;
pub mod replica;
pub mod wait;
