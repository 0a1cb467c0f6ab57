//! The RESP (REdis Serialization Protocol) wire codec.
//!
//! `frame` defines the tagged [`Frame`] value and its canonical byte encoding. `io`
//! defines the streaming [`FrameReader`]/[`FrameWriter`] pair that reads and writes
//! frames directly off a `Read`/`Write` socket, blocking for more bytes instead of
//! failing on a short read.

mod frame;
mod io;

pub use frame::Frame;
pub use io::{FrameReader, FrameWriter};
