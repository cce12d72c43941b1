//! The control protocol.
//!
//! The daemon listens on a loopback TCP socket; non-loopback peers are
//! rejected at accept time. A request is framed as a big-endian `i32`
//! length plus a UTF-8 JSON command, optionally followed by binary payload
//! frames (float columns as little-endian `f64` blobs, string columns as
//! JSON arrays). Every handler replies `"Success!"` (plus any payload
//! frames) or an error string whose first line is the machine-parseable
//! error tag.
//!
//! # Module Structure
//!
//! - `wire` - framing primitives
//! - `commands` - the serde shapes of the command envelope and bodies
//! - `handler` - the per-connection session and verb dispatch

pub mod commands;
pub mod handler;
pub mod wire;

pub use handler::handle_connection;

/// The reply every successful handler leads with.
pub const SUCCESS: &str = "Success!";
