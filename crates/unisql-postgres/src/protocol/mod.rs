//! PostgreSQL wire protocol (version 3.0).
//!
//! # Message Format
//!
//! ## Standard Message (after startup)
//! ```text
//! +------+--------+------------------+
//! | Type | Length | Payload          |
//! | 1B   | 4B     | (Length-4) bytes |
//! +------+--------+------------------+
//! ```
//!
//! Length includes itself (4 bytes) but not the type byte.
//!
//! ## Startup and SSL request
//! ```text
//! +--------+------------------+
//! | Length | Payload          |
//! | 4B     | (Length-4) bytes |
//! +--------+------------------+
//! ```
//!
//! No type byte.

mod messages;
mod reader;
mod writer;

pub use messages::*;
pub use reader::{MessageReader, ProtocolError};
pub use writer::MessageWriter;
