//! `parlorio`: line-framed IO for the parlor wire protocol.
//!
//! The protocol is newline-terminated UTF-8 text, one message per line, no
//! length prefix. This crate owns exactly that framing and nothing else:
//! - incremental line reads without copying more than once
//!   (`BytesMut::split_to`),
//! - a write side that appends the terminator and flushes per line, because
//!   the protocol is interactive and buffering a reply is never acceptable.

pub mod line;

pub use line::LineReader;
pub use line::LineWriter;
