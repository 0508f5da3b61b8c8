//! `parlorproto`: typed commands and wire codec for the parlor session
//! protocol.
//!
//! The wire format is ad-hoc positional text, one command per line. Each
//! command is a fixed prefix token followed by either a `;` and free text to
//! end of line, or a `[`, one integer field, a `]`, and a trailing payload.
//! The trailing payload is taken by offset from the first `]` and is never
//! split again - chat bodies may legitimately contain the delimiter.
//!
//! `server` models the inbound direction (server pushes), `client` the
//! outbound one. Both directions parse as well as encode so that a command
//! can be round-tripped through its wire form.

pub mod client;
pub mod server;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// The line does not start with any known command prefix. Not fatal at
    /// the session level: such lines belong to game sub-protocols riding the
    /// same stream.
    UnknownPrefix,
    Malformed(&'static str),
    BadInt(&'static str),
}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::UnknownPrefix => write!(f, "unknown command prefix"),
            ProtoError::Malformed(s) => write!(f, "malformed command: {s}"),
            ProtoError::BadInt(field) => write!(f, "bad integer field: {field}"),
        }
    }
}

impl std::error::Error for ProtoError {}

fn parse_u32(s: &str, field: &'static str) -> Result<u32, ProtoError> {
    s.parse().map_err(|_| ProtoError::BadInt(field))
}

fn parse_i32(s: &str, field: &'static str) -> Result<i32, ProtoError> {
    s.parse().map_err(|_| ProtoError::BadInt(field))
}

/// Split `rest` (everything after a `PREFIX[` token) into the single leading
/// integer field and the trailing payload after the first `]`.
fn split_bracket(rest: &str) -> Result<(u32, &str), ProtoError> {
    let Some(i) = rest.find(']') else {
        return Err(ProtoError::Malformed("missing ']'"));
    };
    let id = parse_u32(&rest[..i], "id")?;
    Ok((id, &rest[i + 1..]))
}
