use crate::ProtoError;

/// A command the client sends to the server.
///
/// `Chat` text beginning with `/follow <name>` or `/msg <name> <text>` is
/// interpreted server-side; on the wire it is a plain `MSG;` payload, not a
/// distinct command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Handshake probe sent immediately after the socket opens.
    Acknowledge,
    /// Announce the connection once an `ID` has been assigned.
    Connect,
    /// Set the display name.
    Name { name: String },
    /// Request a full roster/service resync.
    Info,
    /// Public chat.
    Chat { text: String },
    /// Leave, with a human-readable reason.
    Disconnect { reason: String },
}

pub fn encode(cmd: &ClientCommand) -> String {
    match cmd {
        ClientCommand::Acknowledge => "ACKNOWLEDGE ME!".to_string(),
        ClientCommand::Connect => "CON;".to_string(),
        ClientCommand::Name { name } => format!("NAME;{name}"),
        ClientCommand::Info => "INFO;".to_string(),
        ClientCommand::Chat { text } => format!("MSG;{text}"),
        ClientCommand::Disconnect { reason } => format!("DCON;{reason}"),
    }
}

pub fn parse(line: &str) -> Result<ClientCommand, ProtoError> {
    if line == "ACKNOWLEDGE ME!" {
        return Ok(ClientCommand::Acknowledge);
    }
    if let Some(rest) = line.strip_prefix("CON;") {
        if !rest.is_empty() {
            return Err(ProtoError::Malformed("CON; carries no payload"));
        }
        return Ok(ClientCommand::Connect);
    }
    if let Some(rest) = line.strip_prefix("NAME;") {
        return Ok(ClientCommand::Name {
            name: rest.to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("INFO;") {
        if !rest.is_empty() {
            return Err(ProtoError::Malformed("INFO; carries no payload"));
        }
        return Ok(ClientCommand::Info);
    }
    if let Some(rest) = line.strip_prefix("MSG;") {
        return Ok(ClientCommand::Chat {
            text: rest.to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("DCON;") {
        return Ok(ClientCommand::Disconnect {
            reason: rest.to_string(),
        });
    }
    Err(ProtoError::UnknownPrefix)
}
