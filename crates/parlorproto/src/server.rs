use crate::split_bracket;
use crate::{parse_i32, parse_u32, ProtoError};

/// One slot of an `ALL;` full roster resync. Slot index equals client id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterSlot {
    /// Empty pair: clear the slot.
    Clear,
    /// The literal pair `","`: slot reserved, leave whatever is there alone.
    Keep,
    /// Replace the slot with a fresh record.
    Set { name: String, location: i32 },
}

/// A command pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// Server assigns the local identity.
    Id { id: u32 },
    /// Participant `id` connected.
    Connected { id: u32 },
    /// Participant `id` disconnected.
    Disconnected { id: u32, reason: String },
    /// Public chat from `id`.
    Chat { id: u32, body: String },
    /// Private chat from `id`.
    Whisper { id: u32, body: String },
    /// Reply-whisper from `id` (rendered as a whisper).
    WhisperReply { id: u32, body: String },
    /// Server broadcast.
    Server { body: String },
    /// Full roster resync, slot index = id.
    Roster { slots: Vec<RosterSlot> },
    /// Full service-table resync.
    Services { kinds: Vec<i32> },
    /// One service appended to the table.
    NewService { kind: i32 },
    /// Participant `id` renamed.
    Renamed { id: u32, name: String },
    /// Participant `id` moved to another location.
    Moved { id: u32, location: i32 },
}

/// Parse one inbound line.
///
/// `Err(ProtoError::UnknownPrefix)` means the line belongs to a game
/// sub-protocol, not that the stream is broken.
pub fn parse(line: &str) -> Result<ServerCommand, ProtoError> {
    if let Some(rest) = line.strip_prefix("ID;") {
        return Ok(ServerCommand::Id {
            id: parse_u32(rest, "id")?,
        });
    }
    if let Some(rest) = line.strip_prefix("CON;") {
        return Ok(ServerCommand::Connected {
            id: parse_u32(rest, "id")?,
        });
    }
    if let Some(rest) = line.strip_prefix("DCON[") {
        let (id, reason) = split_bracket(rest)?;
        return Ok(ServerCommand::Disconnected {
            id,
            reason: reason.to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("MSG[") {
        let (id, body) = split_bracket(rest)?;
        return Ok(ServerCommand::Chat {
            id,
            body: body.to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("PMSG[") {
        let (id, body) = split_bracket(rest)?;
        return Ok(ServerCommand::Whisper {
            id,
            body: body.to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("RMSG[") {
        let (id, body) = split_bracket(rest)?;
        return Ok(ServerCommand::WhisperReply {
            id,
            body: body.to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("SMSG;") {
        return Ok(ServerCommand::Server {
            body: rest.to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("ALL;") {
        return Ok(ServerCommand::Roster {
            slots: parse_roster(rest)?,
        });
    }
    if let Some(rest) = line.strip_prefix("SERV;") {
        let mut kinds = Vec::new();
        for part in rest.split(',') {
            kinds.push(parse_i32(part, "service")?);
        }
        return Ok(ServerCommand::Services { kinds });
    }
    if let Some(rest) = line.strip_prefix("NEW;") {
        return Ok(ServerCommand::NewService {
            kind: parse_i32(rest, "service")?,
        });
    }
    if let Some(rest) = line.strip_prefix("NAME[") {
        let (id, name) = split_bracket(rest)?;
        return Ok(ServerCommand::Renamed {
            id,
            name: name.to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("MOVED[") {
        let (id, loc) = split_bracket(rest)?;
        return Ok(ServerCommand::Moved {
            id,
            location: parse_i32(loc, "location")?,
        });
    }
    Err(ProtoError::UnknownPrefix)
}

fn parse_roster(rest: &str) -> Result<Vec<RosterSlot>, ProtoError> {
    let mut pairs: Vec<&str> = rest.split(';').collect();
    // Trailing empty pairs carry no slot data; dropping them keeps a resync
    // from clearing slots past the end of what the server actually sent.
    while pairs.last() == Some(&"") {
        pairs.pop();
    }

    let mut slots = Vec::with_capacity(pairs.len());
    for pair in pairs {
        if pair.is_empty() {
            slots.push(RosterSlot::Clear);
            continue;
        }
        if pair == "," {
            slots.push(RosterSlot::Keep);
            continue;
        }
        let Some((name, loc)) = pair.split_once(',') else {
            return Err(ProtoError::Malformed("roster pair without ','"));
        };
        if name.is_empty() {
            slots.push(RosterSlot::Clear);
            continue;
        }
        slots.push(RosterSlot::Set {
            name: name.to_string(),
            location: parse_i32(loc, "location")?,
        });
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse("ID;7").unwrap(), ServerCommand::Id { id: 7 });
        assert_eq!(parse("CON;4").unwrap(), ServerCommand::Connected { id: 4 });
        assert_eq!(
            parse("NEW;2").unwrap(),
            ServerCommand::NewService { kind: 2 }
        );
        assert_eq!(
            parse("SERV;0,1,2").unwrap(),
            ServerCommand::Services {
                kinds: vec![0, 1, 2]
            }
        );
    }

    #[test]
    fn bracket_payload_may_contain_the_delimiter() {
        assert_eq!(
            parse("MSG[3]a ] b ] c").unwrap(),
            ServerCommand::Chat {
                id: 3,
                body: "a ] b ] c".to_string()
            }
        );
        assert_eq!(
            parse("DCON[7]Window Closed").unwrap(),
            ServerCommand::Disconnected {
                id: 7,
                reason: "Window Closed".to_string()
            }
        );
        assert_eq!(
            parse("NAME[2]the]ripper").unwrap(),
            ServerCommand::Renamed {
                id: 2,
                name: "the]ripper".to_string()
            }
        );
    }

    #[test]
    fn whisper_shapes() {
        assert_eq!(
            parse("PMSG[1]psst").unwrap(),
            ServerCommand::Whisper {
                id: 1,
                body: "psst".to_string()
            }
        );
        assert_eq!(
            parse("RMSG[1]back at you").unwrap(),
            ServerCommand::WhisperReply {
                id: 1,
                body: "back at you".to_string()
            }
        );
        assert_eq!(
            parse("SMSG;restarting soon").unwrap(),
            ServerCommand::Server {
                body: "restarting soon".to_string()
            }
        );
    }

    #[test]
    fn roster_pair_forms() {
        let cmd = parse("ALL;alice,0;;,;bob,2").unwrap();
        assert_eq!(
            cmd,
            ServerCommand::Roster {
                slots: vec![
                    RosterSlot::Set {
                        name: "alice".to_string(),
                        location: 0
                    },
                    RosterSlot::Clear,
                    RosterSlot::Keep,
                    RosterSlot::Set {
                        name: "bob".to_string(),
                        location: 2
                    },
                ]
            }
        );
    }

    #[test]
    fn roster_trailing_empty_pairs_are_dropped() {
        let cmd = parse("ALL;alice,0;").unwrap();
        assert_eq!(
            cmd,
            ServerCommand::Roster {
                slots: vec![RosterSlot::Set {
                    name: "alice".to_string(),
                    location: 0
                }]
            }
        );
    }

    #[test]
    fn moved_needs_an_integer_location() {
        assert_eq!(
            parse("MOVED[5]1").unwrap(),
            ServerCommand::Moved {
                id: 5,
                location: 1
            }
        );
        assert_eq!(
            parse("MOVED[5]north").unwrap_err(),
            ProtoError::BadInt("location")
        );
    }

    #[test]
    fn malformed_and_unknown_are_distinct() {
        assert_eq!(
            parse("DCON[7 no bracket").unwrap_err(),
            ProtoError::Malformed("missing ']'")
        );
        assert_eq!(parse("CON;abc").unwrap_err(), ProtoError::BadInt("id"));
        assert_eq!(parse("TTT;0,0").unwrap_err(), ProtoError::UnknownPrefix);
        assert_eq!(parse("").unwrap_err(), ProtoError::UnknownPrefix);
    }
}
