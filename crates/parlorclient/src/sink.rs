use crate::state::ChatEntry;
use crate::state::RosterEntry;

/// Presentation variant selected by the current location's service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Offline,
    Lobby,
    TicTacToe,
    Gomoku,
    Chess,
}

impl Variant {
    /// `None` for service types this client does not know how to present.
    pub fn for_service(kind: i32) -> Option<Variant> {
        match kind {
            0 => Some(Variant::Lobby),
            1 => Some(Variant::TicTacToe),
            2 => Some(Variant::Gomoku),
            3 => Some(Variant::Chess),
            _ => None,
        }
    }
}

/// The presentation side of a session, implemented by the GUI layer (or a
/// bot). Callbacks run on the session's reader task and must return quickly;
/// none of them is ever invoked while the engine holds the state lock, so
/// they may take fresh snapshots through the handle if they need more than
/// the argument.
pub trait Sink: Send + Sync {
    fn on_roster_changed(&self, roster: &[RosterEntry]);

    fn on_messages_changed(&self, messages: &[ChatEntry]);

    /// The local user entered a new location whose presentation resolved.
    /// `service` is the location's service type, `None` for offline.
    fn on_location_changed(&self, variant: Variant, service: Option<i32>);

    /// Every inbound line, recognized or not, in arrival order. Game
    /// sub-protocols ride this channel.
    fn on_raw_line(&self, line: &str);

    /// The session ended. Fired exactly once per session.
    fn on_disconnected(&self, reason: &str);

    /// Periodic re-render request from the refresh ticker. No protocol
    /// semantics; default is to ignore it.
    fn on_refresh(&self) {}
}
