use chrono::DateTime;
use chrono::Utc;

/// One known participant. The roster slot index is the participant id, so
/// records are never moved or compacted; a departed participant leaves a
/// `None` hole behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub id: u32,
    /// Unknown until a `NAME` or `ALL` supplies one.
    pub name: Option<String>,
    /// Service-table index, `-1` while unknown.
    pub location: i32,
}

impl ClientRecord {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            name: None,
            location: -1,
        }
    }

    pub fn with_profile(id: u32, name: &str, location: i32) -> Self {
        Self {
            id,
            name: Some(name.to_string()),
            location,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => format!("User{}", self.id),
        }
    }
}

/// One line of the chat transcript. Never mutated after creation; the log is
/// cleared as a whole on location change and on disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub body: String,
    pub sender: String,
    pub is_system: bool,
    pub is_whisper: bool,
    pub at: DateTime<Utc>,
}

impl ChatEntry {
    pub(crate) fn system(body: String) -> Self {
        Self {
            body,
            sender: "Server".to_string(),
            is_system: true,
            is_whisper: false,
            at: Utc::now(),
        }
    }

    pub(crate) fn chat(body: String, sender: String, is_whisper: bool) -> Self {
        Self {
            body,
            sender,
            is_system: false,
            is_whisper,
            at: Utc::now(),
        }
    }
}

/// Display-ready roster snapshot entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: u32,
    pub name: String,
    pub location: i32,
    pub is_self: bool,
    /// In the same location as the local user. A location out of range for
    /// the service table counts as "here" for display purposes only; the
    /// recorded location itself is left alone.
    pub is_here: bool,
}

/// The local participant's view of itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Server-assigned, `None` until the `ID` handshake reply.
    pub id: Option<u32>,
    pub name: Option<String>,
    /// Current location, `-1` while offline or unplaced.
    pub location: i32,
}

/// The authoritative in-memory session model. Pure data, no I/O: the engine
/// mutates it from the reader task, consumers read it through snapshots
/// taken under a short-lived lock.
#[derive(Debug)]
pub struct SessionState {
    pub(crate) roster: Vec<Option<ClientRecord>>,
    pub(crate) services: Vec<i32>,
    pub(crate) messages: Vec<ChatEntry>,
    pub(crate) self_id: Option<u32>,
    pub(crate) name: Option<String>,
    pub(crate) location: i32,
    pub(crate) connected: bool,
    /// The current location's presentation variant could not be resolved yet
    /// (service table too short or carrying an unknown type). A repeated
    /// location-change to the same target re-attempts resolution while this
    /// is set.
    pub(crate) variant_pending: bool,
}

impl SessionState {
    pub fn new(name: Option<String>) -> Self {
        Self {
            roster: Vec::new(),
            services: Vec::new(),
            messages: Vec::new(),
            self_id: None,
            name,
            location: -1,
            connected: true,
            variant_pending: false,
        }
    }

    /// Grow the roster so that slot `id` exists (as an empty hole if new).
    pub(crate) fn ensure_slot(&mut self, id: usize) {
        while self.roster.len() <= id {
            self.roster.push(None);
        }
    }

    pub fn record(&self, id: u32) -> Option<&ClientRecord> {
        self.roster.get(id as usize).and_then(|s| s.as_ref())
    }

    pub(crate) fn record_mut(&mut self, id: u32) -> Option<&mut ClientRecord> {
        self.roster.get_mut(id as usize).and_then(|s| s.as_mut())
    }

    /// Display name for slot `id`, defaulting when the slot is empty or the
    /// name has not arrived yet.
    pub fn display_name(&self, id: u32) -> String {
        match self.record(id) {
            Some(rec) => rec.display_name(),
            None => format!("User{id}"),
        }
    }

    /// Grow/overwrite the service table at `idx`.
    pub(crate) fn set_service(&mut self, idx: usize, kind: i32) {
        while self.services.len() <= idx {
            self.services.push(kind);
        }
        self.services[idx] = kind;
    }

    /// Service type at `location`, `None` while the table has not caught up.
    pub fn service_kind(&self, location: i32) -> Option<i32> {
        usize::try_from(location)
            .ok()
            .and_then(|i| self.services.get(i).copied())
    }

    pub fn identity(&self) -> Identity {
        Identity {
            id: self.self_id,
            name: self.name.clone(),
            location: self.location,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn messages_snapshot(&self) -> Vec<ChatEntry> {
        self.messages.clone()
    }

    /// Display list: the local user first, then everyone sharing the local
    /// location, then everyone known to be elsewhere. Empty while offline.
    pub fn roster_view(&self) -> Vec<RosterEntry> {
        if self.location < 0 {
            return Vec::new();
        }

        let mut out = Vec::new();
        if let Some(id) = self.self_id {
            out.push(RosterEntry {
                id,
                name: self
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("User{id}")),
                location: self.location,
                is_self: true,
                is_here: true,
            });
        }

        let mut elsewhere = Vec::new();
        for rec in self.roster.iter().flatten() {
            if Some(rec.id) == self.self_id {
                continue;
            }
            let out_of_range = rec.location >= 0 && self.service_kind(rec.location).is_none();
            let entry = RosterEntry {
                id: rec.id,
                name: rec.display_name(),
                location: rec.location,
                is_self: false,
                is_here: rec.location == self.location || out_of_range,
            };
            if entry.is_here {
                out.push(entry);
            } else {
                elsewhere.push(entry);
            }
        }
        out.extend(elsewhere);
        out
    }
}
