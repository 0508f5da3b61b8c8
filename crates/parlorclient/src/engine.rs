use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use parlorproto::client;
use parlorproto::client::ClientCommand;
use parlorproto::server;
use parlorproto::server::RosterSlot;
use parlorproto::server::ServerCommand;
use parlorproto::ProtoError;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::sink::Sink;
use crate::sink::Variant;
use crate::state::ChatEntry;
use crate::state::ClientRecord;
use crate::state::SessionState;

pub(crate) type SharedState = Arc<Mutex<SessionState>>;

/// What the reader loop should do after a line has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// The session is over (a `DCON` for the local id); tear down after this
    /// line.
    Stop(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Handshaking,
    Active,
}

/// Applies inbound commands to the session state and pushes sink
/// notifications. Lives on the reader task; it is the only writer of the
/// shared state, so inbound mutations never race each other.
pub(crate) struct Engine {
    state: SharedState,
    sink: Arc<dyn Sink>,
    out_tx: mpsc::Sender<String>,
    phase: Phase,
}

impl Engine {
    pub(crate) fn new(state: SharedState, sink: Arc<dyn Sink>, out_tx: mpsc::Sender<String>) -> Self {
        Self {
            state,
            sink,
            out_tx,
            phase: Phase::Handshaking,
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        // Sink callbacks never run under the lock, so a poisoned lock can
        // only mean a panic mid-mutation in this module; the state is still
        // structurally sound.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one inbound line, then forward it raw.
    pub(crate) fn handle_line(&mut self, line: &str) -> Flow {
        let flow = match server::parse(line) {
            Ok(cmd) => self.apply(cmd),
            // Game sub-protocol traffic; the raw forward below is its path.
            Err(ProtoError::UnknownPrefix) => Flow::Continue,
            Err(e) => {
                warn!(err = %e, line, "dropping malformed line");
                Flow::Continue
            }
        };
        self.sink.on_raw_line(line);
        flow
    }

    fn apply(&mut self, cmd: ServerCommand) -> Flow {
        match cmd {
            ServerCommand::Id { id } => {
                let name = {
                    let mut st = self.state();
                    st.self_id = Some(id);
                    if st.name.is_none() {
                        st.name = Some(format!("User{id}"));
                    }
                    st.name.clone()
                };
                if self.phase == Phase::Handshaking {
                    self.phase = Phase::Active;
                    info!(id, "identity assigned; session active");
                }
                self.queue(&ClientCommand::Connect);
                if let Some(name) = name {
                    self.queue(&ClientCommand::Name { name });
                }
                self.queue(&ClientCommand::Info);
                Flow::Continue
            }

            ServerCommand::Connected { id } => {
                let resync = {
                    let mut st = self.state();
                    st.ensure_slot(id as usize);
                    let resync = if st.roster[id as usize].is_none() {
                        st.roster[id as usize] = Some(ClientRecord::new(id));
                        false
                    } else {
                        // A connect for an id we already track: a reconnect
                        // race. Ask for a full resync instead of guessing.
                        true
                    };
                    let who = st.display_name(id);
                    st.messages.push(ChatEntry::system(format!("{who} connected")));
                    resync
                };
                if resync {
                    self.queue(&ClientCommand::Info);
                }
                self.notify_roster();
                self.notify_messages();
                Flow::Continue
            }

            ServerCommand::Disconnected { id, reason } => {
                let (occupied, is_self) = {
                    let mut st = self.state();
                    let is_self = st.self_id == Some(id);
                    let occupied = st.record(id).is_some();
                    if occupied {
                        let who = st.display_name(id);
                        st.messages
                            .push(ChatEntry::system(format!("{who} disconnected: {reason}")));
                        st.roster[id as usize] = None;
                    }
                    (occupied, is_self)
                };
                if occupied {
                    self.notify_roster();
                    self.notify_messages();
                }
                if is_self {
                    return Flow::Stop(reason);
                }
                Flow::Continue
            }

            ServerCommand::Chat { id, body } => {
                self.push_chat(id, body, false);
                Flow::Continue
            }
            ServerCommand::Whisper { id, body } => {
                self.push_chat(id, body, true);
                Flow::Continue
            }
            ServerCommand::WhisperReply { id, body } => {
                self.push_chat(id, body, true);
                Flow::Continue
            }

            ServerCommand::Server { body } => {
                if !body.is_empty() {
                    {
                        let mut st = self.state();
                        st.messages.push(ChatEntry::system(body));
                    }
                    self.notify_messages();
                }
                Flow::Continue
            }

            ServerCommand::Roster { slots } => {
                let move_to = {
                    let mut st = self.state();
                    let mut move_to = None;
                    for (i, slot) in slots.into_iter().enumerate() {
                        st.ensure_slot(i);
                        match slot {
                            RosterSlot::Keep => {}
                            RosterSlot::Clear => st.roster[i] = None,
                            RosterSlot::Set { name, location } => {
                                let id = i as u32;
                                st.roster[i] =
                                    Some(ClientRecord::with_profile(id, &name, location));
                                if st.self_id == Some(id) {
                                    move_to = Some(location);
                                }
                            }
                        }
                    }
                    move_to
                };
                if let Some(loc) = move_to {
                    self.change_location(loc);
                }
                self.notify_roster();
                Flow::Continue
            }

            ServerCommand::Services { kinds } => {
                let current = {
                    let mut st = self.state();
                    for (i, kind) in kinds.iter().enumerate() {
                        st.set_service(i, *kind);
                    }
                    st.location
                };
                self.notify_roster();
                // Freshly learned service metadata may resolve a deferred
                // presentation for the location we are already in.
                self.change_location(current);
                Flow::Continue
            }

            ServerCommand::NewService { kind } => {
                let mut st = self.state();
                st.services.push(kind);
                Flow::Continue
            }

            ServerCommand::Renamed { id, name } => {
                let known = {
                    let mut st = self.state();
                    if let Some(rec) = st.record_mut(id) {
                        rec.name = Some(name.clone());
                        if st.self_id == Some(id) {
                            st.name = Some(name);
                        }
                        true
                    } else {
                        false
                    }
                };
                if known {
                    self.notify_roster();
                } else {
                    debug!(id, "rename for unknown client ignored");
                }
                Flow::Continue
            }

            ServerCommand::Moved { id, location } => {
                let is_self = {
                    let mut st = self.state();
                    match st.record_mut(id) {
                        Some(rec) => rec.location = location,
                        None => debug!(id, "move for unknown client; slot left alone"),
                    }
                    st.self_id == Some(id)
                };
                if is_self {
                    self.change_location(location);
                }
                self.notify_roster();
                Flow::Continue
            }
        }
    }

    fn push_chat(&mut self, id: u32, body: String, is_whisper: bool) {
        let added = {
            let mut st = self.state();
            let sender = st.record(id).map(ClientRecord::display_name);
            match sender {
                Some(sender) => {
                    st.messages.push(ChatEntry::chat(body, sender, is_whisper));
                    true
                }
                None => false,
            }
        };
        if added {
            self.notify_messages();
        } else {
            debug!(id, "chat from unknown sender dropped");
        }
    }

    /// The location-change transition. No-op when `target` is the current
    /// location and its presentation is already resolved; otherwise moves,
    /// clears the transcript, and resolves the presentation variant from the
    /// service table - deferring (without failing) while the table has not
    /// caught up with the move.
    pub(crate) fn change_location(&mut self, target: i32) {
        let (log_cleared, resolved) = {
            let mut st = self.state();
            let changed = target != st.location;
            if !changed && !st.variant_pending {
                return;
            }
            let mut log_cleared = false;
            if changed {
                st.location = target;
                log_cleared = !st.messages.is_empty();
                st.messages.clear();
            }
            let resolved = if target < 0 {
                st.variant_pending = false;
                Some((Variant::Offline, None))
            } else {
                match st.service_kind(target) {
                    Some(kind) => match Variant::for_service(kind) {
                        Some(variant) => {
                            st.variant_pending = false;
                            Some((variant, Some(kind)))
                        }
                        None => {
                            warn!(kind, location = target, "unknown service type");
                            st.variant_pending = true;
                            None
                        }
                    },
                    None => {
                        st.variant_pending = true;
                        None
                    }
                }
            };
            (log_cleared, resolved)
        };
        if log_cleared {
            self.notify_messages();
        }
        match resolved {
            Some((variant, service)) => {
                info!(?variant, location = target, "location changed");
                self.sink.on_location_changed(variant, service);
            }
            None => {
                debug!(
                    location = target,
                    "presentation deferred until the service table catches up"
                );
            }
        }
    }

    /// End-of-session cleanup: offline variant, empty transcript, one
    /// `on_disconnected`. Runs exactly once, from the reader loop's exit.
    pub(crate) fn teardown(&mut self, reason: &str) {
        let had_messages = {
            let mut st = self.state();
            st.connected = false;
            let had = !st.messages.is_empty();
            st.messages.clear();
            had
        };
        if had_messages {
            self.notify_messages();
        }
        self.change_location(-1);
        self.notify_roster();
        self.sink.on_disconnected(reason);
        info!(reason, "session ended");
    }

    fn notify_roster(&self) {
        let view = self.state().roster_view();
        self.sink.on_roster_changed(&view);
    }

    fn notify_messages(&self) {
        let log = self.state().messages_snapshot();
        self.sink.on_messages_changed(&log);
    }

    fn queue(&self, cmd: &ClientCommand) {
        if let Err(e) = self.out_tx.try_send(client::encode(cmd)) {
            warn!(err = %e, "outbound queue unavailable; command dropped");
        }
    }
}
