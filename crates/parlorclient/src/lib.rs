//! `parlorclient`: the client-side session engine for the parlor server.
//!
//! One session is one TCP connection. The engine maintains the roster of
//! connected users (a sparse, id-indexed arena), the service table mapping
//! locations to game types, the local identity, and the chat transcript. A
//! reader task is the only writer of that state; everything else observes it
//! through snapshot reads and through the [`Sink`] callbacks.
//!
//! Presentation is somebody else's problem: implement [`Sink`], call
//! [`connect`], and react to the callbacks. Raw lines are forwarded to the
//! sink for every message, because the per-game sub-protocols ride the same
//! stream and this crate does not model them.

mod engine;
pub mod session;
pub mod sink;
pub mod state;

pub use session::connect;
pub use session::SendError;
pub use session::SessionConfig;
pub use session::SessionHandle;
pub use sink::Sink;
pub use sink::Variant;
pub use state::ChatEntry;
pub use state::ClientRecord;
pub use state::Identity;
pub use state::RosterEntry;
pub use state::SessionState;
