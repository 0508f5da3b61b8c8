use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use anyhow::Context;
use parlorio::LineReader;
use parlorio::LineWriter;
use parlorproto::client;
use parlorproto::client::ClientCommand;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::info;

use crate::engine::Engine;
use crate::engine::Flow;
use crate::engine::SharedState;
use crate::sink::Sink;
use crate::state::ChatEntry;
use crate::state::Identity;
use crate::state::RosterEntry;
use crate::state::SessionState;

const OUT_QUEUE: usize = 128;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `host:port` of the server.
    pub addr: String,
    /// Preferred display name; the engine defaults to `User<id>` during the
    /// handshake when unset.
    pub name: Option<String>,
    /// Fire the sink's `on_refresh` at this interval. `None` disables the
    /// ticker.
    pub refresh: Option<Duration>,
}

impl SessionConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            name: None,
            refresh: None,
        }
    }
}

/// Misuse of the outbound path. The one failure class a caller sees as an
/// explicit error instead of a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The session has ended; nothing will be written.
    Closed,
    /// The outbound queue is saturated (the writer cannot keep up).
    Busy,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Closed => write!(f, "session is not connected"),
            SendError::Busy => write!(f, "outbound queue is full"),
        }
    }
}

impl std::error::Error for SendError {}

/// Cloneable handle to a running session. Sends are non-blocking and
/// fire-and-forget; reads are snapshots taken under a short-lived lock, so a
/// display list is always built from one consistent state.
#[derive(Clone)]
pub struct SessionHandle {
    state: SharedState,
    out_tx: mpsc::Sender<String>,
    stop_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

/// Connect, send the handshake probe, and start the session tasks. The
/// returned handle is the only way to talk to the session; dropping it does
/// not end the session (disconnect explicitly, or let the server do it).
pub async fn connect(cfg: &SessionConfig, sink: Arc<dyn Sink>) -> anyhow::Result<SessionHandle> {
    let stream = TcpStream::connect(&cfg.addr)
        .await
        .with_context(|| format!("connect {}", cfg.addr))?;
    // Interactive protocol: every line should hit the wire immediately.
    stream.set_nodelay(true).context("set TCP_NODELAY")?;
    info!(addr = %cfg.addr, "connected");

    let (rd, wr) = stream.into_split();
    Ok(spawn_session(rd, wr, cfg, sink))
}

/// Transport-generic session start; `connect` wires it to a TCP stream and
/// tests wire it to an in-memory duplex.
fn spawn_session<R, W>(rd: R, wr: W, cfg: &SessionConfig, sink: Arc<dyn Sink>) -> SessionHandle
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let lines = LineReader::new(rd);
    let mut writer = LineWriter::new(wr);

    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUT_QUEUE);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (done_tx, done_rx) = watch::channel(false);

    let state: SharedState = Arc::new(Mutex::new(SessionState::new(cfg.name.clone())));

    // Writer task: drains the queue, one flushed line per message. Keeps
    // draining ready messages after the session ends so a just-queued DCON
    // still reaches the server.
    let mut writer_done = done_rx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = out_rx.recv() => match msg {
                    Some(line) => {
                        if writer.send_line(&line).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = writer_done.changed() => break,
            }
        }
    });

    // The probe must be the first thing on the wire.
    let _ = out_tx.try_send(client::encode(&ClientCommand::Acknowledge));

    let engine = Engine::new(state.clone(), sink.clone(), out_tx.clone());
    tokio::spawn(reader_loop(lines, engine, stop_rx, done_tx));

    if let Some(every) = cfg.refresh {
        let sink = sink.clone();
        let mut ticker_done = done_rx.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = tick.tick() => sink.on_refresh(),
                    _ = ticker_done.changed() => break,
                }
            }
        });
    }

    SessionHandle {
        state,
        out_tx,
        stop_tx,
        done_rx,
    }
}

/// The session's read side: pull a line, apply it, notify, repeat. The only
/// writer of session state. Ends on stream end, read error, a `DCON` for the
/// local id, or a stop request - whichever comes first - then tears down and
/// signals completion exactly once.
async fn reader_loop<R: AsyncRead + Unpin>(
    mut lines: LineReader<R>,
    mut engine: Engine,
    mut stop_rx: watch::Receiver<bool>,
    done_tx: watch::Sender<bool>,
) {
    let reason = loop {
        tokio::select! {
            res = lines.read_line() => match res {
                Ok(Some(line)) => {
                    if let Flow::Stop(reason) = engine.handle_line(&line) {
                        break reason;
                    }
                }
                Ok(None) => break "server closed the connection".to_string(),
                Err(e) => break format!("read failed: {e}"),
            },
            _ = stop_rx.changed() => break "disconnect requested".to_string(),
        }
    };
    engine.teardown(&reason);
    // The read half drops here; the writer task stops on this signal. That
    // makes reader exit the single place a session's socket goes away.
    let _ = done_tx.send(true);
}

impl SessionHandle {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue one command for the writer task. Fire-and-forget: success means
    /// "accepted", not "acknowledged".
    pub fn send(&self, cmd: &ClientCommand) -> Result<(), SendError> {
        self.out_tx
            .try_send(client::encode(cmd))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
                mpsc::error::TrySendError::Full(_) => SendError::Busy,
            })
    }

    pub fn send_chat(&self, text: &str) -> Result<(), SendError> {
        self.send(&ClientCommand::Chat {
            text: text.to_string(),
        })
    }

    /// Follow another user into whatever location they are in. Server-side
    /// convention riding a plain chat payload.
    pub fn follow(&self, name: &str) -> Result<(), SendError> {
        self.send_chat(&format!("/follow {name}"))
    }

    /// Whisper to another user by name. Same convention as [`follow`].
    ///
    /// [`follow`]: SessionHandle::follow
    pub fn whisper(&self, name: &str, text: &str) -> Result<(), SendError> {
        self.send_chat(&format!("/msg {name} {text}"))
    }

    /// Announce departure and request the reader loop to stop. The loop
    /// observes the request after its current read resolves; teardown and
    /// `on_disconnected` happen there, not here.
    pub fn disconnect(&self, reason: &str) -> Result<(), SendError> {
        self.send(&ClientCommand::Disconnect {
            reason: reason.to_string(),
        })?;
        let _ = self.stop_tx.send(true);
        Ok(())
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.state().roster_view()
    }

    pub fn messages(&self) -> Vec<ChatEntry> {
        self.state().messages_snapshot()
    }

    pub fn identity(&self) -> Identity {
        self.state().identity()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Resolves once the session has fully torn down.
    pub async fn closed(&self) {
        let mut done = self.done_rx.clone();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Variant;
    use tokio::io::DuplexStream;
    use tokio::io::ReadHalf;
    use tokio::io::WriteHalf;

    #[derive(Default)]
    struct CountingSink {
        locations: Mutex<Vec<(Variant, Option<i32>)>>,
        disconnects: Mutex<Vec<String>>,
        refreshes: Mutex<usize>,
    }

    impl Sink for CountingSink {
        fn on_roster_changed(&self, _roster: &[RosterEntry]) {}
        fn on_messages_changed(&self, _messages: &[ChatEntry]) {}
        fn on_location_changed(&self, variant: Variant, service: Option<i32>) {
            self.locations.lock().unwrap().push((variant, service));
        }
        fn on_raw_line(&self, _line: &str) {}
        fn on_disconnected(&self, reason: &str) {
            self.disconnects.lock().unwrap().push(reason.to_string());
        }
        fn on_refresh(&self) {
            *self.refreshes.lock().unwrap() += 1;
        }
    }

    struct TestServer {
        lines: LineReader<ReadHalf<DuplexStream>>,
        writer: LineWriter<WriteHalf<DuplexStream>>,
    }

    impl TestServer {
        async fn expect(&mut self, want: &str) {
            let got = self.lines.read_line().await.unwrap().unwrap();
            assert_eq!(got, want);
        }

        async fn push(&mut self, line: &str) {
            self.writer.send_line(line).await.unwrap();
        }
    }

    fn start(cfg: &SessionConfig, sink: Arc<CountingSink>) -> (SessionHandle, TestServer) {
        let (client_end, server_end) = tokio::io::duplex(4 * 1024);
        let (crd, cwr) = tokio::io::split(client_end);
        let (srd, swr) = tokio::io::split(server_end);
        let handle = spawn_session(crd, cwr, cfg, sink as Arc<dyn Sink>);
        (
            handle,
            TestServer {
                lines: LineReader::new(srd),
                writer: LineWriter::new(swr),
            },
        )
    }

    async fn within<F: std::future::Future>(fut: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(2), fut)
            .await
            .expect("test timed out")
    }

    #[tokio::test]
    async fn probe_then_handshake_replies() {
        let sink = Arc::new(CountingSink::default());
        let (handle, mut server) = start(&SessionConfig::new("test"), sink);

        within(async {
            server.expect("ACKNOWLEDGE ME!").await;
            server.push("ID;7").await;
            server.expect("CON;").await;
            server.expect("NAME;User7").await;
            server.expect("INFO;").await;
        })
        .await;

        assert_eq!(handle.identity().id, Some(7));
        assert!(handle.is_connected());
    }

    #[tokio::test]
    async fn server_close_tears_down_once() {
        let sink = Arc::new(CountingSink::default());
        let (handle, server) = start(&SessionConfig::new("test"), sink.clone());

        drop(server);
        within(handle.closed()).await;

        assert!(!handle.is_connected());
        assert_eq!(handle.identity().location, -1);
        assert_eq!(sink.disconnects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn own_dcon_ends_the_session() {
        let sink = Arc::new(CountingSink::default());
        let (handle, mut server) = start(&SessionConfig::new("test"), sink.clone());

        within(async {
            server.expect("ACKNOWLEDGE ME!").await;
            server.push("ID;7").await;
            server.push("CON;7").await;
            server.push("DCON[7]Window Closed").await;
            handle.closed().await;
        })
        .await;

        assert_eq!(
            *sink.disconnects.lock().unwrap(),
            vec!["Window Closed".to_string()]
        );
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn disconnect_sends_dcon_then_stops() {
        let sink = Arc::new(CountingSink::default());
        let (handle, mut server) = start(&SessionConfig::new("test"), sink.clone());

        within(async {
            server.expect("ACKNOWLEDGE ME!").await;
            handle.disconnect("leaving").unwrap();
            server.expect("DCON;leaving").await;
            handle.closed().await;
        })
        .await;

        assert_eq!(
            *sink.disconnects.lock().unwrap(),
            vec!["disconnect requested".to_string()]
        );

        // Once the writer task is gone the queue reports closed.
        within(async {
            loop {
                if handle.send_chat("anyone?") == Err(SendError::Closed) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
    }

    #[tokio::test]
    async fn moves_reach_the_sink_through_the_wire() {
        let sink = Arc::new(CountingSink::default());
        let (handle, mut server) = start(&SessionConfig::new("test"), sink.clone());

        within(async {
            server.expect("ACKNOWLEDGE ME!").await;
            server.push("ID;5").await;
            server.push("CON;5").await;
            server.push("SERV;0,1,2").await;
            server.push("MOVED[5]2").await;

            loop {
                if sink.locations.lock().unwrap().len() == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        assert_eq!(
            *sink.locations.lock().unwrap(),
            vec![(Variant::Gomoku, Some(2))]
        );
        assert_eq!(handle.identity().location, 2);
    }

    #[tokio::test]
    async fn refresh_ticker_fires_and_stops_with_the_session() {
        let sink = Arc::new(CountingSink::default());
        let mut cfg = SessionConfig::new("test");
        cfg.refresh = Some(Duration::from_millis(10));
        let (handle, server) = start(&cfg, sink.clone());

        within(async {
            loop {
                if *sink.refreshes.lock().unwrap() >= 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        drop(server);
        within(handle.closed()).await;
    }
}
