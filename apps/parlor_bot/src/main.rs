use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parlorclient::ChatEntry;
use parlorclient::RosterEntry;
use parlorclient::SessionConfig;
use parlorclient::Sink;
use parlorclient::Variant;
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    bots: u32,
    name_prefix: String,
    follow: bool,
}

fn usage_and_exit() -> ! {
    eprintln!(
        "parlor_bot\n\n\
USAGE:\n  parlor_bot [--addr HOST:PORT] [--bots N] [--name PREFIX] [--follow]\n\n\
ENV:\n  PARLOR_ADDR  default 127.0.0.1:4000\n  BOTS         default 1\n  BOT_NAME     default Buddy\n  BOT_FOLLOW   default 0 (follow the first greeted user)\n"
    );
    std::process::exit(2);
}

fn parse_args() -> Config {
    let mut addr =
        std::env::var("PARLOR_ADDR").unwrap_or_else(|_| "127.0.0.1:4000".to_string());
    let mut bots: u32 = std::env::var("BOTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
        .max(1);
    let mut name_prefix = std::env::var("BOT_NAME").unwrap_or_else(|_| "Buddy".to_string());
    let mut follow = std::env::var("BOT_FOLLOW")
        .ok()
        .is_some_and(|v| v == "1");

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--addr" => addr = it.next().unwrap_or_else(|| usage_and_exit()),
            "--bots" => {
                bots = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage_and_exit())
            }
            "--name" => name_prefix = it.next().unwrap_or_else(|| usage_and_exit()),
            "--follow" => follow = true,
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        addr,
        bots,
        name_prefix,
        follow,
    }
}

enum BotEvent {
    /// Somebody (not us) showed up in the roster.
    Seen(String),
    Ended(String),
}

struct BotSink {
    events: mpsc::UnboundedSender<BotEvent>,
}

impl Sink for BotSink {
    fn on_roster_changed(&self, roster: &[RosterEntry]) {
        for entry in roster {
            if !entry.is_self {
                let _ = self.events.send(BotEvent::Seen(entry.name.clone()));
            }
        }
    }

    fn on_messages_changed(&self, _messages: &[ChatEntry]) {}

    fn on_location_changed(&self, variant: Variant, service: Option<i32>) {
        info!(?variant, ?service, "location changed");
    }

    fn on_raw_line(&self, line: &str) {
        trace!(line, "raw");
    }

    fn on_disconnected(&self, reason: &str) {
        let _ = self.events.send(BotEvent::Ended(reason.to_string()));
    }
}

/// Greet each distinct name once, and never greet fellow bots (anything
/// sharing our name prefix).
fn should_greet(greeted: &mut HashSet<String>, prefix: &str, who: &str) -> bool {
    if who.starts_with(prefix) {
        return false;
    }
    greeted.insert(who.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,parlor_bot=info".into()),
        )
        .with_target(false)
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.addr, bots = %cfg.bots, "parlor bot party starting");

    for i in 0..cfg.bots {
        let name = format!("{}{}", cfg.name_prefix, i + 1);
        let cfg = cfg.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = run_bot(&cfg, &name).await {
                    warn!(bot = %name, err = %e, "bot session error; retrying");
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        });
    }

    // Run forever.
    std::future::pending::<()>().await;
    Ok(())
}

async fn run_bot(cfg: &Config, name: &str) -> anyhow::Result<()> {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let sink = Arc::new(BotSink { events: events_tx });

    let mut sc = SessionConfig::new(cfg.addr.clone());
    sc.name = Some(name.to_string());
    let handle = parlorclient::connect(&sc, sink).await?;

    let mut greeted = HashSet::new();
    let mut following = false;
    while let Some(ev) = events.recv().await {
        match ev {
            BotEvent::Seen(who) => {
                if !should_greet(&mut greeted, &cfg.name_prefix, &who) {
                    continue;
                }
                info!(bot = %name, who = %who, "greeting");
                let _ = handle.send_chat(&format!("hi {who}! i'm {name}. up for a game?"));
                if cfg.follow && !following {
                    following = true;
                    let _ = handle.follow(&who);
                }
            }
            BotEvent::Ended(reason) => {
                info!(bot = %name, reason = %reason, "session over");
                break;
            }
        }
    }
    Ok(())
}
