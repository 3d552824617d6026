//! Example: replay a recorded event stream against fixture chain data.
//!
//! Reads one JSON event per line and prints one JSON line per notification
//! (`{"settled":{...}}` / `{"done":{...}}`). Unpinned blocks are logged.
//!
//! Usage:
//!
//!   cargo run -p txtrack --example replay -- --fixture <CHAIN_JSON> [--events <EVENTS_JSONL>]
//!
//! Options:
//!   --events <path>     JSON-lines event file. Default: stdin.
//!   --no-unpin          Do not release evicted blocks.
//!   --screen-validity   Check validity before success.

use txtrack::{
    BlockHash, ChainFixture, EngineBuilder, EngineConfig, IncomingEvent, MemoryChain,
    Notification, OutputApi, TxKey,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing_subscriber::EnvFilter;

/// Prints notifications to stdout as JSON lines.
struct JsonLines;

impl JsonLines {
    fn print(&self, n: &Notification) {
        match serde_json::to_string(n) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(%e, "encode notification failed"),
        }
    }
}

impl OutputApi for JsonLines {
    fn on_tx_settled(&mut self, block: &BlockHash, tx: &TxKey) {
        self.print(&Notification::Settled {
            block_hash: block.clone(),
            tx: tx.clone(),
        });
    }

    fn on_tx_done(&mut self, tx: &TxKey) {
        self.print(&Notification::Done { tx: tx.clone() });
    }
}

fn usage() -> ! {
    eprintln!(
        "Usage: replay --fixture <CHAIN_JSON> [--events <EVENTS_JSONL>] [--no-unpin] [--screen-validity]\n\
         Replays JSON-lines events against fixture chain data; prints one JSON line per notification.\n\
         --events           JSON-lines event file. Default: stdin.\n\
         --no-unpin         Do not release evicted blocks.\n\
         --screen-validity  Check validity before success."
    );
    std::process::exit(1);
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args: Vec<String> = std::env::args().collect();
    let mut fixture_path = String::new();
    let mut events_path = String::new();
    let mut config = EngineConfig::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--fixture" => {
                i += 1;
                fixture_path = args.get(i).cloned().unwrap_or_default();
            }
            "--events" => {
                i += 1;
                events_path = args.get(i).cloned().unwrap_or_default();
            }
            "--no-unpin" => config.release_blocks = false,
            "--screen-validity" => config.screen_validity = true,
            "--help" | "-h" => usage(),
            other => {
                eprintln!("unknown argument: {}", other);
                usage();
            }
        }
        i += 1;
    }
    if fixture_path.is_empty() {
        usage();
    }

    let chain = MemoryChain::new(ChainFixture::load(&fixture_path)?);
    let mut engine = EngineBuilder::new()
        .chain(chain.clone())
        .output(JsonLines)
        .config(config)
        .build()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let input: Box<dyn AsyncRead + Unpin> = if events_path.is_empty() {
            Box::new(tokio::io::stdin())
        } else {
            Box::new(tokio::fs::File::open(&events_path).await?)
        };
        let mut lines = BufReader::new(input).lines();
        let mut line_no = 0u64;
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let event = IncomingEvent::from_json(&line)
                        .map_err(|e| anyhow::anyhow!("line {}: {}", line_no, e))?;
                    engine.handle(event).await?;
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok::<_, anyhow::Error>(())
    })?;

    for batch in chain.unpinned() {
        tracing::info!(blocks = ?batch, "unpinned");
    }
    let stats = engine.stats();
    tracing::info!(
        events = stats.events,
        settled = stats.settled,
        done = stats.done,
        unpinned = stats.unpinned,
        "replay finished"
    );
    Ok(())
}
