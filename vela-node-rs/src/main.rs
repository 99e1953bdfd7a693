//! Vela Node - Rust Implementation
//!
//! Runs an in-process election cluster and lets an operator watch it elect,
//! partition nodes, and fail over.

use clap::Parser;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use vela_core::{ElectionConfig, Elector, LocalNetwork, NodeState};

/// Vela in-process election cluster
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of nodes in the cluster
    #[arg(short, long, default_value = "3")]
    nodes: usize,

    /// Stop after this many seconds (0 runs until `quit` or Ctrl-C)
    #[arg(short, long, default_value = "10")]
    duration_secs: u64,

    /// Isolate whichever node leads after this many milliseconds
    #[arg(long)]
    fail_leader_after_ms: Option<u64>,

    /// JSON file with election timing
    #[arg(short, long)]
    config: Option<String>,

    /// Simulated one-way network latency in milliseconds
    #[arg(long, default_value = "0")]
    latency_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

enum Command {
    Status,
    Isolate(String),
    Rejoin(String),
    Quit,
}

fn report(electors: &[Elector]) {
    for elector in electors {
        info!(
            "{}: {} in term {} (leader {:?})",
            elector.id(),
            elector.role(),
            elector.current_term(),
            elector.leader_id()
        );
    }
}

fn current_leader(electors: &[Elector]) -> Option<&Elector> {
    electors.iter().find(|e| e.is_leader())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.nodes == 0 {
        return Err("cluster needs at least one node".into());
    }

    let config = match &args.config {
        Some(path) => ElectionConfig::from_json_file(path)?,
        None => ElectionConfig::default(),
    };
    config.validate()?;

    info!(
        "Vela cluster of {} nodes starting (timeout {:?}..{:?}, heartbeat {:?})",
        args.nodes,
        config.election_timeout_min(),
        config.election_timeout_max(),
        config.heartbeat_interval()
    );

    let network = LocalNetwork::with_latency(Handle::current(), Duration::from_millis(args.latency_ms));
    let ids: Vec<String> = (0..args.nodes).map(|i| format!("node-{}", i)).collect();

    let mut electors = Vec::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        // Distinct seeds, or every node would draw the same timeouts
        let node_config = ElectionConfig {
            rng_seed: config.rng_seed.map(|seed| seed.wrapping_add(i as u64)),
            ..config.clone()
        };
        let state = Arc::new(NodeState::new(id.clone(), ids.clone()));
        let elector = Elector::new(node_config, state, Arc::new(network.clone()))?;
        network.register(&elector);
        debug!(
            "{} peers {:?} (seed {:?})",
            elector.id(),
            elector.state().peers().collect::<Vec<_>>(),
            elector.config().rng_seed
        );
        electors.push(elector);
    }

    for elector in &electors {
        elector.init();
        elector.start();
    }

    // Spawn stdin handler for operator commands
    let (command_tx, mut command_rx) = tokio::sync::mpsc::channel::<Command>(16);
    std::thread::spawn(move || {
        println!("\nCommands:");
        println!("  status         - Show every node's role and term");
        println!("  isolate <id>   - Cut a node off from the cluster");
        println!("  rejoin <id>    - Reconnect an isolated node");
        println!("  quit           - Exit\n");

        let stdin = io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let command = match parts.as_slice() {
                [] => continue,
                ["status"] => Command::Status,
                ["isolate", id] => Command::Isolate(id.to_string()),
                ["rejoin", id] => Command::Rejoin(id.to_string()),
                ["quit"] | ["exit"] => Command::Quit,
                _ => {
                    println!("Unknown command. Try: status, isolate <id>, rejoin <id>, quit");
                    continue;
                }
            };
            if command_tx.blocking_send(command).is_err() {
                break;
            }
        }
    });

    let run_for = if args.duration_secs == 0 {
        Duration::MAX
    } else {
        Duration::from_secs(args.duration_secs)
    };
    let deadline = sleep(run_for);
    tokio::pin!(deadline);

    let fail_after = args.fail_leader_after_ms.map(Duration::from_millis);
    let failover = sleep(fail_after.unwrap_or(Duration::MAX));
    tokio::pin!(failover);
    let mut failover_pending = fail_after.is_some();

    let mut ticker = interval(Duration::from_secs(1));

    // Main event loop
    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Run time elapsed");
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }

            _ = &mut failover, if failover_pending => {
                failover_pending = false;
                match current_leader(&electors) {
                    Some(leader) => {
                        warn!("Failing leader {} in term {}", leader.id(), leader.current_term());
                        network.isolate(leader.id());
                    }
                    None => warn!("No leader to fail yet"),
                }
            }

            _ = ticker.tick() => {
                match current_leader(&electors) {
                    Some(leader) => info!("Leader {} in term {}", leader.id(), leader.current_term()),
                    None => info!("No leader"),
                }
            }

            Some(command) = command_rx.recv() => {
                match command {
                    Command::Status => report(&electors),
                    Command::Isolate(id) if ids.contains(&id) => network.isolate(&id),
                    Command::Rejoin(id) if ids.contains(&id) => network.rejoin(&id),
                    Command::Isolate(id) | Command::Rejoin(id) => println!("Unknown node {}", id),
                    Command::Quit => break,
                }
            }
        }
    }

    network.close();
    for elector in &electors {
        elector.shutdown();
    }
    report(&electors);
    Ok(())
}
