//! Tally Node
//!
//! Presentation scoring node and topic relay.
//!
//! # Usage
//!
//! ```bash
//! # Start a relay
//! tally-node relay --listen 0.0.0.0:9001
//!
//! # Start graders (in separate terminals)
//! tally-node run --broker ws://127.0.0.1:9001
//! tally-node run --broker ws://127.0.0.1:9001 --name grader_b
//! ```

use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::time::Duration;
use tally_core::{
    config::random_peer_id, NodeConfig, Relay, RelayConfig, ScoreCard, ScoreObserver,
    ScoringNode, StudentId, Submission, Summary, WsTransport, WsTransportConfig,
};
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Presentation scoring node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scoring node with an interactive prompt
    Run {
        /// Peer identifier (random if omitted)
        #[arg(short, long)]
        name: Option<String>,

        /// Relay WebSocket URL
        #[arg(short, long, default_value = "ws://127.0.0.1:9001")]
        broker: String,

        /// Seconds between presence announcements
        #[arg(long, default_value = "10")]
        announce_secs: u64,

        /// Forget peers silent for this many seconds (never by default)
        #[arg(long)]
        peer_ttl_secs: Option<u64>,

        /// Do not subscribe to the shared fallback topics
        #[arg(long)]
        no_broadcast_listen: bool,

        /// Seconds between reconnect attempts
        #[arg(long, default_value = "1")]
        reconnect_secs: u64,
    },

    /// Run the topic relay
    Relay {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:9001")]
        listen: SocketAddr,
    },
}

/// Prints ledger changes to the console
struct ConsoleObserver;

impl ScoreObserver for ConsoleObserver {
    fn on_accepted_submission(&mut self, submission: &Submission) {
        println!(
            "+ {}: clarity {} delivery {} confidence {}",
            submission.student_id, submission.clarity, submission.delivery, submission.confidence
        );
        if let Some(feedback) = &submission.feedback {
            println!("  \"{}\" ({})", feedback, submission.attribution());
        }
    }

    fn on_summary_changed(&mut self, summary: &Summary) {
        info!(
            "Summary: {} submissions, averages {:.2}/{:.2}/{:.2}",
            summary.submitted_count,
            summary.averages.clarity,
            summary.averages.delivery,
            summary.averages.confidence
        );
    }

    fn on_reset(&mut self, reason: &str) {
        println!("Reset: {} - ready for new evaluations", reason);
    }
}

/// Parsed prompt command
#[derive(Debug, PartialEq)]
enum Input {
    Submit { student_id: StudentId, card: ScoreCard },
    Summary,
    Status,
    Peers,
    Reset(String),
    Quit,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&command) = parts.first() else {
        return Err(String::new());
    };

    match command {
        "submit" | "anon" => {
            // Named submissions carry the student's name before the scores
            let named = command == "submit";
            let scores_at = if named { 3 } else { 2 };
            if parts.len() < scores_at + 3 {
                return Err(if named {
                    "Usage: submit <id> <name> <clarity> <delivery> <confidence> [feedback...]".to_string()
                } else {
                    "Usage: anon <id> <clarity> <delivery> <confidence> [feedback...]".to_string()
                });
            }
            let student_id: StudentId = parts[1].parse().map_err(|_| "Invalid student id".to_string())?;
            let mut scores = [0u32; 3];
            for (slot, raw) in scores.iter_mut().zip(&parts[scores_at..scores_at + 3]) {
                *slot = raw
                    .parse()
                    .map_err(|_| format!("Invalid score \"{}\" (must be an integer)", raw))?;
            }

            let card = ScoreCard::new(scores[0], scores[1], scores[2])
                .with_feedback(parts[scores_at + 3..].join(" "));
            let card = if named {
                card.with_name(parts[2])
            } else {
                card.anonymous()
            };
            Ok(Input::Submit { student_id, card })
        }
        "summary" => Ok(Input::Summary),
        "status" => Ok(Input::Status),
        "peers" => Ok(Input::Peers),
        "reset" => {
            let reason = parts[1..].join(" ");
            Ok(Input::Reset(if reason.is_empty() {
                "Manual reset".to_string()
            } else {
                reason
            }))
        }
        "quit" | "exit" => Ok(Input::Quit),
        _ => Err("Unknown command. Try: submit <id> <name> <clarity> <delivery> <confidence>".to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.log_level.as_str() {
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

    match cli.command {
        Commands::Relay { listen } => {
            let relay = Relay::bind(RelayConfig::new(listen)).await?;
            relay.run().await;
            Ok(())
        }
        Commands::Run {
            name,
            broker,
            announce_secs,
            peer_ttl_secs,
            no_broadcast_listen,
            reconnect_secs,
        } => {
            let mut config = NodeConfig::new(name.unwrap_or_else(random_peer_id))
                .with_announce_interval(Duration::from_secs(announce_secs.max(1)));
            if let Some(ttl) = peer_ttl_secs {
                config = config.with_peer_ttl(Duration::from_secs(ttl));
            }
            if no_broadcast_listen {
                config = config.without_fallback_listen();
            }

            run_node(config, broker, Duration::from_secs(reconnect_secs)).await
        }
    }
}

async fn run_node(
    config: NodeConfig,
    broker: String,
    reconnect_delay: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let ws_config = WsTransportConfig::new(broker).with_reconnect_delay(reconnect_delay);
    let (transport, events) = WsTransport::spawn(ws_config, config.subscriptions())?;
    let (node, handle) = ScoringNode::new(config, transport, events);
    info!("Tally node \"{}\" starting", node.peer_id());
    node.with_observer(ConsoleObserver).spawn();

    // Spawn stdin handler
    let (input_tx, mut input_rx) = mpsc::channel::<Input>(16);
    std::thread::spawn(move || {
        println!("\nCommands:");
        println!("  submit <id> <name> <clarity> <delivery> <confidence> [feedback...]");
        println!("  anon <id> <clarity> <delivery> <confidence> [feedback...]");
        println!("  summary                - Show averages and feedback");
        println!("  status                 - Show connection status");
        println!("  peers                  - Show discovered peers");
        println!("  reset [reason]         - Clear all scores");
        println!("  quit                   - Exit\n");

        let stdin = io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            match parse_input(&line) {
                Ok(input) => {
                    let quit = input == Input::Quit;
                    if input_tx.blocking_send(input).is_err() || quit {
                        break;
                    }
                }
                Err(msg) if msg.is_empty() => {}
                Err(msg) => println!("{}", msg),
            }
        }
    });

    while let Some(input) = input_rx.recv().await {
        match input {
            Input::Submit { student_id, card } => match handle.submit(student_id, card).await {
                Ok(_) => println!("Score submitted successfully"),
                Err(e) => println!("{}", e),
            },
            Input::Summary => {
                let summary = handle.summary().await?;
                if summary.is_empty() {
                    println!("No submissions yet");
                    continue;
                }
                println!(
                    "{} submissions | clarity {:.2} | delivery {:.2} | confidence {:.2}",
                    summary.submitted_count,
                    summary.averages.clarity,
                    summary.averages.delivery,
                    summary.averages.confidence
                );
                for submission in summary.submissions.iter().filter(|s| s.feedback.is_some()) {
                    if let Some(feedback) = &submission.feedback {
                        println!("  \"{}\" - {}", feedback, submission.attribution());
                    }
                }
            }
            Input::Status => {
                let status = handle.status().await?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            Input::Peers => {
                let status = handle.status().await?;
                if status.peer_ids.is_empty() {
                    println!("No peers discovered yet");
                } else {
                    for peer in status.peer_ids {
                        println!("  {}", peer);
                    }
                }
            }
            Input::Reset(reason) => {
                handle.manual_reset(reason).await?;
                println!("Manual reset complete");
            }
            Input::Quit => break,
        }
    }

    if let Ok(status) = handle.status().await {
        info!("Exiting with {} submissions recorded", status.total_submissions);
    } else {
        error!("Node stopped unexpectedly");
    }
    Ok(())
}
