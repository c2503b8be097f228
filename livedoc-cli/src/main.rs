use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use livedoc_core::config::Config;
use livedoc_core::core_crypto::{generate_key, AccessProof, JoinLink, LinkSecret};
use livedoc_core::core_doc::DocSnapshot;
use livedoc_core::core_engine::{host_room, join_room, HostOptions, JoinOptions, DEFAULT_LINK_BASE};
use livedoc_core::core_model::{RoomId, UserId};
use livedoc_core::core_relay::MemoryRelay;
use livedoc_core::core_transport::MemoryNetwork;
use livedoc_core::logging::{init_logging_with_config, LogLevel};
use secrecy::SecretString;
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "livedoc")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML config file; defaults come from LIVEDOC_* environment variables
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a room key and print a join link carrying it
    Keygen {
        room_id: String,
        #[arg(long, default_value = DEFAULT_LINK_BASE)]
        base: String,
        #[arg(long, default_value_t = 8)]
        max_peers: u8,
    },
    /// Compute the access proof for a password room (password read from stdin)
    Proof {
        room_id: String,
        /// Hex salt from the room record
        salt: String,
    },
    /// Describe a join link without revealing its secret
    InspectLink {
        url: String,
        #[arg(long)]
        json: bool,
    },
    /// Print the contents of a saved document snapshot
    Snapshot {
        path: String,
        /// Print only the materialized text
        #[arg(long)]
        text: bool,
    },
    /// Run a host and guests in-process and print the converged document
    Demo {
        #[arg(long, default_value_t = 3)]
        guests: u8,
        #[arg(long, default_value = "demo-room")]
        room_id: String,
    },
}

#[derive(Debug, Serialize, PartialEq)]
struct LinkSummary {
    room_id: String,
    max_peers_hint: Option<u8>,
    mode: &'static str,
}

fn summarize_link(link: &JoinLink) -> LinkSummary {
    let mode = match link.secret {
        LinkSecret::Key(_) => "key",
        LinkSecret::Proof(_) => "password",
        LinkSecret::None => "none",
    };
    LinkSummary {
        room_id: link.room_id.to_string(),
        max_peers_hint: link.max_peers_hint,
        mode,
    }
}

fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).with_context(|| format!("cannot expand path '{}'", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::from_file(expand_path(path)?)?),
        None => Ok(Config::from_env()?),
    }
}

fn read_password() -> Result<SecretString> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("no password on stdin");
    }
    Ok(SecretString::new(password))
}

fn keygen(room_id: &str, base: &str, max_peers: u8) -> Result<String> {
    let room_id = RoomId::new(room_id);
    if !room_id.is_valid() {
        bail!("invalid room id '{}'", room_id);
    }
    let link = JoinLink::new(base, room_id, LinkSecret::Key(generate_key())).with_max_peers_hint(max_peers);
    Ok(link.to_url()?)
}

async fn demo(config: Config, room_id: &str, guests: u8) -> Result<String> {
    let relay = MemoryRelay::new();
    let net = MemoryNetwork::new();

    let hosted = host_room(
        relay.shared(),
        Arc::new(net.endpoint("host")),
        config.clone(),
        RoomId::new(room_id),
        UserId::new("host"),
        "Host",
        HostOptions::default(),
    )
    .await?;
    let host = hosted.handle;
    let greeting = "Hello from the host.";
    host.set_text(greeting).await?;

    let mut sessions = Vec::new();
    for i in 0..guests {
        let name = format!("guest-{}", i + 1);
        let guest = join_room(
            relay.shared(),
            Arc::new(net.endpoint(name.clone())),
            config.clone(),
            &hosted.link,
            JoinOptions::new(UserId::new(name.clone()), name.clone()),
        )
        .await?;
        sessions.push((name, guest));
    }

    let expected = sessions.len();
    host.wait_for_timeout(Duration::from_secs(10), |s| s.connected_peer_ids.len() == expected)
        .await?;

    for (name, guest) in &sessions {
        guest
            .wait_for_timeout(Duration::from_secs(10), |s| !s.text.is_empty())
            .await?;
        let len = guest.text().chars().count();
        guest.insert_text(len, format!(" {} was here.", name)).await?;
    }

    let target = greeting.chars().count()
        + sessions
            .iter()
            .map(|(name, _)| format!(" {} was here.", name).chars().count())
            .sum::<usize>();
    let converged = host
        .wait_for_timeout(Duration::from_secs(10), |s| s.text.chars().count() == target)
        .await?
        .text;
    info!(peers = expected + 1, "Demo converged");

    for (_, guest) in &sessions {
        guest.leave().await?;
    }
    host.leave().await?;
    Ok(converged)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    let mut log_config = config.logging.to_log_config();
    if let Some(level) = args.log_level {
        log_config.level = level;
    }
    init_logging_with_config(log_config.json_format(args.json_logs || config.logging.json_format))?;

    match args.command {
        Command::Keygen {
            room_id,
            base,
            max_peers,
        } => {
            println!("{}", keygen(&room_id, &base, max_peers)?);
        }
        Command::Proof { room_id, salt } => {
            let password = read_password()?;
            let proof = AccessProof::compute(&RoomId::new(room_id), &password, &salt);
            println!("{}", proof.as_hex());
        }
        Command::InspectLink { url, json } => {
            let summary = summarize_link(&JoinLink::parse(&url)?);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("room:      {}", summary.room_id);
                match summary.max_peers_hint {
                    Some(hint) => println!("max peers: {}", hint),
                    None => println!("max peers: (not given)"),
                }
                println!("mode:      {}", summary.mode);
            }
        }
        Command::Snapshot { path, text } => {
            let snapshot = DocSnapshot::load_from_file(expand_path(&path)?)?;
            if text {
                println!("{}", snapshot.materialized_text);
            } else {
                println!("room:      {}", snapshot.room_id);
                println!("version:   {}", snapshot.version);
                println!("timestamp: {}", snapshot.timestamp_ms);
                println!("---");
                println!("{}", snapshot.materialized_text);
            }
        }
        Command::Demo { guests, room_id } => {
            if guests == 0 || guests > 7 {
                bail!("guests must be between 1 and 7");
            }
            println!("{}", demo(config, &room_id, guests).await?);
        }
    }

    Ok(())
}
