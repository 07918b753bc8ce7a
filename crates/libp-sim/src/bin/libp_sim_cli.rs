//! Interactive line-topology demo for `libp-sim`.
//!
//! Builds a chain of `--nodes` routers rooted at a sink, loads tunables from
//! an optional TOML config file, drives the mesh for `--seconds` simulated
//! seconds while the far end sends one packet per `--send-every` seconds, and
//! reports each node's final route/stats as JSON.
//!
//! ```bash
//! libp-sim-cli --nodes 4 --seconds 120 --config demos/line.toml
//! ```

use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;

use libp_core::address::Address;
use libp_core::config::ConnectionConfig;
use libp_core::connection::Role;
use libp_sim::Mesh;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let args = Args::parse()?;
    let cfg = args.load_config()?;

    tracing::info!(
        nodes = args.nodes,
        seconds = args.seconds,
        send_every = args.send_every,
        "libp-sim-cli starting"
    );

    let mut mesh = Mesh::new();
    // Start at (0,1): (0,0) is `Address::NULL`, the "no parent" sentinel, so
    // a node one hop from a sink addressed (0,0) would see its own parent as
    // null and never dispatch (route.rs / forward.rs guard on `is_null()`).
    let addrs: Vec<Address> = (0..args.nodes)
        .map(|i| Address::new(0, (i + 1) as u8))
        .collect();
    for (i, &addr) in addrs.iter().enumerate() {
        mesh.add_node(addr, cfg.clone(), Role::Router, i == 0);
    }
    for pair in addrs.windows(2) {
        mesh.add_link(pair[0], pair[1]);
    }

    let leaf = *addrs.last().context("--nodes must be at least 1")?;
    let sink = addrs[0];

    let tick = Duration::from_secs(1);
    let mut since_last_send = 0u64;
    let mut sent = 0u64;
    for elapsed in 0..args.seconds {
        mesh.advance(tick);
        since_last_send += 1;
        if args.send_every > 0 && since_last_send >= args.send_every && leaf != sink {
            let payload = Bytes::from(format!("probe-{sent}"));
            if mesh.send(leaf, payload, 4) {
                sent += 1;
            }
            since_last_send = 0;
        }
        if elapsed % 30 == 29 {
            tracing::info!(
                elapsed = elapsed + 1,
                sent,
                delivered = mesh.connection(sink).unwrap().ports().delivered.len(),
                "progress"
            );
        }
    }

    let report: Vec<_> = addrs
        .iter()
        .map(|&addr| {
            let conn = mesh.connection(addr).unwrap();
            serde_json::json!({
                "addr": addr.to_string(),
                "parent": conn.parent().to_string(),
                "rtmetric": conn.depth(),
                "stats": {
                    "datasent": conn.stats().datasent,
                    "datarecv": conn.stats().datarecv,
                    "acksent": conn.stats().acksent,
                    "ackrecv": conn.stats().ackrecv,
                    "duprecv": conn.stats().duprecv,
                    "timedout": conn.stats().timedout,
                },
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

struct Args {
    nodes: usize,
    seconds: u64,
    send_every: u64,
    config: Option<String>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut nodes = 4usize;
        let mut seconds = 120u64;
        let mut send_every = 10u64;
        let mut config = None;

        let argv: Vec<String> = std::env::args().collect();
        let mut i = 1;
        while i < argv.len() {
            match argv[i].as_str() {
                "--nodes" => {
                    i += 1;
                    nodes = argv
                        .get(i)
                        .context("--nodes requires a value")?
                        .parse()
                        .context("invalid --nodes")?;
                }
                "--seconds" => {
                    i += 1;
                    seconds = argv
                        .get(i)
                        .context("--seconds requires a value")?
                        .parse()
                        .context("invalid --seconds")?;
                }
                "--send-every" => {
                    i += 1;
                    send_every = argv
                        .get(i)
                        .context("--send-every requires a value")?
                        .parse()
                        .context("invalid --send-every")?;
                }
                "--config" => {
                    i += 1;
                    config = Some(argv.get(i).context("--config requires a value")?.clone());
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                other => anyhow::bail!("unknown argument: {other}\nRun with --help for usage."),
            }
            i += 1;
        }

        Ok(Args {
            nodes,
            seconds,
            send_every,
            config,
        })
    }

    fn load_config(&self) -> anyhow::Result<ConnectionConfig> {
        match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {path}"))?;
                toml::from_str(&text).with_context(|| format!("parsing config file {path}"))
            }
            None => Ok(ConnectionConfig::default()),
        }
    }
}

fn print_help() {
    eprintln!(
        r#"libp-sim-cli — line-topology demo for libp-core

USAGE:
  libp-sim-cli [OPTIONS]

OPTIONS:
  --nodes <n>        Chain length, sink included (default: 4)
  --seconds <n>      Simulated seconds to run (default: 120)
  --send-every <n>   Leaf sends a packet every n seconds, 0 to disable (default: 10)
  --config <path>    TOML file deserializing to ConnectionConfig (default: built-in defaults)
  --help, -h         Show this help
"#
    );
}
