use anyhow::{
    Context,
    Result,
    anyhow,
    bail,
};
use clap::{
    Parser,
    ValueEnum,
};
use hashring::{
    HashFunction,
    HashRing,
    Mode,
    config::{
        OtelConfig,
        RingConfig,
        SentryConfig,
    },
    observability,
};
use tokio::io::{
    AsyncBufReadExt,
    AsyncWriteExt,
    BufReader,
};
use tracing::{
    info,
    warn,
};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "ringctl",
    about = "Drive consistent hash rings from line-oriented commands on stdin."
)]
struct Config {
    #[clap(flatten)]
    ring: RingConfig,

    #[clap(flatten)]
    sentry: SentryConfig,

    #[clap(flatten)]
    otel: OtelConfig,
}

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Create {
        name: String,
        replicas: Option<u32>,
        hash_fn: Option<HashFunction>,
    },
    Delete(String),
    Has(String),
    Add(String, String),
    Remove(String, String),
    Find(String, String),
    Nodes(String, String, u32),
    Hash(String, String),
    Mode(String, Mode),
    Quit,
}

fn parse_line(line: &str) -> Result<Option<Line>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let parsed = match (verb, args) {
        ("create", [name]) => Line::Create {
            name: name.to_string(),
            replicas: None,
            hash_fn: None,
        },
        ("create", [name, replicas]) => Line::Create {
            name: name.to_string(),
            replicas: Some(replicas.parse().context("replicas must be a number")?),
            hash_fn: None,
        },
        ("create", [name, replicas, hash_fn]) => Line::Create {
            name: name.to_string(),
            replicas: Some(replicas.parse().context("replicas must be a number")?),
            hash_fn: Some(HashFunction::from_str(hash_fn, true).map_err(|e| anyhow!(e))?),
        },
        ("delete", [name]) => Line::Delete(name.to_string()),
        ("has", [name]) => Line::Has(name.to_string()),
        ("add", [name, node]) => Line::Add(name.to_string(), node.to_string()),
        ("remove", [name, node]) => Line::Remove(name.to_string(), node.to_string()),
        ("find", [name, key]) => Line::Find(name.to_string(), key.to_string()),
        ("nodes", [name, key, count]) => Line::Nodes(
            name.to_string(),
            key.to_string(),
            count.parse().context("count must be a number")?,
        ),
        ("hash", [name, key]) => Line::Hash(name.to_string(), key.to_string()),
        ("mode", [name, mode]) => Line::Mode(
            name.to_string(),
            Mode::from_str(mode, true).map_err(|e| anyhow!(e))?,
        ),
        ("quit" | "exit", []) => Line::Quit,
        _ => bail!("unrecognized command: {line}"),
    };
    Ok(Some(parsed))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

async fn execute(ring: &HashRing, config: &RingConfig, line: Line) -> Result<String> {
    let output = match line {
        Line::Create {
            name,
            replicas,
            hash_fn,
        } => {
            let replicas = replicas.unwrap_or(config.default_replicas);
            let hash_fn = hash_fn.unwrap_or(config.default_hash_function);
            ring.create_ring(&name, replicas, hash_fn).await?;
            "ok".to_string()
        },
        Line::Delete(name) => {
            ring.delete_ring(&name).await?;
            "ok".to_string()
        },
        Line::Has(name) => ring.has_ring(&name).await?.to_string(),
        Line::Add(name, node) => {
            ring.add_node(&name, &node).await?;
            "ok".to_string()
        },
        Line::Remove(name, node) => {
            ring.remove_node(&name, &node).await?;
            "ok".to_string()
        },
        Line::Find(name, key) => String::from_utf8_lossy(&ring.find_node(&name, &key).await?).into_owned(),
        Line::Nodes(name, key, count) => ring
            .get_nodes(&name, &key, count)
            .await?
            .iter()
            .map(|node| String::from_utf8_lossy(node).into_owned())
            .collect::<Vec<_>>()
            .join(" "),
        Line::Hash(name, key) => hex(&ring.calc_hash(&name, &key).await?),
        Line::Mode(name, mode) => {
            ring.set_mode(&name, mode).await?;
            "ok".to_string()
        },
        Line::Quit => bail!("quit is handled before execution"),
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    let version = env!("CARGO_PKG_VERSION");
    let _sentry = observability::init_tracing_and_sentry(config.sentry.clone());

    observability::init_otel_metrics(config.otel.clone())
        .map_err(|e| anyhow!("Failed to initialize OpenTelemetry metrics: {e}"))?;

    info!(config = ?config, version = version, "Starting ringctl");
    let ring = HashRing::start(&config.ring);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let output = match parse_line(&line) {
            Ok(None) => continue,
            Ok(Some(Line::Quit)) => break,
            Ok(Some(parsed)) => match execute(&ring, &config.ring, parsed).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(error = %e, "command failed");
                    format!("error: {e}")
                },
            },
            Err(e) => format!("error: {e}"),
        };
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    ring.shutdown().await.context("Failed to shut down ring engine")?;
    info!("ringctl stopped");
    Ok(())
}
