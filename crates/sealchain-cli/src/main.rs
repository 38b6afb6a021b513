use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sealchain_core::{
    chain::{ChainExport, ChainStore, Ledger},
    now_timestamp, LedgerConfig,
};
use sealchain_storage::SledStore;
use serde::Serialize;
use serde_json::{json, Value};
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "sealchain-cli")]
#[command(about = "CLI client for the sealchain ledger node")]
struct Cli {
    /// Node base URL (e.g. http://127.0.0.1:8080)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seal an arbitrary JSON payload
    Append {
        /// Payload as JSON text, e.g. '{"type":"note"}'
        #[arg(long)]
        payload: String,
    },
    /// Anchor a complaint record
    Complaint {
        /// Complaint id as stored by the intake app
        #[arg(long)]
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Chain totals and validity
    Info,
    /// Most recent blocks, newest first
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Fetch one block
    Block {
        #[arg(long)]
        index: u64,
    },
    /// Ask the node to re-verify the chain
    Validate,
    /// List complaint anchors
    Complaints,
    /// Verify a data directory directly. The node must be stopped.
    Verify {
        #[arg(long)]
        data_dir: String,
        /// Defaults to the difficulty recorded with genesis
        #[arg(long)]
        difficulty: Option<u32>,
    },
    /// Write a stopped node's chain to a JSON backup
    Export {
        #[arg(long)]
        data_dir: String,
        /// Defaults to stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Restore a JSON backup into an empty data directory
    Import {
        #[arg(long)]
        data_dir: String,
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let node = cli.node.trim_end_matches('/');
    match cli.cmd {
        Command::Append { payload } => {
            let payload: Value =
                serde_json::from_str(&payload).context("--payload must be valid JSON")?;
            post(&client, &format!("{node}/chain/blocks"), &payload).await?;
        }
        Command::Complaint { id, title, category } => {
            let payload = complaint_payload(&id, title.as_deref(), category.as_deref());
            post(&client, &format!("{node}/chain/blocks"), &payload).await?;
        }
        Command::Info => get(&client, &format!("{node}/chain/info")).await?,
        Command::Recent { limit } => {
            get(&client, &format!("{node}/chain/blocks?limit={limit}")).await?
        }
        Command::Block { index } => get(&client, &format!("{node}/chain/blocks/{index}")).await?,
        Command::Validate => get(&client, &format!("{node}/chain/validate")).await?,
        Command::Complaints => get(&client, &format!("{node}/chain/complaints")).await?,
        Command::Verify { data_dir, difficulty } => {
            let valid = tokio::task::spawn_blocking(move || verify(&data_dir, difficulty)).await??;
            if !valid {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Export { data_dir, out } => {
            tokio::task::spawn_blocking(move || export(&data_dir, out)).await??;
        }
        Command::Import { data_dir, file } => {
            tokio::task::spawn_blocking(move || import(&data_dir, &file)).await??;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn post<T: Serialize>(client: &reqwest::Client, url: &str, body: &T) -> Result<()> {
    debug!(%url, "POST");
    let res = client.post(url).json(body).send().await?;
    print_response(res).await
}

async fn get(client: &reqwest::Client, url: &str) -> Result<()> {
    debug!(%url, "GET");
    let res = client.get(url).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<()> {
    let status = res.status();
    let body = res.text().await?;
    println!("status: {}", status);
    match serde_json::from_str::<Value>(&body) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{body}"),
    }
    if !status.is_success() {
        bail!("node returned {status}");
    }
    Ok(())
}

/// Anchor payload for a complaint. Only identifying fields go on the chain;
/// the full record stays with the intake app.
fn complaint_payload(id: &str, title: Option<&str>, category: Option<&str>) -> Value {
    let mut payload = json!({
        "type": "complaint",
        "id": id,
        "submitted_at": now_timestamp(),
    });
    if let Some(title) = title {
        payload["title"] = json!(title);
    }
    if let Some(category) = category {
        payload["category"] = json!(category);
    }
    payload
}

fn verify(data_dir: &str, difficulty: Option<u32>) -> Result<bool> {
    let store = Arc::new(SledStore::open(data_dir)?);
    let difficulty = match (difficulty, store.difficulty()?) {
        (Some(d), _) => d,
        (None, Some(d)) => d,
        (None, None) => bail!("{data_dir} records no difficulty; pass --difficulty"),
    };
    let ledger = Ledger::new(store, LedgerConfig::with_difficulty(difficulty))?;
    let report = ledger.validate()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    match (report.invalid_at, report.reason) {
        (Some(index), Some(reason)) => {
            eprintln!("chain broken at block {index}: {reason}");
        }
        _ => info!(blocks = ledger.store().block_count()?, difficulty, "chain intact"),
    }
    Ok(report.valid)
}

fn open_offline(data_dir: &str) -> Result<Ledger<SledStore>> {
    let store = Arc::new(SledStore::open(data_dir)?);
    let Some(difficulty) = store.difficulty()? else {
        bail!("{data_dir} holds no chain");
    };
    Ok(Ledger::new(store, LedgerConfig::with_difficulty(difficulty))?)
}

fn export(data_dir: &str, out: Option<PathBuf>) -> Result<()> {
    let backup = open_offline(data_dir)?.export()?;
    match &out {
        Some(path) => {
            let mut writer = BufWriter::new(
                File::create(path).with_context(|| format!("creating {}", path.display()))?,
            );
            serde_json::to_writer_pretty(&mut writer, &backup)?;
            writer.flush()?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &backup)?;
            writeln!(stdout)?;
        }
    }
    info!(blocks = backup.blocks.len(), difficulty = backup.difficulty, "chain exported");
    Ok(())
}

fn import(data_dir: &str, file: &Path) -> Result<()> {
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("opening {}", file.display()))?,
    );
    let backup: ChainExport = serde_json::from_reader(reader)?;
    let store = Arc::new(SledStore::open(data_dir)?);
    let ledger = Ledger::restore(store, &backup, LedgerConfig::with_difficulty(backup.difficulty))?;
    ledger.store().flush()?;
    println!("restored {} blocks into {data_dir}", backup.blocks.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complaint_payload_carries_type_and_id() {
        let payload = complaint_payload("C-1042", Some("Billing dispute"), None);
        assert_eq!(payload["type"], "complaint");
        assert_eq!(payload["id"], "C-1042");
        assert_eq!(payload["title"], "Billing dispute");
        assert!(payload.get("category").is_none());
        assert!(payload["submitted_at"].as_str().is_some_and(|t| t.ends_with('Z')));
    }

    #[test]
    fn verify_reads_recorded_difficulty() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        {
            let store = Arc::new(SledStore::open(temp_dir.path())?);
            let ledger = Ledger::open(store, LedgerConfig::with_difficulty(1))?;
            ledger.append(json!({ "type": "complaint", "id": "V1" }))?;
        }
        let path = temp_dir.path().to_string_lossy().into_owned();
        assert!(verify(&path, None)?);
        // seals found at difficulty 1 will not carry eight leading zeros
        assert!(!verify(&path, Some(8))?);
        temp_dir.close()?;
        Ok(())
    }

    #[test]
    fn export_then_import_round_trips_a_chain() -> Result<()> {
        let source = tempfile::tempdir()?;
        let target = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        let backup = scratch.path().join("chain.json");
        {
            let store = Arc::new(SledStore::open(source.path())?);
            let ledger = Ledger::open(store, LedgerConfig::with_difficulty(1))?;
            ledger.append(complaint_payload("C-1", None, None))?;
            ledger.append(complaint_payload("C-2", Some("Late refund"), None))?;
        }
        export(&source.path().to_string_lossy(), Some(backup.clone()))?;

        let target_dir = target.path().to_string_lossy().into_owned();
        import(&target_dir, &backup)?;
        assert!(verify(&target_dir, None)?);

        let restored = open_offline(&target_dir)?;
        assert_eq!(restored.snapshot()?.len(), 3);
        assert_eq!(restored.complaints()?.len(), 2);
        drop(restored);

        // a second import into a populated directory is refused
        assert!(import(&target_dir, &backup).is_err());
        Ok(())
    }

    #[test]
    fn import_rejects_edited_backup() -> Result<()> {
        let source = tempfile::tempdir()?;
        let target = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        let backup = scratch.path().join("chain.json");
        {
            let store = Arc::new(SledStore::open(source.path())?);
            let ledger = Ledger::open(store, LedgerConfig::with_difficulty(1))?;
            ledger.append(complaint_payload("C-1", None, None))?;
        }
        export(&source.path().to_string_lossy(), Some(backup.clone()))?;

        let mut edited: ChainExport = serde_json::from_reader(File::open(&backup)?)?;
        edited.blocks[1].payload["id"] = json!("C-999");
        serde_json::to_writer(File::create(&backup)?, &edited)?;

        let target_dir = target.path().to_string_lossy().into_owned();
        assert!(import(&target_dir, &backup).is_err());
        assert!(open_offline(&target_dir).is_err(), "nothing was written");
        Ok(())
    }
}
