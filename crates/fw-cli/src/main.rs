mod simulate;

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fw_core::{
    AnchorConfig, AnchorManager, RecordReader, ReferenceEngine, SimulatedBackend, StreamError,
};
use fw_store::{DEFAULT_SESSION, Store, load_config_or_default, open_session, schema};

use crate::simulate::{WalkParams, run_walk};

#[derive(Parser)]
#[command(name = "fw", about = "Frozen-world anchor graph simulator and session tools")]
struct Cli {
    /// Session name
    #[arg(long, global = true, default_value = DEFAULT_SESSION)]
    session: String,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk a simulated head through the session and save it
    Simulate {
        #[arg(long, default_value_t = 500)]
        steps: u64,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Meters moved per step
        #[arg(long, default_value_t = 0.15)]
        step_length: f64,

        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write a serialization stream to this file
        #[arg(long)]
        record: Option<PathBuf>,

        /// Steps between records in the stream
        #[arg(long, default_value_t = 10)]
        record_every: u64,

        /// Drop tracking every N steps (0 = never)
        #[arg(long, default_value_t = 0)]
        loss_every: u64,

        /// Per-step random drift of trackables, in meters
        #[arg(long, default_value_t = 0.0)]
        drift: f64,
    },

    /// Show session statistics
    Stats,

    /// Export the session to a JSON file
    Export {
        /// Output file path
        path: PathBuf,
    },

    /// Import the session from a JSON file
    Import {
        /// Input file path
        path: PathBuf,
    },

    /// Read a recorded stream and apply each record to a fresh manager
    Replay {
        /// Stream file written by `simulate --record`
        path: PathBuf,
    },
}

fn open_store(cli: &Cli) -> Result<Store> {
    open_session(&cli.session, None)
        .with_context(|| format!("failed to open session '{}'", cli.session))
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Simulate {
            steps,
            seed,
            step_length,
            config,
            record,
            record_every,
            loss_every,
            drift,
        } => {
            let params = WalkParams {
                steps: *steps,
                seed: *seed,
                step_length: *step_length,
                loss_every: *loss_every,
                drift: *drift,
                record_every: *record_every,
            };
            cmd_simulate(&cli, &params, config.as_deref(), record.as_deref())
        }
        Commands::Stats => cmd_stats(&cli),
        Commands::Export { path } => cmd_export(&cli, path),
        Commands::Import { path } => cmd_import(&cli, path),
        Commands::Replay { path } => cmd_replay(path),
    }
}

fn cmd_simulate(
    cli: &Cli,
    params: &WalkParams,
    config: Option<&Path>,
    record: Option<&Path>,
) -> Result<()> {
    if !(params.step_length > 0.0) {
        bail!("--step-length must be positive");
    }
    let config = load_config_or_default(config).context("failed to load config")?;
    let store = open_store(cli)?;
    let summary = run_walk(store, &config, params, record)?;

    if summary.resumed_anchors > 0 {
        println!("resumed:     {} frozen anchors", summary.resumed_anchors);
    }
    println!("steps:       {}", summary.steps);
    println!("anchors:     {}", summary.live_anchors);
    println!("edges:       {}", summary.edges);
    println!("frozen:      {}", summary.frozen_anchors);
    println!("fragments:   {}", summary.fragments);
    println!("refreezes:   {}", summary.refreezes);
    println!("merges:      {}", summary.merges);
    println!("dropouts:    {}", summary.dropouts);
    println!("faults:      {}", summary.faults);
    println!("saved:       {}", summary.saved);
    println!("content:     moved {:.3}m in spongy space", summary.content_shift);
    if let Some(path) = record {
        println!("recorded:    {} records to {}", summary.records, path.display());
    }
    Ok(())
}

fn cmd_stats(cli: &Cli) -> Result<()> {
    let store = open_store(cli)?;
    let stats = store.stats().context("failed to read session stats")?;
    let version = schema::get_schema_version(store.conn())
        .context("failed to read schema version")?
        .unwrap_or(0);
    let next_id = store
        .load_snapshot()
        .context("failed to load session")?
        .map(|s| s.next_anchor_id.0)
        .unwrap_or(0);

    println!("session:     {}", cli.session);
    println!("schema:      v{version}");
    println!("frozen:      {}", stats.frozen_anchors);
    println!("fragments:   {}", stats.fragments);
    println!("edges:       {}", stats.edges);
    println!("saved:       {}", stats.saved_anchors);
    println!("trackables:  {}", stats.named_trackables);
    println!("next_id:     {next_id}");
    Ok(())
}

fn cmd_export(cli: &Cli, path: &Path) -> Result<()> {
    let store = open_store(cli)?;
    store
        .export_json_file(path)
        .with_context(|| format!("failed to export to {}", path.display()))?;
    println!("exported to {}", path.display());
    Ok(())
}

fn cmd_import(cli: &Cli, path: &Path) -> Result<()> {
    let store = open_store(cli)?;
    let snapshot = store
        .import_json_file(path)
        .context("failed to import JSON")?;
    println!(
        "imported from {}. frozen={}, edges={}, fragments={}",
        path.display(),
        snapshot.frozen.anchors.len(),
        snapshot.frozen.edges.len(),
        snapshot.frozen.fragment_count()
    );
    Ok(())
}

fn cmd_replay(path: &Path) -> Result<()> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut manager = AnchorManager::new(ReferenceEngine::default(), AnchorConfig::default())
        .context("invalid anchor configuration")?;
    let mut backend = SimulatedBackend::new();
    let mut reader = RecordReader::new();
    let mut count = 0u64;

    loop {
        while !reader.is_complete() {
            match reader.read_record_from(&mut file) {
                Ok(_) => {}
                Err(StreamError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof && reader.is_idle() => {
                    println!("replayed {count} records");
                    return Ok(());
                }
                Err(e) => return Err(e).context("failed to read stream record"),
            }
        }
        let record = reader
            .apply_record(&mut manager, &mut backend)
            .context("failed to apply stream record")?;
        count += 1;

        let frozen = record
            .persistent
            .as_ref()
            .map(|s| s.frozen.anchors.len())
            .unwrap_or(0);
        let spongy = record
            .transient
            .as_ref()
            .map(|t| t.spongy_anchors.len())
            .unwrap_or(0);
        println!(
            "t={:>8.3}s  frozen={frozen:<4} spongy={spongy:<4} session={}",
            record.timestamp, record.session
        );
    }
}
