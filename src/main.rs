use anyhow::Context;
use clap::{Parser, Subcommand};
use snapguard::{
    fingerprint_file, BackupConfig, BackupError, BackupOrchestrator, GithubProbe, GuardMode,
    HttpSource, RunOutcome, RunReport, SnapshotStore,
};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "snapguard")]
#[command(about = "Back up a JSON endpoint into a private repository", long_about = None)]
#[command(version)]
struct Args {
    /// Directory holding the snapshots
    #[arg(long, env = "BACKUP_DIR", default_value = "backups", global = true)]
    backup_dir: PathBuf,

    /// Print the run report as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Skip the repository visibility check (requires SNAPGUARD_ENV=development)
    #[arg(long, global = true)]
    unsafe_skip_visibility_check: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one backup (default)
    Run,
    /// List stored snapshots with their digests
    List,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("snapguard={}", log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match args.command {
        Some(Command::List) => match list_snapshots(&args.backup_dir).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("❌ Error: {:#}", e);
                1
            }
        },
        Some(Command::Run) | None => match run_backup(&args).await {
            Ok(report) => {
                print_report(&report, args.json);
                0
            }
            Err(e) => {
                error!("❌ Backup failed");
                eprintln!("❌ {}: {}", e.kind(), e);
                eprintln!("   {}", e.remediation());
                e.exit_code()
            }
        },
    };

    std::process::exit(code);
}

async fn run_backup(args: &Args) -> Result<RunReport, BackupError> {
    info!("🚀 Snapguard backup starting");

    let config = BackupConfig::from_env()?;
    info!("Backup URL: {}", config.backup_url());
    info!("Max backups: {}", config.max_backups);
    info!(
        "Change detection: {}",
        if config.enable_change_detection { "enabled" } else { "disabled" }
    );

    let guard_mode = if args.unsafe_skip_visibility_check {
        GuardMode::UnsafeSkip
    } else {
        GuardMode::Enforce
    };

    let probe = GithubProbe::new(&config)?;
    let source = HttpSource::new(&config)?;
    let store = SnapshotStore::new(&args.backup_dir);

    let report = BackupOrchestrator::new(&config, &probe, &source, &store)
        .with_guard_mode(guard_mode)?
        .run()
        .await?;

    info!("🎉 Backup run completed");
    Ok(report)
}

fn print_report(report: &RunReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("❌ Failed to serialize report: {}", e),
        }
        return;
    }

    let digest = report
        .digest
        .as_ref()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    let retained = report
        .retained
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".to_string());

    match &report.outcome {
        RunOutcome::Saved {
            snapshot,
            trimmed,
            trim_failures,
            ..
        } => {
            println!(
                "✅ Saved {} ({} bytes, md5 {}), {} retained, {} trimmed",
                snapshot,
                report.document_bytes,
                digest,
                retained,
                trimmed.len()
            );
            if *trim_failures > 0 {
                println!("⚠️  {} old backup(s) could not be deleted", trim_failures);
            }
        }
        RunOutcome::Skipped => {
            println!(
                "✅ No change (md5 {}), nothing written, {} retained",
                digest, retained
            );
        }
    }
}

async fn list_snapshots(dir: &std::path::Path) -> anyhow::Result<()> {
    let store = SnapshotStore::new(dir);
    let ids = store
        .list()
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    if ids.is_empty() {
        println!("No backups in {}", dir.display());
        return Ok(());
    }

    for id in &ids {
        let path = store.snapshot_path(id);
        let metadata = tokio::fs::symlink_metadata(&path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if !metadata.is_file() {
            println!("{}  (not a regular file)", id);
            continue;
        }
        let digest = fingerprint_file(&path)
            .await
            .with_context(|| format!("Failed to hash {}", path.display()))?;
        println!("{}  {:>10} bytes  {}", id, metadata.len(), digest);
    }

    match fingerprint_file(&store.latest_path()).await {
        Ok(digest) => println!("latest  {}", digest),
        Err(_) => println!("latest  (missing)"),
    }
    if let Some(marker) = store.read_marker().await {
        println!(
            "privacy verified for {} at {}",
            marker.repository,
            marker.verified_at.to_rfc3339()
        );
    }
    Ok(())
}
