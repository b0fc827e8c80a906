mod export;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use retainer_core::config::AppConfig;
use retainer_engine::{AppEngine, EngineHandle, EngineSettings, TransportSettings};
use retainer_orchestrator::{
    Assessment, CandidateSource, DocListSource, RetentionPolicy, RunReport, TruncationOrchestrator,
    TruncationPlan, Verdict,
};
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(author, version, about = "Retainer - drops stale data from idle Qlik Sense apps", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify credentials and the engine connection
    Check,
    /// List apps that would be truncated
    Scan {
        /// Write the stale apps to a CSV file
        #[arg(long)]
        report: bool,
    },
    /// Truncate stale apps (preview unless --yes)
    Truncate {
        /// Actually open, clear and save the apps
        #[arg(long)]
        yes: bool,
    },
}

/// Per-run overrides of the loaded configuration.
#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// Engine host
    #[arg(long, global = true)]
    host: Option<String>,
    /// Idle threshold in days
    #[arg(long, global = true)]
    days: Option<i64>,
    /// Minimum app size in MiB
    #[arg(long = "min-mb", global = true)]
    min_mb: Option<f64>,
    /// Also consider published apps
    #[arg(long, global = true)]
    include_published: bool,
    /// App id to leave alone (repeatable)
    #[arg(long = "exclude", global = true)]
    exclude: Vec<String>,
    /// Name regex to leave alone (repeatable)
    #[arg(long = "exclude-pattern", global = true)]
    exclude_pattern: Vec<String>,
    /// Apps truncated in parallel
    #[arg(long, global = true)]
    concurrency: Option<usize>,
}

impl Overrides {
    fn apply(self, config: &mut AppConfig) {
        if let Some(host) = self.host {
            config.host = Some(host);
        }
        if let Some(days) = self.days {
            config.idle_days = days;
        }
        if let Some(min_mb) = self.min_mb {
            config.min_size_mb = min_mb;
        }
        if self.include_published {
            config.include_published = true;
        }
        append_list(&mut config.exclude_ids, self.exclude);
        append_list(&mut config.exclude_patterns, self.exclude_pattern);
        if let Some(n) = self.concurrency {
            config.max_concurrency = n.max(1);
        }
    }
}

fn append_list(target: &mut Option<String>, extra: Vec<String>) {
    if extra.is_empty() {
        return;
    }
    let mut items: Vec<String> = target.iter().cloned().collect();
    items.extend(extra);
    *target = Some(items.join(","));
}

fn init_logging(app_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    // Append to the log file when it can be opened; console only otherwise.
    let file = std::fs::create_dir_all(app_dir).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(app_dir.join("retainer.log"))
    });
    let (file_layer, guard) = match file {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();
    guard
}

fn engine_settings(config: &AppConfig) -> EngineSettings {
    EngineSettings {
        transport: TransportSettings {
            connect_timeout: config.connect_timeout(),
            idle_timeout: Some(config.idle_timeout()).filter(|d| !d.is_zero()),
        },
        call_timeout: config.call_timeout(),
        open_without_data: true,
        close_method: config.close_method.clone().filter(|m| !m.is_empty()),
    }
}

async fn connect(config: &AppConfig) -> Result<EngineHandle> {
    let paths = config.credential_paths();
    let credentials = paths
        .load()
        .await
        .with_context(|| format!("loading certificates from {}", config.cert_dir().display()))?;
    let endpoint = config.endpoint(credentials)?;
    info!("🔌 Connecting to {}", endpoint.url());
    let engine = EngineHandle::connect(&endpoint, engine_settings(config)).await?;
    Ok(engine)
}

fn print_assessments(assessed: &[Assessment]) -> Vec<&retainer_orchestrator::RetentionCandidate> {
    let stale: Vec<_> = assessed
        .iter()
        .filter(|a| a.verdict.is_eligible())
        .map(|a| &a.candidate)
        .collect();

    for a in assessed {
        if let Verdict::Eligible { idle_for } = &a.verdict {
            let reload = a
                .candidate
                .last_reload
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "?".into());
            println!(
                "  {:40} | {:36} | {:>10.2} MB | reloaded {} ({} days)",
                a.candidate.name,
                a.candidate.app_id,
                a.candidate.size_mb(),
                reload,
                idle_for.num_days()
            );
        }
    }

    let total_mb: f64 = stale.iter().map(|c| c.size_mb()).sum();
    println!(
        "\n🔎 Found {} of {} applications with a total of {:.1} MB of data.",
        stale.len(),
        assessed.len(),
        total_mb
    );
    stale
}

/// Lists and evaluates without changing anything.
async fn scan(config: &AppConfig, policy: RetentionPolicy, write_csv: bool) -> Result<bool> {
    let engine = connect(config).await?;
    let session = engine.open_session().await;
    let listed = match session {
        Ok(_) => DocListSource::new(&engine).candidates().await,
        Err(e) => Err(e.into()),
    };
    engine.close_session().await;
    let candidates = listed?;

    println!("🔎 Searching for apps idle for more than {} days.", config.idle_days);
    let orchestrator = TruncationOrchestrator::new(&engine, policy);
    let assessed = orchestrator.preview(&candidates);
    let stale = print_assessments(&assessed);

    if write_csv {
        let path = export::write_stale_apps(&config.report_dir(), &stale)?;
        println!("📝 Stale apps written to {}", path.display());
    } else {
        println!("Run with --report to write the list to CSV, or `truncate --yes` to clear the data.");
    }
    Ok(true)
}

fn print_report(report: &RunReport) {
    let summary = report.summary();
    println!(
        "\n📊 Truncated {} | skipped {} | failed {} | ~{:.1} MB reclaimed",
        summary.truncated,
        summary.skipped,
        summary.failed,
        summary.reclaimed_bytes as f64 / 1024.0 / 1024.0
    );
    for outcome in report.outcomes.iter().filter(|o| o.kind.is_failure()) {
        println!("  ❌ {} ({}): {}", outcome.name, outcome.app_id, outcome.kind);
    }
    if summary.unsaved > 0 {
        println!("  🚨 {} apps were cleared but NOT saved; check them manually.", summary.unsaved);
    }
    if let Some(reason) = &report.aborted {
        println!("  🛑 Run aborted: {} ({} apps not processed)", reason, summary.unprocessed);
    }
}

fn finish_report(config: &AppConfig, report: &RunReport) {
    print_report(report);
    match export::write_run_report(&config.report_dir(), report) {
        Ok(path) => println!("📝 Run report written to {}", path.display()),
        Err(e) => error!("❌ Could not write the run report: {:#}", e),
    }
}

async fn truncate(config: &AppConfig, policy: RetentionPolicy) -> Result<bool> {
    let started_at = Utc::now();
    let engine = match connect(config).await {
        Ok(engine) => engine,
        Err(e) => {
            // nothing was touched; still leave a report behind
            let mut report = RunReport::new(started_at);
            report.aborted = Some(format!("{:#}", e));
            report.finished_at = Utc::now();
            finish_report(config, &report);
            return Err(e);
        }
    };
    let orchestrator = TruncationOrchestrator::new(&engine, policy)
        .with_plan(TruncationPlan::from_config(config))
        .with_concurrency(config.max_concurrency);

    let report = orchestrator.run(&DocListSource::new(&engine)).await;
    finish_report(config, &report);
    Ok(report.is_clean())
}

async fn check(config: &AppConfig) -> Result<bool> {
    let engine = connect(config).await?;
    let session = engine.open_session().await;
    engine.close_session().await;
    let token = session?;
    println!("✅ Connected. Engine version {}", token.engine_version);
    if let Some(state) = token.session_state {
        println!("   Session state: {}", state);
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let app_dir = retainer_core::path_utils::get_app_root();
    let _guard = init_logging(&app_dir);

    retainer_core::init();

    let mut config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("❌ Error: Configuration missing or invalid: {}", e);
            eprintln!("   Put settings in {}/.env or retainer.toml (RETAINER_HOST, ...).", app_dir.display());
            return ExitCode::from(1);
        }
    };
    args.overrides.apply(&mut config);

    let policy = match RetentionPolicy::from_config(&config) {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("❌ Error: Invalid exclude pattern: {}", e);
            return ExitCode::from(1);
        }
    };

    let outcome = match args.command {
        Commands::Check => check(&config).await,
        Commands::Scan { report } => scan(&config, policy, report).await,
        Commands::Truncate { yes: false } => {
            println!("👀 Preview only. Re-run with --yes to truncate.");
            scan(&config, policy, false).await
        }
        Commands::Truncate { yes: true } => truncate(&config, policy).await,
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::from(1)
        }
    }
}
