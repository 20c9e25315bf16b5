mod fixture;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use runboard_engine::{
    DefaultExecutionFilterService, ExecutionsSession, RetryingAppearancePoller, RunExit, SessionConfig, SessionServices,
    TriggerOutcome, load_config_file,
};
use runboard_types::{Application, ExecutionFilterModel, ExecutionStatus, GroupBy, SessionSignal, TriggerCommand};
use runboard_util::{ViewStateCacheRegistry, expand_tilde};
use serde_json::{Value, json};
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::fixture::{FixtureBackend, PresetPrompt, load_fixture};

/// Browse and trigger pipeline executions of an application fixture.
#[derive(Parser, Debug)]
#[command(name = "runboard", version, about)]
struct Cli {
    /// Session configuration (YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding persisted view state
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Keep view state in memory only
    #[arg(long, global = true, conflicts_with = "cache_dir")]
    ephemeral_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the grouped executions of an application
    Show(ShowArgs),
    /// Trigger a pipeline and wait for its execution to appear
    Trigger(TriggerArgs),
    /// Inspect or reset persisted filter criteria
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Application fixture (JSON)
    fixture: PathBuf,

    #[arg(long)]
    search: Option<String>,

    /// Only show these pipelines (repeatable)
    #[arg(long = "pipeline")]
    pipelines: Vec<String>,

    /// Only show these statuses, e.g. RUNNING (repeatable)
    #[arg(long = "status")]
    statuses: Vec<String>,

    /// Executions shown per group: 1, 2, 5, 10, 25, 50 or 100
    #[arg(long)]
    count: Option<usize>,

    #[arg(long, value_enum)]
    group_by: Option<GroupByArg>,

    /// Reset search, pipeline and status criteria before applying the others
    #[arg(long)]
    clear_filters: bool,

    /// Print groups as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct TriggerArgs {
    /// Application fixture (JSON)
    fixture: PathBuf,

    #[arg(long)]
    pipeline: String,

    /// Trigger payload as JSON
    #[arg(long)]
    trigger: Option<String>,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Print stored filter criteria
    Show { application: Option<String> },
    /// Forget stored filter criteria
    Clear { application: Option<String> },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum GroupByArg {
    Name,
    None,
}

impl From<GroupByArg> for GroupBy {
    fn from(value: GroupByArg) -> Self {
        match value {
            GroupByArg::Name => GroupBy::Name,
            GroupByArg::None => GroupBy::Ungrouped,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_file(expand_tilde(&path.to_string_lossy()))?,
        None => SessionConfig::default(),
    };
    let caches = Arc::new(cache_registry(&cli));

    match cli.command {
        Command::Show(args) => run_show(args, &config, caches).await,
        Command::Trigger(args) => run_trigger(args, &config, caches).await,
        Command::Cache(command) => run_cache(command, &config, &caches),
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn cache_registry(cli: &Cli) -> ViewStateCacheRegistry {
    if cli.ephemeral_cache {
        return ViewStateCacheRegistry::ephemeral();
    }
    match &cli.cache_dir {
        Some(directory) => ViewStateCacheRegistry::new(expand_tilde(&directory.to_string_lossy())),
        None => ViewStateCacheRegistry::with_default_directory(),
    }
}

/// Builds a session over `application` backed by `backend`, starting from the loading state.
fn open_session(
    application: &Application,
    backend: Arc<FixtureBackend>,
    prompt: PresetPrompt,
    config: &SessionConfig,
    caches: Arc<ViewStateCacheRegistry>,
) -> Result<ExecutionsSession> {
    let (signal_tx, mut signal_rx) = unbounded_channel::<SessionSignal>();
    tokio::spawn(async move {
        while let Some(signal) = signal_rx.recv().await {
            debug!(?signal, "session signal");
        }
    });

    let services = SessionServices {
        filter_service: Arc::new(DefaultExecutionFilterService::new()),
        trigger_service: backend.clone(),
        poller: Arc::new(RetryingAppearancePoller::new(backend, config.poll_policy())),
        prompt: Arc::new(prompt),
        caches,
        signals: Some(signal_tx),
    };
    let session = ExecutionsSession::new(
        Application::loading(application.name.clone()),
        ExecutionFilterModel::new(),
        services,
        config,
    )
    .context("failed to open view-state cache")?;
    Ok(session)
}

/// Delivers the fixture's load events and drives the session until they are consumed.
async fn load_session(session: &mut ExecutionsSession, backend: &FixtureBackend) -> Result<()> {
    let (event_tx, mut event_rx) = unbounded_channel();
    for event in backend.load_events() {
        event_tx.send(event).context("session event channel closed")?;
    }
    drop(event_tx);

    let interrupt = watch_interrupt(session.shutdown_token());
    let exit = session.run(&mut event_rx).await;
    interrupt.cancel();
    if exit == RunExit::Shutdown {
        bail!("interrupted");
    }
    Ok(())
}

/// Cancels `shutdown` on Ctrl-C until the returned token is cancelled.
fn watch_interrupt(shutdown: CancellationToken) -> CancellationToken {
    let done = CancellationToken::new();
    let watcher = done.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = watcher.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    shutdown.cancel();
                }
            }
        }
    });
    done
}

async fn run_show(args: ShowArgs, config: &SessionConfig, caches: Arc<ViewStateCacheRegistry>) -> Result<()> {
    let application = load_fixture(&args.fixture)?;
    let backend = Arc::new(FixtureBackend::new(&application));
    let mut session = open_session(&application, Arc::clone(&backend), PresetPrompt::new(None), config, caches)?;
    load_session(&mut session, &backend).await?;

    let statuses = args
        .statuses
        .iter()
        .map(|label| ExecutionStatus::parse(label).ok_or_else(|| anyhow!("unknown execution status '{label}'")))
        .collect::<Result<Vec<_>>>()?;

    if args.clear_filters {
        session.clear_filters();
    }
    if let Some(count) = args.count {
        session.set_count(count)?;
    }
    session.update_filter(|filter| {
        if let Some(search) = &args.search {
            filter.search = search.clone();
        }
        if !args.pipelines.is_empty() {
            filter.pipelines = args.pipelines.iter().cloned().collect();
        }
        if !statuses.is_empty() {
            filter.statuses = statuses.iter().copied().collect();
        }
        if let Some(group_by) = args.group_by {
            filter.group_by = group_by.into();
        }
    });

    if args.json {
        let out = json!({
            "application": session.application().name,
            "filter": session.filter(),
            "tags": session.tags(),
            "groups": session.groups(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_groups(&session);
    }
    session.teardown();
    Ok(())
}

fn print_groups(session: &ExecutionsSession) {
    if let Some(error) = session.load_error() {
        println!("Executions failed to load: {error}");
        return;
    }
    let tags = session.tags();
    if !tags.is_empty() {
        let summary: Vec<String> = tags.iter().map(|tag| format!("{}={}", tag.label, tag.value)).collect();
        println!("Filters: {}", summary.join(", "));
    }
    if session.groups().is_empty() {
        println!("No executions match.");
        return;
    }
    for group in session.groups() {
        println!(
            "{} ({} running, {} total)",
            group.heading, group.running_count, group.total_count
        );
        for execution in &group.executions {
            let started = execution
                .start_time
                .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("  {:<28} {:<12} {}", execution.id, execution.status.as_str(), started);
        }
    }
}

async fn run_trigger(args: TriggerArgs, config: &SessionConfig, caches: Arc<ViewStateCacheRegistry>) -> Result<()> {
    let application = load_fixture(&args.fixture)?;
    let trigger = match &args.trigger {
        Some(raw) => serde_json::from_str(raw).context("--trigger must be valid JSON")?,
        None => json!({"type": "manual", "user": "anonymous"}),
    };
    let command = TriggerCommand::new(args.pipeline, trigger);

    let backend = Arc::new(FixtureBackend::new(&application));
    let prompt = PresetPrompt::new(Some(command));
    let mut session = open_session(&application, Arc::clone(&backend), prompt, config, caches)?;
    load_session(&mut session, &backend).await?;

    let pending = session
        .trigger_pipeline()
        .await
        .context("manual execution was dismissed")?;
    let outcome = pending.await?;
    session.handle_event(backend.reload_event());

    let out: Value = match &outcome {
        TriggerOutcome::Appeared { execution_id } => {
            info!(execution_id = %execution_id, "execution is listed");
            json!({"executionId": execution_id, "appeared": true})
        }
        TriggerOutcome::PollExhausted { execution_id, reason } => {
            json!({"executionId": execution_id, "appeared": false, "reason": reason})
        }
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    session.teardown();
    Ok(())
}

fn run_cache(command: CacheCommand, config: &SessionConfig, caches: &ViewStateCacheRegistry) -> Result<()> {
    let cache = caches.cache(&config.cache_namespace, config.cache_options())?;
    match command {
        CacheCommand::Show { application } => {
            let evicted = cache.evict_stale()?;
            if evicted > 0 {
                info!(evicted, namespace = %config.cache_namespace, "pruned stale filter criteria");
            }
            let records: Vec<Value> = cache
                .records()
                .into_iter()
                .filter(|record| application.as_deref().is_none_or(|name| name == record.key))
                .map(|record| {
                    json!({
                        "application": record.key,
                        "version": record.entry.version,
                        "storedAt": record.entry.stored_at.to_rfc3339(),
                        "filter": record.entry.value,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        CacheCommand::Clear { application: Some(application) } => {
            if cache.remove(&application)? {
                println!("Cleared filter criteria for {application}");
            } else {
                println!("No filter criteria stored for {application}");
            }
        }
        CacheCommand::Clear { application: None } => {
            cache.clear()?;
            println!("Cleared all filter criteria");
        }
    }
    Ok(())
}
