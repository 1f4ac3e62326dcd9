//! pushgate - gated promotion pipeline CLI
//!
//! Validates pushes to a source branch and promotes passing commits into
//! the target branch.
//!
//! ## Commands
//!
//! - `run`: validate one commit and promote or block it
//! - `listen`: admit push events read as JSON lines from stdin
//! - `watch`: poll the source branches and run on every new tip
//! - `history`: list recorded runs
//! - `show`: show one recorded run with its events
//! - `config`: print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pushgate_ci::{
    BranchWatcher, Dispatcher, Pipeline, PipelineConfig, ProcessExecutor, ValidationGate,
};
use pushgate_core::{
    is_git_repo, BranchPair, CommitRef, GitCli, LogNotifier, Notifier, PipelineRun, PushEvent,
    RunOutcome, VersionControl, WebhookNotifier, CLEAN_EXCLUDES,
};
use pushgate_state::{RunId, RunLedger, SurrealRunLedger};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "pushgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Gated promotion pipeline: validate pushes, promote what passes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print command results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (default: ./pushgate.toml when present)
    #[arg(short, long, global = true, env = "PUSHGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Do not record runs in the ledger
    #[arg(long, global = true)]
    no_ledger: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one commit of a source branch, then promote or block it
    Run {
        /// Source branch (default: the configured source branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Commit to validate (default: the fetched tip of the branch)
        #[arg(long)]
        commit: Option<String>,
    },

    /// Read push events as JSON lines from stdin until EOF
    ///
    /// Each line is `{"branch": "...", "commit": "...", "timestamp": "..."}`;
    /// `timestamp` is optional.
    Listen,

    /// Poll the configured source branches and run on every new tip
    Watch {
        /// Override the poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,

        /// Poll once, wait for the runs, and exit
        #[arg(long)]
        once: bool,
    },

    /// List recorded runs, newest first
    History {
        /// Only runs triggered from this source branch
        #[arg(short, long)]
        source: Option<String>,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show a recorded run, its events, and the gate verdict
    Show {
        /// Run ID
        run_id: String,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    pushgate_core::init_tracing(cli.json_logs, level);

    let config = PipelineConfig::discover(cli.config.as_deref())
        .context("Failed to load pushgate configuration")?;

    match cli.command {
        Commands::Run { branch, commit } => {
            let routes = build_routes(&config, !cli.no_ledger).await?;
            cmd_run(&config, &routes, branch.as_deref(), commit.as_deref(), cli.json).await
        }
        Commands::Listen => {
            let routes = build_routes(&config, !cli.no_ledger).await?;
            cmd_listen(&routes, cli.json).await
        }
        Commands::Watch { interval, once } => {
            let routes = build_routes(&config, !cli.no_ledger).await?;
            let interval = interval
                .map(|secs| Duration::from_secs(secs.max(1)))
                .unwrap_or_else(|| config.poll_interval());
            cmd_watch(&routes, interval, once, cli.json).await
        }
        Commands::History { source, limit } => {
            let ledger = open_ledger().await?;
            cmd_history(ledger.as_ref(), source.as_deref(), limit, cli.json).await
        }
        Commands::Show { run_id } => {
            let ledger = open_ledger().await?;
            cmd_show(ledger.as_ref(), &run_id, cli.json).await
        }
        Commands::Config => cmd_config(&config),
    }
}

/// A configured pair with the checkout and pipeline that serve it.
struct PairRoute {
    pair: BranchPair,
    vcs: Arc<GitCli>,
    pipeline: Arc<Pipeline>,
}

async fn open_ledger() -> Result<Arc<dyn RunLedger>> {
    let ledger = SurrealRunLedger::from_env()
        .await
        .context("Failed to connect to the run ledger")?;
    Ok(Arc::new(ledger))
}

fn build_notifier(config: &PipelineConfig) -> Result<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) => {
            let timeout = Duration::from_secs(config.notify_timeout_secs);
            let notifier =
                WebhookNotifier::new(url.clone(), timeout).context("Failed to build webhook client")?;
            Ok(Arc::new(notifier))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

async fn build_routes(config: &PipelineConfig, record: bool) -> Result<Vec<PairRoute>> {
    let pairs = config.pairs();
    for (_, repo_dir) in &pairs {
        ensure_checkout(repo_dir)?;
    }

    let ledger: Option<Arc<dyn RunLedger>> = if record {
        let url = SurrealRunLedger::url_from_env();
        for (_, repo_dir) in &pairs {
            ensure_ledger_survives_checkout(&url, repo_dir)?;
        }
        let ledger: Arc<dyn RunLedger> = Arc::new(
            SurrealRunLedger::connect(&url)
                .await
                .with_context(|| format!("Failed to connect to the run ledger at {url}"))?,
        );
        Some(ledger)
    } else {
        None
    };

    let notifier = build_notifier(config)?;
    let mut routes = Vec::new();
    for (pair, repo_dir) in pairs {
        let vcs = Arc::new(GitCli::new(&repo_dir, &config.remote).with_timeout(config.vcs_timeout()));
        let executor = Arc::new(ProcessExecutor::new(&repo_dir));
        let mut pipeline = Pipeline::new(config, &repo_dir, vcs.clone(), executor, notifier.clone());
        if let Some(ledger) = &ledger {
            pipeline = pipeline.with_ledger(ledger.clone());
        }
        info!(pair = %pair, repo_dir = %repo_dir.display(), "pair configured");
        routes.push(PairRoute {
            pair,
            vcs,
            pipeline: Arc::new(pipeline),
        });
    }
    Ok(routes)
}

fn ensure_checkout(repo_dir: &Path) -> Result<()> {
    if !is_git_repo(repo_dir) {
        anyhow::bail!("{} is not a git checkout", repo_dir.display());
    }
    Ok(())
}

/// Refuse an on-disk ledger that the clean after each checkout would delete.
fn ensure_ledger_survives_checkout(db_url: &str, repo_dir: &Path) -> Result<()> {
    let Some(ledger_dir) = SurrealRunLedger::local_path(db_url) else {
        return Ok(());
    };
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    let ledger_dir = absolute(&cwd, ledger_dir);
    let repo_dir = absolute(&cwd, repo_dir);

    let Ok(inside) = ledger_dir.strip_prefix(&repo_dir) else {
        return Ok(());
    };
    let preserved = inside
        .components()
        .any(|c| CLEAN_EXCLUDES.iter().any(|keep| c.as_os_str() == *keep));
    if !preserved {
        anyhow::bail!(
            "run ledger {} is inside checkout {} and would be cleaned on every checkout; \
             point PUSHGATE_DB_URL outside the checkout or under .pushgate/",
            ledger_dir.display(),
            repo_dir.display()
        );
    }
    Ok(())
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    base.join(path)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn dispatcher(routes: &[PairRoute]) -> Dispatcher {
    routes
        .iter()
        .fold(Dispatcher::builder(), |builder, route| {
            builder.route(route.pair.clone(), route.pipeline.clone())
        })
        .build()
}

fn find_route<'a>(routes: &'a [PairRoute], source: &str) -> Result<&'a PairRoute> {
    routes
        .iter()
        .find(|r| r.pair.source == source)
        .with_context(|| format!("branch '{source}' is not a configured source branch"))
}

async fn cmd_run(
    config: &PipelineConfig,
    routes: &[PairRoute],
    branch: Option<&str>,
    commit: Option<&str>,
    json: bool,
) -> Result<()> {
    let route = find_route(routes, branch.unwrap_or(&config.source_branch))?;

    let commit = match commit {
        Some(sha) => CommitRef::new(sha),
        None => route
            .vcs
            .fetch(&route.pair.source)
            .await
            .with_context(|| format!("Failed to fetch {}", route.pair.source))?,
    };
    let event = PushEvent::new(route.pair.source.clone(), commit);
    if !event.is_well_formed() {
        anyhow::bail!("empty commit for branch '{}'", event.branch);
    }

    let run = route
        .pipeline
        .execute(&event, &route.pair.target)
        .await
        .context("Pipeline failed to run")?;
    print_run(&run, json)?;

    match run.outcome() {
        Some(RunOutcome::Promoted) => Ok(()),
        _ => anyhow::bail!("commit {} was not promoted", run.commit().short()),
    }
}

async fn cmd_listen(routes: &[PairRoute], json: bool) -> Result<()> {
    let dispatcher = dispatcher(routes);
    info!(pairs = dispatcher.pairs().len(), "reading push events from stdin");

    let summary = listen_loop(BufReader::new(tokio::io::stdin()), &dispatcher, json).await;
    dispatcher.wait_idle().await;
    report_finished(&dispatcher, json);
    info!(
        submitted = summary.submitted,
        skipped = summary.skipped,
        "event stream closed"
    );
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ListenSummary {
    submitted: usize,
    skipped: usize,
}

/// Submit one event per line until EOF or a read error. Never returns
/// early with runs still to wait for; the caller waits for the dispatcher.
async fn listen_loop<R>(mut reader: R, dispatcher: &Dispatcher, json: bool) -> ListenSummary
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = ListenSummary::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "event stream failed, no further events will be read");
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_event(line) {
            Ok(event) => {
                dispatcher.submit(event);
                summary.submitted += 1;
            }
            Err(e) => {
                warn!(error = %e, "skipping malformed event line");
                summary.skipped += 1;
            }
        }
        report_finished(dispatcher, json);
    }
    summary
}

/// Print runs finished so far; output errors are logged, runs keep going.
fn report_finished(dispatcher: &Dispatcher, json: bool) {
    for run in dispatcher.take_finished() {
        if let Err(e) = print_run(&run, json) {
            warn!(run_id = %run.run_id(), error = %e, "failed to print run");
        }
    }
}

fn parse_event(line: &str) -> Result<PushEvent> {
    serde_json::from_str(line).context("invalid push event")
}

async fn cmd_watch(routes: &[PairRoute], interval: Duration, once: bool, json: bool) -> Result<()> {
    let dispatcher = dispatcher(routes);
    let mut watchers: Vec<BranchWatcher> = routes
        .iter()
        .map(|r| {
            let vcs: Arc<dyn VersionControl> = r.vcs.clone();
            BranchWatcher::new(vcs, r.pair.source.clone())
        })
        .collect();
    info!(
        pairs = dispatcher.pairs().len(),
        interval_secs = interval.as_secs(),
        "watching source branches"
    );

    loop {
        let polls = futures::future::join_all(watchers.iter_mut().map(|w| w.poll_once())).await;
        for poll in polls {
            match poll {
                Ok(Some(event)) => {
                    dispatcher.submit(event);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "branch poll failed"),
            }
        }
        report_finished(&dispatcher, json);
        if once {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, waiting for active runs");
                break;
            }
        }
    }

    dispatcher.wait_idle().await;
    report_finished(&dispatcher, json);
    Ok(())
}

async fn cmd_history(
    ledger: &dyn RunLedger,
    source: Option<&str>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let runs = ledger
        .list_runs(source)
        .await
        .context("Failed to list runs")?;
    let runs: Vec<_> = runs.into_iter().take(limit).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    for run in &runs {
        let outcome = run
            .summary
            .as_ref()
            .map(|s| s.outcome.as_str())
            .unwrap_or("-");
        let commit: String = run.metadata.commit.chars().take(12).collect();
        println!(
            "{}  {:<9}  {:<8}  {}  {} -> {}  {}",
            run.run_id,
            run.status.as_str(),
            outcome,
            commit,
            run.metadata.source_branch,
            run.metadata.target_branch,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

async fn cmd_show(ledger: &dyn RunLedger, run_id: &str, json: bool) -> Result<()> {
    let run_id = RunId(run_id.to_string());
    let record = ledger
        .get_run(&run_id)
        .await
        .with_context(|| format!("Run {run_id} not found"))?;
    let events = ledger
        .get_events(&run_id)
        .await
        .context("Failed to load run events")?;
    let verdict = ValidationGate::evaluate(&events);

    if json {
        let doc = serde_json::json!({
            "run": record,
            "events": events,
            "gate": verdict,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("Run:     {}", record.run_id);
    println!("Commit:  {}", record.metadata.commit);
    println!(
        "Pair:    {} -> {}",
        record.metadata.source_branch, record.metadata.target_branch
    );
    println!("Status:  {}", record.status.as_str());
    if let Some(summary) = &record.summary {
        println!("Outcome: {}", summary.outcome.as_str());
        println!("Took:    {}ms", summary.duration_ms);
    }
    println!();

    for event in &events {
        println!(
            "  #{:<3} {}  {:<22} {}",
            event.seq,
            event.timestamp.format("%H:%M:%S%.3f"),
            event.kind,
            event.payload
        );
    }

    println!();
    println!("Gate: {}", if verdict.passed { "PASSED" } else { "FAILED" });
    for violation in &verdict.violations {
        println!("  - {violation}");
    }
    Ok(())
}

fn cmd_config(config: &PipelineConfig) -> Result<()> {
    let rendered = config.to_toml().context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}

fn print_run(run: &PipelineRun, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(run)?);
        return Ok(());
    }
    let outcome = run.outcome().map(|o| o.as_str()).unwrap_or("-");
    println!(
        "{}  {}  {}  [{} / {}]",
        run.run_id(),
        run.pair(),
        run.commit().short(),
        run.stage(),
        outcome
    );
    if let Some(report) = run.report() {
        for line in report.render().lines() {
            println!("    {line}");
        }
    }
    if let Some(validation) = run.validation() {
        let verdict = ValidationGate::evaluate_result(validation);
        for violation in &verdict.violations {
            println!("    - {violation}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushgate_ci::fakes::ScriptedExecutor;
    use pushgate_core::fakes::{MemoryVcs, RecordingNotifier};

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_branch_and_commit() {
        let cli = Cli::try_parse_from([
            "pushgate", "--json", "run", "--branch", "staging", "--commit", "abc123",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run { branch, commit } => {
                assert_eq!(branch.as_deref(), Some("staging"));
                assert_eq!(commit.as_deref(), Some("abc123"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli =
            Cli::try_parse_from(["pushgate", "watch", "--once", "--no-ledger", "-v"]).unwrap();
        assert!(cli.no_ledger);
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Watch {
                once: true,
                interval: None
            }
        ));
    }

    #[test]
    fn event_line_parses_without_timestamp() {
        let event = parse_event(r#"{"branch": "new", "commit": "abc123"}"#).unwrap();
        assert_eq!(event.branch, "new");
        assert_eq!(event.commit, CommitRef::new("abc123"));
    }

    #[test]
    fn malformed_event_line_is_an_error() {
        assert!(parse_event("not json").is_err());
        assert!(parse_event(r#"{"branch": "new"}"#).is_err());
    }

    #[test]
    fn unknown_source_branch_is_reported() {
        let err = find_route(&[], "feature").err().unwrap();
        assert!(err.to_string().contains("not a configured source branch"));
    }

    #[test]
    fn non_checkout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = ensure_checkout(dir.path()).unwrap_err();
        assert!(err.to_string().contains("is not a git checkout"));
    }

    #[test]
    fn ledger_under_state_dir_survives_checkout() {
        ensure_ledger_survives_checkout("surrealkv://.pushgate/db", Path::new(".")).unwrap();
        ensure_ledger_survives_checkout("surrealkv://./.pushgate/db", Path::new("./")).unwrap();
        ensure_ledger_survives_checkout("surrealkv:///var/lib/pushgate", Path::new("/srv/site"))
            .unwrap();
        ensure_ledger_survives_checkout("mem://", Path::new(".")).unwrap();
    }

    #[test]
    fn ledger_inside_checkout_is_refused() {
        let err = ensure_ledger_survives_checkout("surrealkv://runs/db", Path::new("."))
            .unwrap_err();
        assert!(err.to_string().contains("would be cleaned on every checkout"));

        let err =
            ensure_ledger_survives_checkout("surrealkv:///srv/site/db", Path::new("/srv/site"))
                .unwrap_err();
        assert!(err.to_string().contains("/srv/site/db"));
    }

    fn fake_dispatcher(vcs: Arc<MemoryVcs>) -> Dispatcher {
        let pipeline = Pipeline::new(
            &PipelineConfig::default(),
            Path::new("."),
            vcs,
            Arc::new(ScriptedExecutor::new()),
            Arc::new(RecordingNotifier::new()),
        );
        Dispatcher::builder()
            .route(BranchPair::new("new", "main"), Arc::new(pipeline))
            .build()
    }

    fn fake_repo() -> Arc<MemoryVcs> {
        let vcs = Arc::new(
            MemoryVcs::new()
                .with_branch("main", "base")
                .with_branch("new", "base"),
        );
        vcs.commit("new", "abc123");
        vcs
    }

    #[tokio::test]
    async fn listen_skips_undecodable_lines() {
        let vcs = fake_repo();
        let dispatcher = fake_dispatcher(vcs.clone());
        let input: &[u8] =
            b"\xff\xfe\n{\"branch\": \"new\", \"commit\": \"abc123\"}\nnot json\n\n";

        let summary = listen_loop(input, &dispatcher, true).await;
        assert_eq!(
            summary,
            ListenSummary {
                submitted: 1,
                skipped: 2
            }
        );

        dispatcher.wait_idle().await;
        assert_eq!(vcs.tip("main"), Some(CommitRef::new("abc123")));
    }

    struct BrokenPipe;

    impl tokio::io::AsyncRead for BrokenPipe {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stream closed",
            )))
        }
    }

    #[tokio::test]
    async fn listen_read_error_keeps_admitted_runs() {
        use tokio::io::AsyncReadExt;

        let vcs = fake_repo();
        let dispatcher = fake_dispatcher(vcs.clone());
        let head: &[u8] = b"{\"branch\": \"new\", \"commit\": \"abc123\"}\n";
        let reader = BufReader::new(head.chain(BrokenPipe));

        let summary = listen_loop(reader, &dispatcher, true).await;
        assert_eq!(summary.submitted, 1);

        dispatcher.wait_idle().await;
        assert_eq!(vcs.tip("main"), Some(CommitRef::new("abc123")));
    }
}
