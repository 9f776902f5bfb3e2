use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use test_retry::blocks;
use test_retry::config::RetryConfig;
use test_retry::reporter::{replay_events, FailureReporter};
use test_retry::runner::CommandRunner;
use test_retry::session::{RetrySession, WorkingCopyNaming};
use test_retry::state::RetryState;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "test-retry",
    about = "Re-run only the tests that failed last time",
    version
)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Overrides {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Retry state file
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Per-test timeout handed to the runner
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Glob selecting working copies
    #[arg(long, global = true)]
    pattern: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Retry the recorded failures until they pass or attempts run out
    Run,
    /// Record failures from a JSON-lines stream of test events
    Record(RecordArgs),
    /// Show which tests each recorded file would keep
    Plan,
}

#[derive(Args, Debug)]
struct RecordArgs {
    /// Event stream, `-` for stdin
    #[arg(default_value = "-")]
    events: PathBuf,
}

impl Overrides {
    fn load(&self) -> Result<RetryConfig> {
        let mut config = RetryConfig::load_or_default(self.config.as_deref())
            .context("Failed to load configuration")?;
        if let Some(state_file) = &self.state_file {
            config.state_file = state_file.clone();
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.runner.timeout_ms = timeout_ms;
        }
        if let Some(pattern) = &self.pattern {
            config.runner.pattern = pattern.clone();
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = cli.overrides.load()?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Record(args) => record(config, &args.events),
        Commands::Plan => plan(config),
    }
}

async fn run(config: RetryConfig) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let runner = CommandRunner::new(&config.runner, &cwd);
    let mut session = RetrySession::new(config, runner);

    match session.run().await {
        Ok(outcome) => {
            for path in &outcome.working_copies {
                println!("{}", path.display());
            }
            if outcome.attempts > 0 {
                eprintln!("Passed after {} attempt(s)", outcome.attempts);
            }
            Ok(())
        }
        Err(err) => {
            for path in session.working_copies() {
                println!("{}", path.display());
            }
            tracing::error!("{err}");
            std::process::exit(1);
        }
    }
}

fn record(config: RetryConfig, events: &Path) -> Result<()> {
    let state = RetryState::load_or_empty(&config.state_file)
        .with_context(|| format!("Failed to load {}", config.state_file.display()))?;
    let mut reporter = FailureReporter::new(state, WorkingCopyNaming::from_config(&config));

    let handled = if events == Path::new("-") {
        replay_events(io::stdin().lock(), &mut reporter)
    } else {
        let file = File::open(events).with_context(|| format!("Failed to open {}", events.display()))?;
        replay_events(BufReader::new(file), &mut reporter)
    }
    .context("Failed to read test events")?;

    eprintln!(
        "Handled {handled} event(s), recorded {} failure(s) in {}",
        reporter.recorded(),
        config.state_file.display()
    );
    Ok(())
}

fn plan(config: RetryConfig) -> Result<()> {
    let state = RetryState::load(&config.state_file)
        .with_context(|| format!("Failed to load {}", config.state_file.display()))?;
    if state.is_empty() {
        println!("Nothing to retry in {}", config.state_file.display());
        return Ok(());
    }

    let naming = WorkingCopyNaming::from_config(&config);
    let locator = config.locator();

    for record in state.records() {
        let path = &record.test_file;
        println!("{}", path.display());
        if naming.is_working_copy(path) {
            println!("  skipped: working copy");
            continue;
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                println!("  skipped: {err}");
                continue;
            }
        };
        match blocks::isolate(path, &content, &record.failed_names, &locator) {
            Ok(isolation) => {
                for decision in &isolation.decisions {
                    let verdict = if decision.keep { "keep" } else { "neutralize" };
                    println!("  {verdict:<10} {:>5}  {}", decision.line, decision.span.name);
                }
                println!("  -> {}", naming.working_copy_for(path).display());
            }
            Err(err) => println!("  skipped: {err}"),
        }
    }
    Ok(())
}
