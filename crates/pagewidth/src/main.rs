use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use pagewidth_core::api::{Block, NotionApi};
use pagewidth_core::client::{NotionClient, NotionClientConfig};
use pagewidth_core::collect::{PageSet, collect_pages};
use pagewidth_core::config::{load_config, resolve_config_path};
use pagewidth_core::mutate::{
    BatchOptions, BatchSummary, MutationOutcome, ProgressObserver, UnknownErrorPolicy, run_batch,
};
use pagewidth_core::select::select_workspace;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "pagewidth",
    version,
    about = "Turn the full-width page setting on or off for every page in a Notion workspace",
    after_help = "Authentication: set NOTION_TOKEN_V2 to an existing session cookie, or NOTION_PASSWORD \
                  (or type it when asked) to sign in with the account password. The password \
                  prompt echoes input. Emailed one-time login codes are not supported."
)]
struct Cli {
    #[arg(value_name = "EMAIL", help = "Email address of the Notion account")]
    email: String,
    #[arg(
        value_name = "FULL_WIDTH",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = parse_full_width,
        help = "Desired full-width setting: true or false"
    )]
    full_width: bool,
    #[arg(
        value_name = "DELAY_SECONDS",
        default_value = "0.5",
        value_parser = parse_delay,
        help = "Pause after each page, in seconds"
    )]
    delay: Duration,
    #[arg(long, value_name = "ID|NAME", help = "Workspace to edit (skips the prompt)")]
    workspace: Option<String>,
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, help = "List the pages that would be altered without changing them")]
    dry_run: bool,
    #[arg(
        long,
        value_name = "POLICY",
        default_value = "abort",
        value_parser = parse_policy,
        help = "Handling of unrecognized mutation errors: abort or skip"
    )]
    on_unknown_error: UnknownErrorPolicy,
    #[arg(short, long, help = "Print debug diagnostics to stderr")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);
    run(cli)
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let cwd = env::current_dir().context("failed to read current directory")?;
    let config_path = resolve_config_path(cli.config.as_deref(), &cwd);
    let config = load_config(&config_path)?;
    debug!(path = %config_path.display(), "loaded configuration");

    let mut client = NotionClient::new(NotionClientConfig::from_config(&config))?;
    authenticate(&mut client, &cli.email)?;

    let user_id = client
        .resolve_user_id(&cli.email)
        .context("failed to resolve Notion user")?;
    let workspaces = client
        .list_workspaces(&user_id)
        .context("failed to list workspaces")?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut stdout = io::stdout();
    let workspace = select_workspace(
        workspaces,
        cli.workspace.as_deref(),
        &mut input,
        &mut stdout,
    )?;
    info!(workspace = %workspace.name, id = %workspace.id, "selected workspace");

    println!("Fetching all pages to iterate through...");
    let pages = collect_pages(&mut client, &workspace)?;

    if cli.dry_run {
        print_dry_run(&workspace.name, &pages);
        return Ok(());
    }

    let options = BatchOptions {
        full_width: cli.full_width,
        delay: cli.delay,
        unknown_errors: cli.on_unknown_error,
    };
    let mut progress = TerminalProgress::new(pages.len());
    let result = run_batch(&mut client, &pages, &options, &mut progress);
    progress.finish();
    let summary = result?;

    for failure in &summary.failed {
        eprintln!("warning: page {} was not altered: {}", failure.page_id, failure.message);
    }
    println!(
        "Successfully altered {} out of {} pages!",
        summary.applied, summary.total
    );
    debug!(requests = client.request_count(), "run finished");
    Ok(())
}

fn authenticate(client: &mut NotionClient, email: &str) -> Result<()> {
    if client.is_authenticated() {
        return Ok(());
    }
    debug!("no session cookie, logging in");

    let password = match env::var("NOTION_PASSWORD") {
        Ok(value) if !value.is_empty() => value,
        _ => prompt_password(email)?,
    };
    client.login(email, &password)
}

fn prompt_password(email: &str) -> Result<String> {
    eprint!("Notion password for {email}: ");
    io::stderr().flush()?;
    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if read == 0 || password.is_empty() {
        bail!("no credentials: set NOTION_TOKEN_V2 or NOTION_PASSWORD, or enter a password");
    }
    Ok(password)
}

fn print_dry_run(workspace: &str, pages: &PageSet) {
    for page in pages {
        println!("{}\t{}", page.id, page.display_title());
    }
    println!(
        "dry run: {} pages in {workspace} would be altered",
        pages.len()
    );
}

struct TerminalProgress {
    total: usize,
    drawn: bool,
}

impl TerminalProgress {
    fn new(total: usize) -> Self {
        Self {
            total,
            drawn: false,
        }
    }

    fn finish(&mut self) {
        if self.drawn {
            eprintln!();
        }
    }
}

impl ProgressObserver for TerminalProgress {
    fn page_finished(&mut self, _page: &Block, _outcome: &MutationOutcome, summary: &BatchSummary) {
        let mut stderr = io::stderr();
        let _ = write!(
            stderr,
            "\rProcessing pages: {}/{} (skipped {})",
            summary.processed(),
            self.total,
            summary.skipped
        );
        let _ = stderr.flush();
        self.drawn = true;
    }
}

fn parse_full_width(value: &str) -> Result<bool, String> {
    if value.eq_ignore_ascii_case("true") {
        return Ok(true);
    }
    if value.eq_ignore_ascii_case("false") {
        return Ok(false);
    }
    Err("Full width setting must be \"true\" or \"false\"".to_string())
}

fn parse_delay(value: &str) -> Result<Duration, String> {
    let seconds = value
        .trim()
        .parse::<f64>()
        .map_err(|_| "Delay must be a number in seconds".to_string())?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| "Delay must be a non-negative, finite number of seconds".to_string())
}

fn parse_policy(value: &str) -> Result<UnknownErrorPolicy, String> {
    UnknownErrorPolicy::parse(value).map_err(|error| error.to_string())
}
