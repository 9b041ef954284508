use std::io::IsTerminal;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use miette::{Context, IntoDiagnostic, Result};

use kestrel_core::{KestrelConfig, OutputFormat, PullRequestRef, Severity};
use kestrel_review::github::GitHubClient;
use kestrel_review::invoke::LlmClient;
use kestrel_review::pipeline::{ReviewPipeline, RunOutcome, RunReport, RunState};

#[derive(Parser)]
#[command(
    name = "kestrel",
    version,
    about = "AI pull request reviewer",
    long_about = "Kestrel reviews a pull request with an LLM: it fetches the diff,\n\
                   splits it into token-bounded chunks, reviews them concurrently under\n\
                   provider rate limits, deduplicates the findings, and publishes them\n\
                   back as review comments.\n\n\
                   Examples:\n  \
                     kestrel review owner/repo#123            Review a GitHub PR\n  \
                     kestrel review owner/repo#123 --post     Review and publish comments\n  \
                     kestrel review --file changes.patch      Review a local diff\n  \
                     git diff main | kestrel review           Review a diff from stdin\n  \
                     kestrel doctor                           Check setup and environment"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .kestrel.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summary (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Review a pull request or a local diff
    #[command(long_about = "Review a pull request or a local diff.\n\n\
        Fetches the PR diff (or reads one from --file / stdin), splits it into\n\
        token-bounded chunks, reviews each chunk with the configured LLM, and\n\
        merges the findings into a deduplicated comment set.\n\n\
        Examples:\n  kestrel review owner/repo#123\n  kestrel review owner/repo#123 --post\n  kestrel review --file changes.patch --fail-on warning")]
    Review {
        /// GitHub PR to review (format: owner/repo#123)
        pr: Option<String>,
        /// Read a diff from a file instead of GitHub
        #[arg(long)]
        file: Option<PathBuf>,
        /// Publish comments back to the GitHub PR
        #[arg(
            long,
            long_help = "Publish review comments to the GitHub PR.\n\nRequires a PR reference and GITHUB_TOKEN. Comments are posted\nindividually against the head commit; a summary comment follows."
        )]
        post: bool,
        /// GitHub token (default: GITHUB_TOKEN or GH_TOKEN env var)
        #[arg(long)]
        github_token: Option<String>,
        /// Exit with code 2 if findings meet this severity
        #[arg(
            long,
            long_help = "Exit with code 2 if findings of this severity or higher are found.\n\nSeverity ranking: blocking > warning > suggestion > info.\nUseful in CI pipelines."
        )]
        fail_on: Option<Severity>,
        /// Abort the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Additional glob patterns to skip (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// Create a default .kestrel.toml configuration file
    #[command(long_about = "Create a default .kestrel.toml configuration file.\n\n\
        Generates a commented template with all available options.\n\
        Fails if .kestrel.toml already exists.")]
    Init,
    /// Check your Kestrel setup and environment
    Doctor,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

const DEFAULT_CONFIG: &str = r#"# Kestrel Configuration

[llm]
# model = "gpt-4o"
# base_url = "https://api.openai.com"
# temperature = 0.1
# max_output_tokens = 2048
# api_key is read from OPENAI_API_KEY if not set here

[review]
# max_chunk_tokens = 4000
# context_lines = 3
# concurrency = 4
# max_retries = 3
# retry_base_ms = 500
# min_severity = "suggestion"
# near_dup_threshold = 0.6
# max_comments = 50
# exclude_patterns = ["*.lock", "*.min.js", "vendor/**"]
# publish_on_cancel = false
"#;

fn read_diff_input(file: &Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err(format!("reading {}", path.display())),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .into_diagnostic()
                .wrap_err("reading stdin")?;
            Ok(input)
        }
    }
}

#[derive(serde::Serialize)]
struct CheckResult {
    name: &'static str,
    status: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "pass",
            detail: detail.into(),
            hint: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name,
            status: "fail",
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self.status {
            "pass" => "\u{2713}",
            "fail" => "\u{2717}",
            _ => "~",
        }
    }
}

fn run_doctor(config: &KestrelConfig, format: OutputFormat) -> Result<()> {
    let mut checks: Vec<CheckResult> = Vec::new();

    let config_path = std::path::Path::new(".kestrel.toml");
    if config_path.exists() {
        checks.push(CheckResult::pass("config_file", ".kestrel.toml found"));
    } else {
        checks.push(CheckResult::fail(
            "config_file",
            ".kestrel.toml not found",
            "run 'kestrel init' to create a default config",
        ));
    }

    checks.push(CheckResult::pass(
        "llm_model",
        format!(
            "{} ({} concurrent calls)",
            config.llm.model, config.review.concurrency
        ),
    ));

    if config.llm.api_key.is_some() || std::env::var("OPENAI_API_KEY").is_ok() {
        checks.push(CheckResult::pass("llm_api_key", "OPENAI_API_KEY set"));
    } else {
        checks.push(CheckResult::fail(
            "llm_api_key",
            "OPENAI_API_KEY not set",
            "export OPENAI_API_KEY=... or set api_key in .kestrel.toml",
        ));
    }

    if std::env::var("GITHUB_TOKEN").is_ok() || std::env::var("GH_TOKEN").is_ok() {
        checks.push(CheckResult::pass("github_token", "GITHUB_TOKEN set"));
    } else {
        checks.push(CheckResult::fail(
            "github_token",
            "GITHUB_TOKEN not set",
            "export GITHUB_TOKEN=... (needed to fetch and post PR reviews)",
        ));
    }

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "checks": checks,
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }
        _ => {
            println!(
                "Kestrel v{} — Environment Check\n",
                env!("CARGO_PKG_VERSION")
            );
            for check in &checks {
                let label = check.name.replace('_', " ");
                println!("  {} {label:<16} {}", check.symbol(), check.detail);
                if let Some(hint) = &check.hint {
                    println!("    hint: {hint}");
                }
            }
            let passed = checks.iter().filter(|c| c.status == "pass").count();
            let failed = checks.iter().filter(|c| c.status == "fail").count();
            println!("\n{passed} checks passed, {failed} failed");
        }
    }

    Ok(())
}

fn print_report(report: &RunReport, format: OutputFormat, verbose: bool) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(report).into_diagnostic()?
            );
        }
        OutputFormat::Markdown => {
            print!("{}", report.to_markdown());
        }
        OutputFormat::Text => {
            print!("{report}");
        }
    }

    if verbose {
        eprintln!("--- Review Stats ---");
        if !report.skipped_files.is_empty() {
            eprintln!("Skipped files:");
            for skipped in &report.skipped_files {
                eprintln!("  {} ({})", skipped.path.display(), skipped.reason);
            }
        }
        for chunk in &report.chunks {
            eprintln!(
                "chunk {} [{}]: {:?}",
                chunk.index,
                chunk.files.join(", "),
                chunk.status,
            );
        }
        for warning in &report.parse_warnings {
            eprintln!("warning: {warning}");
        }
        eprintln!("--------------------");
    }

    Ok(())
}

fn exit_code(report: &RunReport, fail_on: Option<Severity>) -> i32 {
    match report.outcome {
        RunOutcome::Failed => 1,
        RunOutcome::Cancelled => 3,
        RunOutcome::Done | RunOutcome::NothingToReview => match fail_on {
            Some(threshold) if report.has_findings_at(threshold) => 2,
            _ => 0,
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .expect("miette handler");
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => KestrelConfig::from_file(path).into_diagnostic()?,
        None => {
            let default_path = std::path::Path::new(".kestrel.toml");
            if default_path.exists() {
                KestrelConfig::from_file(default_path).into_diagnostic()?
            } else {
                KestrelConfig::default()
            }
        }
    };

    match cli.command {
        None => {
            Cli::command().print_help().into_diagnostic()?;
        }
        Some(Command::Review {
            ref pr,
            ref file,
            post,
            ref github_token,
            fail_on,
            timeout,
            ref exclude,
        }) => {
            let mut config = config;
            if !exclude.is_empty() {
                config
                    .review
                    .exclude_patterns
                    .extend(exclude.iter().cloned());
            }

            // Hint: missing API key before any network work
            if config.llm.api_key.is_none() && std::env::var("OPENAI_API_KEY").is_err() {
                miette::bail!(miette::miette!(
                    help = "Set OPENAI_API_KEY or add api_key in your .kestrel.toml under [llm]",
                    "No API key configured for the LLM provider"
                ));
            }

            if post && pr.is_none() {
                miette::bail!("--post requires a PR reference (owner/repo#123)");
            }

            let backend = LlmClient::new(&config.llm).into_diagnostic()?;
            let pipeline = ReviewPipeline::new(backend, &config);
            let deadline = timeout.map(Duration::from_secs);

            let spinner = if std::io::stderr().is_terminal() {
                let pb = indicatif::ProgressBar::new_spinner();
                pb.set_style(
                    indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
                        .unwrap(),
                );
                pb.set_message("Reviewing changes...");
                pb.enable_steady_tick(Duration::from_millis(120));
                Some(pb)
            } else {
                None
            };

            let report = if let Some(pr_ref) = pr {
                let pr_ref: PullRequestRef = pr_ref.parse().into_diagnostic()?;
                let github = GitHubClient::new(github_token.as_deref()).into_diagnostic()?;
                pipeline.review_pr(&github, &pr_ref, post, deadline).await
            } else {
                let diff_input = read_diff_input(file)?;
                if diff_input.trim().is_empty() {
                    if let Some(pb) = spinner {
                        pb.finish_and_clear();
                    }
                    miette::bail!(miette::miette!(
                        help = "Pipe a diff to kestrel, e.g.: git diff | kestrel review\n       Or use --file <path> or a PR reference owner/repo#123",
                        "Empty diff input"
                    ));
                }
                match pipeline.run_on_diff(&diff_input, deadline).await {
                    Ok(report) => report,
                    Err(e) => RunReport::failed(&config.llm.model, &e, RunState::Chunking),
                }
            };

            if let Some(pb) = spinner {
                pb.finish_and_clear();
            }

            print_report(&report, cli.format, cli.verbose)?;

            let code = exit_code(&report, fail_on);
            if code != 0 {
                std::process::exit(code);
            }
        }
        Some(Command::Init) => {
            let path = std::path::Path::new(".kestrel.toml");
            if path.exists() {
                miette::bail!(".kestrel.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .kestrel.toml with default configuration");
        }
        Some(Command::Doctor) => {
            run_doctor(&config, cli.format)?;
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "kestrel", &mut std::io::stdout());
        }
    }

    Ok(())
}
