//! Command-line surface: argument parsing and command dispatch.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{info, warn};

use crate::entities::analysis::{self, Analysis, AnalysisOptions, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use crate::entities::event::{self, EventRecord, ScrapeOptions};
use crate::entities::stats;
use crate::render::{json, markdown, pdf};
use crate::sources::FetchMode;
use crate::sources::anthropic::{ANTHROPIC_API_KEY_ENV, AnthropicClient};

pub mod health;

#[derive(Parser, Debug)]
#[command(
    name = "yeoshin",
    version,
    about = "Scrape Yeoshin Ticket procedure events, summarize prices, and build a PDF report"
)]
pub struct Cli {
    /// Print JSON instead of markdown
    #[arg(long, global = true)]
    pub json: bool,

    /// Bypass the HTTP cache for this run
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// How site pages are fetched
    #[arg(long, global = true, value_enum, default_value_t = Fetch::Browser)]
    pub fetch: Fetch,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// Headless Chrome: scrolls the result list and opens the option modal
    Browser,
    /// Plain HTTP: server-rendered HTML only
    Http,
}

impl From<Fetch> for FetchMode {
    fn from(value: Fetch) -> Self {
        match value {
            Fetch::Browser => FetchMode::Browser,
            Fetch::Http => FetchMode::Http,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search events for a keyword and list one row per option
    Search {
        keyword: String,

        /// Maximum number of events to visit
        #[arg(long)]
        limit: Option<usize>,

        /// Detail pages fetched at once (1-8)
        #[arg(long, default_value_t = 2)]
        concurrency: usize,
    },

    /// Price summary and mean first-option price per region
    Stats {
        keyword: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Rows saved by `search --json` instead of scraping
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Scrape, analyze, and write the PDF report
    Report {
        keyword: String,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        input: Option<PathBuf>,

        /// PDF path (default: yeoshin_<keyword>_report.pdf)
        #[arg(long)]
        output: Option<PathBuf>,

        /// TTF font with Hangul glyphs (falls back to YEOSHIN_FONT_PATH)
        #[arg(long)]
        font: Option<PathBuf>,

        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,

        /// Write the report with the fallback analysis text
        #[arg(long)]
        skip_analysis: bool,
    },

    /// Check whether the session cookies are logged in
    LoginCheck,

    /// Check site, API, and local path health
    Health {
        /// Skip local cache and font checks
        #[arg(long)]
        apis_only: bool,
    },

    /// Print the version
    Version,
}

#[derive(Debug, serde::Serialize)]
struct ReportOutput<'a> {
    keyword: &'a str,
    path: String,
    pages: usize,
    embedded_font: bool,
    generated: &'a str,
    summary: &'a stats::PriceSummary,
    analysis: &'a Analysis,
}

async fn collect_rows(
    keyword: &str,
    limit: Option<usize>,
    input: Option<&Path>,
    concurrency: Option<usize>,
    fetch: FetchMode,
) -> anyhow::Result<Vec<EventRecord>> {
    let rows = match input {
        Some(path) => {
            let mut rows = event::load(path).await?;
            if let Some(limit) = limit {
                rows.retain(|row| row.exposure_order <= limit);
            }
            info!(path = %path.display(), rows = rows.len(), "Loaded saved rows");
            rows
        }
        None => {
            let mut opts = ScrapeOptions {
                limit,
                fetch,
                ..ScrapeOptions::default()
            };
            if let Some(concurrency) = concurrency {
                opts.concurrency = concurrency;
            }
            event::scrape(keyword, &opts).await?
        }
    };
    event::validate(&rows, keyword)?;
    Ok(rows)
}

fn timestamp() -> anyhow::Result<String> {
    Ok(OffsetDateTime::now_utc()
        .format(format_description!("[year]-[month]-[day] [hour]:[minute] UTC"))?)
}

struct ReportRequest<'a> {
    keyword: &'a str,
    limit: Option<usize>,
    input: Option<&'a Path>,
    output: Option<PathBuf>,
    font: Option<&'a Path>,
    model: String,
    skip_analysis: bool,
    fetch: FetchMode,
}

/// `api_key` is checked before any scraping starts.
async fn report(
    req: ReportRequest<'_>,
    api_key: Option<String>,
    as_json: bool,
) -> anyhow::Result<String> {
    let ReportRequest {
        keyword,
        limit,
        input,
        output,
        font,
        model,
        skip_analysis,
        fetch,
    } = req;
    let client = if skip_analysis {
        None
    } else {
        Some(AnthropicClient::with_key(api_key)?)
    };

    let rows = collect_rows(keyword, limit, input, None, fetch).await?;
    let summary = stats::summarize(&rows);

    let analysis = match &client {
        Some(client) => {
            let opts = AnalysisOptions {
                model,
                max_tokens: DEFAULT_MAX_TOKENS,
            };
            analysis::analyze_or_fallback(client, &rows, &opts).await
        }
        None => {
            warn!("Analysis skipped, using fallback text");
            Analysis::fallback()
        }
    };

    let path = output.unwrap_or_else(|| crate::utils::paths::default_report_path(keyword));
    let generated = timestamp()?;
    let rendered = pdf::render(
        &pdf::ReportInput {
            keyword,
            rows: &rows,
            regions: &summary.regions,
            analysis_text: &analysis.raw,
            generated: &generated,
        },
        font,
    )?;
    pdf::write(&path, &rendered.bytes).await?;
    info!(path = %path.display(), pages = rendered.pages, "Report written");

    if as_json {
        return Ok(json::to_pretty(&ReportOutput {
            keyword: keyword.trim(),
            path: path.display().to_string(),
            pages: rendered.pages,
            embedded_font: rendered.embedded_font,
            generated: &generated,
            summary: &summary,
            analysis: &analysis,
        })?);
    }

    let mut out = markdown::report_markdown(keyword, &path, &rows, &summary, &analysis, &generated)?;
    out.push('\n');
    out.push_str(&markdown::analysis_markdown(&analysis)?);
    Ok(out)
}

async fn dispatch(command: Commands, as_json: bool, fetch: FetchMode) -> anyhow::Result<String> {
    match command {
        Commands::Search {
            keyword,
            limit,
            concurrency,
        } => {
            let rows = collect_rows(&keyword, limit, None, Some(concurrency), fetch).await?;
            if as_json {
                return Ok(json::to_pretty(&rows)?);
            }
            Ok(markdown::search_markdown(&keyword, &rows)?)
        }
        Commands::Stats {
            keyword,
            limit,
            input,
        } => {
            let rows = collect_rows(&keyword, limit, input.as_deref(), None, fetch).await?;
            let summary = stats::summarize(&rows);
            if as_json {
                return Ok(json::to_pretty(&summary)?);
            }
            Ok(markdown::stats_markdown(&keyword, &summary)?)
        }
        Commands::Report {
            keyword,
            limit,
            input,
            output,
            font,
            model,
            skip_analysis,
        } => {
            let req = ReportRequest {
                keyword: &keyword,
                limit,
                input: input.as_deref(),
                output,
                font: font.as_deref(),
                model,
                skip_analysis,
                fetch,
            };
            report(req, crate::sources::env_value(ANTHROPIC_API_KEY_ENV), as_json).await
        }
        Commands::LoginCheck => {
            let report = event::login_check(fetch).await?;
            if as_json {
                return Ok(json::to_pretty(&report)?);
            }
            Ok(report.to_markdown())
        }
        Commands::Health { apis_only } => {
            let report = health::check(apis_only).await?;
            if as_json {
                return Ok(json::to_pretty(&report)?);
            }
            Ok(report.to_markdown())
        }
        Commands::Version => Ok(format!("yeoshin {}", env!("CARGO_PKG_VERSION"))),
    }
}

/// Runs a parsed command and returns its printable output.
///
/// # Errors
///
/// Returns the underlying [`crate::error::YeoshinError`] (wrapped in `anyhow`) for
/// invalid arguments, login problems, empty results, and upstream or file failures.
pub async fn run(cli: Cli) -> anyhow::Result<String> {
    crate::sources::with_no_cache(cli.no_cache, dispatch(cli.command, cli.json, cli.fetch.into())).await
}

/// Parses `args` (with or without the leading program name) and runs the command.
pub async fn execute(mut args: Vec<String>) -> anyhow::Result<String> {
    if args.first().map(String::as_str) != Some("yeoshin") {
        args.insert(0, "yeoshin".into());
    }
    let cli = Cli::try_parse_from(args)?;
    run(cli).await
}
