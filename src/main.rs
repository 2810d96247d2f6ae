use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use sharegrab_lib::engine::batch::{read_links, run_batch, CancelFlag, ItemOutcome};
use sharegrab_lib::engine::output;
use sharegrab_lib::{init_tracing, Engine, EngineConfig, ExtractOptions, ExtractResult, Result};

const MAX_COMMENTS: usize = 100;

#[derive(Parser)]
#[command(name = "sharegrab", version, about = "Metadata and media links from social-media share links")]
struct Cli {
    /// Share link or pasted share text
    #[arg(required_unless_present = "batch", conflicts_with = "batch")]
    input: Option<String>,

    /// File with one link per line
    #[arg(long, short = 'b', value_name = "FILE")]
    batch: Option<PathBuf>,

    /// Print JSON instead of a text summary
    #[arg(long, short = 'j')]
    json: bool,

    /// One line per result
    #[arg(long, conflicts_with = "json")]
    brief: bool,

    /// Markdown note per result
    #[arg(long, short = 'm', conflicts_with_all = ["json", "brief"])]
    markdown: bool,

    /// Attach up to N top-level comments
    #[arg(long, short = 'c', value_name = "N")]
    comments: Option<usize>,

    /// OCR + LLM reading of the post (needs GEMINI_API_KEY)
    #[arg(long)]
    analyze: bool,

    /// Save media files under DIR
    #[arg(long, short = 'd', value_name = "DIR")]
    download: Option<PathBuf>,

    /// Links extracted at once in batch mode
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Cookie file (default ~/.sharegrab/cookies.json)
    #[arg(long, value_name = "FILE")]
    cookies: Option<PathBuf>,

    /// HTTP or SOCKS5 proxy URL
    #[arg(long)]
    proxy: Option<String>,
}

impl Cli {
    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::from_env();
        if let Some(path) = &self.cookies {
            config = config.with_credentials_path(Some(path.clone()));
        }
        if let Some(proxy) = &self.proxy {
            config = config.with_proxy(Some(proxy.clone()));
        }
        if let Some(n) = self.concurrency {
            config = config.with_concurrency(n);
        }
        config
    }

    fn options(&self) -> ExtractOptions {
        let options = ExtractOptions::default().with_analysis(self.analyze);
        match self.comments {
            Some(n) => options.with_comments(n.min(MAX_COMMENTS)),
            None => options,
        }
    }

    fn render(&self, result: &ExtractResult) -> Result<String> {
        if self.json {
            output::to_json_pretty(result)
        } else {
            Ok(self.render_text(result))
        }
    }

    fn render_text(&self, result: &ExtractResult) -> String {
        if self.brief {
            output::brief(result)
        } else if self.markdown {
            output::markdown(result)
        } else {
            output::text_summary(result)
        }
    }
}

async fn download(engine: &Engine, result: &ExtractResult, dir: &Path) {
    match engine.download(result, dir).await {
        Ok(report) => eprintln!("{}", output::download_summary(&report)),
        Err(e) => eprintln!("download skipped: {}", e),
    }
}

async fn run_single(cli: &Cli, engine: &Engine, input: &str) -> Result<()> {
    let result = engine.extract(input, &cli.options()).await?;
    println!("{}", cli.render(&result)?);
    if let Some(dir) = &cli.download {
        download(engine, &result, dir).await;
    }
    Ok(())
}

async fn run_links_file(cli: &Cli, engine: Arc<Engine>, path: &Path, concurrency: usize) -> Result<bool> {
    let links = read_links(path)?;
    info!(links = links.len(), concurrency, "batch started");

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; finishing in-flight links");
            on_interrupt.cancel();
        }
    });

    let report = run_batch(&engine, links, &cli.options(), concurrency, &cancel).await;
    if cli.json {
        println!("{}", output::batch_json(&report)?);
    } else if cli.brief {
        println!("{}", output::batch_summary(&report));
    } else {
        println!("{}", output::batch_detail(&report, |result| cli.render_text(result)));
    }

    if let Some(dir) = &cli.download {
        for item in &report.items {
            if let ItemOutcome::Extracted(result) = &item.outcome {
                download(&engine, result, dir).await;
            }
        }
    }
    Ok(report.failed() == 0 && report.skipped() == 0)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.config();

    let engine = match Engine::new(&config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if cli.analyze && !engine.has_analyzer() {
        eprintln!("note: --analyze needs GEMINI_API_KEY or GOOGLE_API_KEY; analysis will be empty");
    }

    let outcome = match (&cli.batch, &cli.input) {
        (Some(path), _) => run_links_file(&cli, engine.clone(), path, config.concurrency).await,
        (None, Some(input)) => run_single(&cli, &engine, input).await.map(|_| true),
        (None, None) => Ok(false),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
