// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanpaper: command-line front-end to the document engine.
//
// Entry point. Initialises logging, loads the engine configuration, opens the
// session store behind a worker and submits one request per invocation.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use scanpaper_core::error::ScanpaperError;
use scanpaper_core::human_errors::humanize_error;
use scanpaper_core::types::PageId;
use scanpaper_document::{Direction, UnpaperOptions};
use scanpaper_engine::{
    DataItem, DeleteSelector, JobEvent, JobResult, PageOperation, PageQuery, RenumberSelection,
    Request, SplitDirection, Worker,
};

use services::data_dir;

#[derive(Debug, Parser)]
#[command(name = "scanpaper", version, about = "Edit a scanned document page by page")]
struct Cli {
    /// Session database to work on.
    #[arg(long, global = true)]
    session: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Append image files to the end of the document.
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the page order.
    List,
    /// Rotate a page clockwise.
    Rotate { page: u32, angle: f32 },
    /// Keep only the given region of a page.
    Crop {
        page: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    /// Cut a page in two; the second part follows the first.
    Split {
        page: u32,
        #[arg(value_enum)]
        direction: Cut,
        position: u32,
    },
    /// Binarise a page.
    Threshold {
        page: u32,
        #[arg(default_value_t = 128)]
        value: u8,
    },
    BrightnessContrast {
        page: u32,
        brightness: f32,
        contrast: f32,
    },
    /// Invert a page.
    Negate { page: u32 },
    /// Sharpen a page with an unsharp mask.
    Unsharp {
        page: u32,
        #[arg(long, default_value_t = 1.0)]
        radius: f32,
        #[arg(long, default_value_t = 150)]
        percent: u32,
        #[arg(long, default_value_t = 10)]
        threshold: u8,
    },
    /// Recognise text on a page.
    Ocr {
        page: u32,
        #[arg(long, default_value = "eng")]
        language: String,
    },
    /// Despeckle and deskew a page with unpaper.
    Unpaper {
        page: u32,
        /// Split a two-page spread into two pages.
        #[arg(long)]
        double: bool,
        /// Right-to-left reading order for split spreads.
        #[arg(long)]
        rtl: bool,
        /// Extra unpaper arguments.
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Run a shell command on a page (%i input, %o output, %r resolution).
    Run { page: u32, command: String },
    /// Delete pages by number.
    Delete {
        #[arg(required = true)]
        pages: Vec<u32>,
    },
    /// Give pages new numbers `start, start+step, ...` and reorder.
    Renumber {
        #[arg(long)]
        start: Option<i64>,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        step: i64,
        /// Pages to renumber; all when omitted.
        pages: Vec<u32>,
    },
    Undo,
    Redo,
    /// Cache per-channel statistics for pages; all when none are given.
    Analyse { pages: Vec<u32> },
    /// Show or write the engine configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Cut {
    Vertical,
    Horizontal,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
    /// Write the current configuration to the data directory.
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("scanpaper: {message}");
            ExitCode::FAILURE
        }
    }
}

fn human(err: ScanpaperError) -> String {
    humanize_error(&err).render()
}

async fn run(cli: Cli) -> Result<(), String> {
    let dir = data_dir::data_dir();
    let config = data_dir::load_config(&dir);

    if let Command::Config { action } = &cli.command {
        match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config).map_err(|e| human(e.into()))?;
                println!("{json}");
            }
            ConfigAction::Init => {
                let path = data_dir::save_config(&dir, &config).map_err(human)?;
                println!("wrote {}", path.display());
            }
        }
        return Ok(());
    }

    let session = cli.session.unwrap_or_else(data_dir::default_session);
    tracing::info!(session = %session.display(), "opening session");
    let worker = Worker::open(&session, &config).map_err(human)?;

    let result = dispatch(&worker, cli.command).await;
    worker.shutdown().map_err(human)?;
    result
}

async fn dispatch(worker: &Worker, command: Command) -> Result<(), String> {
    let request = match command {
        Command::Import { files } => {
            for path in files {
                submit(worker, Request::Import { path }).await?;
            }
            return list(worker).await;
        }
        Command::List => return list(worker).await,
        Command::Rotate { page, angle } => page_op(worker, page, PageOperation::Rotate { angle }).await?,
        Command::Crop { page, x, y, width, height } => {
            page_op(worker, page, PageOperation::Crop { x, y, width, height }).await?
        }
        Command::Split { page, direction, position } => {
            let direction = match direction {
                Cut::Vertical => SplitDirection::Vertical,
                Cut::Horizontal => SplitDirection::Horizontal,
            };
            page_op(worker, page, PageOperation::Split { direction, position }).await?
        }
        Command::Threshold { page, value } => {
            page_op(worker, page, PageOperation::Threshold { value }).await?
        }
        Command::BrightnessContrast { page, brightness, contrast } => {
            page_op(worker, page, PageOperation::BrightnessContrast { brightness, contrast }).await?
        }
        Command::Negate { page } => page_op(worker, page, PageOperation::Negate).await?,
        Command::Unsharp { page, radius, percent, threshold } => {
            page_op(worker, page, PageOperation::Unsharp { radius, percent, threshold }).await?
        }
        Command::Ocr { page, language } => {
            page_op(worker, page, PageOperation::TesseractOcr { language }).await?
        }
        Command::Unpaper { page, double, rtl, args } => {
            let options = UnpaperOptions {
                args,
                output_pages: if double { 2 } else { 1 },
                direction: if rtl { Direction::Rtl } else { Direction::Ltr },
            };
            page_op(worker, page, PageOperation::Unpaper { options }).await?
        }
        Command::Run { page, command } => {
            page_op(worker, page, PageOperation::UserDefined { command }).await?
        }
        Command::Delete { pages } => Request::Delete(DeleteSelector::Numbers(pages)),
        Command::Renumber { start, step, pages } => Request::Renumber {
            start,
            step,
            selection: if pages.is_empty() {
                RenumberSelection::All
            } else {
                RenumberSelection::Selected(pages)
            },
        },
        Command::Undo => Request::Undo,
        Command::Redo => Request::Redo,
        Command::Analyse { pages } => {
            let numbers = if pages.is_empty() {
                let result = submit(worker, Request::Pages).await?;
                result.pages.iter().map(|e| e.number).collect()
            } else {
                pages
            };
            let mut ids = Vec::with_capacity(numbers.len());
            for number in numbers {
                ids.push(page_id(worker, number).await?);
            }
            Request::Analyse { pages: ids }
        }
        Command::Config { .. } => return Ok(()),
    };

    let result = submit(worker, request).await?;
    print_order(&result);
    Ok(())
}

async fn page_op(worker: &Worker, number: u32, op: PageOperation) -> Result<Request, String> {
    Ok(Request::Page {
        page: page_id(worker, number).await?,
        op,
    })
}

async fn page_id(worker: &Worker, number: u32) -> Result<PageId, String> {
    let mut handle = worker
        .submit(Request::GetPage(PageQuery::Number(number)))
        .map_err(human)?;
    let mut found = None;
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Data(DataItem::Page { page, .. }) => found = Some(page.id),
            JobEvent::Error(message) => return Err(message),
            _ => {}
        }
    }
    found.ok_or_else(|| format!("page {number} could not be read"))
}

/// Submit a request and report its events until it ends.
async fn submit(worker: &Worker, request: Request) -> Result<JobResult, String> {
    let name = request.name();
    let mut handle = worker.submit(request).map_err(human)?;
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Progress { num_completed_jobs, total_jobs } if total_jobs > 1 => {
                eprintln!("{name}: {num_completed_jobs}/{total_jobs}");
            }
            JobEvent::Data(item) => report(&item),
            JobEvent::Finished(result) => return Ok(result),
            JobEvent::Error(message) => return Err(message),
            _ => {}
        }
    }
    Err(format!("{name} was cancelled"))
}

fn report(item: &DataItem) {
    match item {
        DataItem::Page { page, number, .. } => {
            println!("page {number}: {}x{} {:?} ({})", page.width, page.height, page.format, page.id)
        }
        DataItem::Analysis { page, analysis } => {
            let mean: Vec<String> = analysis.mean.iter().map(|m| format!("{m:.1}")).collect();
            let std_dev: Vec<String> = analysis.std_dev.iter().map(|s| format!("{s:.1}")).collect();
            println!("{page}: mean [{}] std dev [{}]", mean.join(", "), std_dev.join(", "));
        }
        DataItem::PageError { page, message } => eprintln!("{page}: {message}"),
        DataItem::Message(message) => eprintln!("{message}"),
    }
}

async fn list(worker: &Worker) -> Result<(), String> {
    let result = submit(worker, Request::Pages).await?;
    for entry in &result.pages {
        println!("{:>4}  {}", entry.number, entry.page_id);
    }
    print_order(&result);
    Ok(())
}

fn print_order(result: &JobResult) {
    println!("{} page(s)", result.pages.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn negative_step_parses() {
        let cli = Cli::try_parse_from(["scanpaper", "renumber", "--start", "5", "--step", "-1"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Command::Renumber { start: Some(5), step: -1, ref pages } if pages.is_empty()
        ));
    }

    #[test]
    fn unpaper_passes_trailing_args() {
        let cli = Cli::try_parse_from(["scanpaper", "unpaper", "2", "--double", "--", "--no-deskew"])
            .expect("parse");
        match cli.command {
            Command::Unpaper { page, double, rtl, args } => {
                assert_eq!((page, double, rtl), (2, true, false));
                assert_eq!(args, ["--no-deskew"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
