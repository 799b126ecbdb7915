use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use folio_core::{
    Book, BookConfig, BookEvent, BookEventReceiver, Frame, PageMode, PageSortMode, ReadOrder,
    SenderId,
};
use folio_render::{book_root, DirectoryPageSupplier, ImageDecodeScheduler, MemoryBudget};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "folio",
    version,
    about = "Page through a directory of images from the command line"
)]
struct Args {
    /// Directory of images, or a single image
    path: PathBuf,

    /// Page to open on (0-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Settings file; defaults to config.toml in the platform config dir
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Show two pages per frame
    #[arg(long)]
    wide: bool,

    /// Read left to right instead of right to left
    #[arg(long)]
    left_to_right: bool,

    /// Pages to decode ahead of the view
    #[arg(long)]
    prefetch: Option<usize>,

    /// Initial sort mode, e.g. file-name or time-stamp-descending
    #[arg(long)]
    sort: Option<PageSortMode>,

    /// Decoded page budget in MiB
    #[arg(long, default_value_t = 256)]
    memory_mb: usize,

    /// Decode threads
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "folio", "folio")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;
    let config = load_config(&args, &project_dirs.config_dir().join("config.toml"))?;

    let budget = Arc::new(MemoryBudget::new(args.memory_mb.max(1) * 1024 * 1024));
    let decoder = Arc::new(ImageDecodeScheduler::new(
        book_root(&args.path),
        Arc::clone(&budget),
        args.threads,
    )?);
    let (book, events) = Book::open(
        &args.path,
        &DirectoryPageSupplier::new(),
        decoder,
        budget,
        config,
    )
    .await
    .with_context(|| format!("failed to open {:?}", args.path))?;
    info!(id = %book.id(), "reading {}", args.path.display());

    let printer = tokio::spawn(print_events(events, args.json));

    match args.page {
        Some(page) => book.jump_page(SenderId::USER, page),
        None => book.first_page(SenderId::USER),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match handle_line(&book, line.trim()) {
            Ok(LoopAction::Continue) => {}
            Ok(LoopAction::Quit) => break,
            Err(err) => eprintln!("{err:#}"),
        }
    }

    book.dispose().await;
    printer.abort();
    Ok(())
}

enum LoopAction {
    Continue,
    Quit,
}

fn handle_line(book: &Book, line: &str) -> Result<LoopAction> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(LoopAction::Continue);
    };
    let argument = words.next();
    let sender = SenderId::USER;
    match command {
        "n" | "next" => {
            book.next_page(sender);
        }
        "p" | "prev" => {
            book.prev_page(sender);
        }
        "n1" => {
            book.next_one_page(sender);
        }
        "p1" => {
            book.prev_one_page(sender);
        }
        "first" => {
            book.first_page(sender);
        }
        "last" => {
            book.last_page(sender);
        }
        "jump" | "j" => {
            let index: usize = argument
                .context("usage: jump <page>")?
                .parse()
                .context("page must be a number")?;
            book.jump_page(sender, index);
        }
        "sort" => {
            let mode: PageSortMode = argument
                .context("usage: sort <mode>")?
                .parse()
                .map_err(|err: String| anyhow!(err))?;
            book.sort(sender, mode);
        }
        "mark" => match book.toggle_marker() {
            Some(marked) => println!("marker {}", if marked { "set" } else { "cleared" }),
            None => bail!("nothing displayed to mark"),
        },
        "nextmark" => {
            book.next_marked_page(sender, false, true);
        }
        "prevmark" => {
            book.prev_marked_page(sender, false, true);
        }
        "remove" => {
            let frame = book.current_frame().context("nothing displayed to remove")?;
            book.remove(sender, frame.pages().cloned().collect());
        }
        "refresh" => {
            book.refresh(sender);
        }
        "q" | "quit" => return Ok(LoopAction::Quit),
        other => bail!("unknown command `{other}`"),
    }
    Ok(LoopAction::Continue)
}

async fn print_events(mut events: BookEventReceiver, as_json: bool) {
    while let Some(event) = events.recv().await {
        if as_json {
            println!("{}", event_json(&event));
        } else {
            println!("{}", event_text(&event));
        }
    }
}

fn frame_names(frame: &Frame) -> Vec<String> {
    frame.pages().map(|page| page.name().to_string()).collect()
}

fn event_text(event: &BookEvent) -> String {
    match event {
        BookEvent::ViewContentsChanged { sender, frame } => {
            if frame.is_empty() {
                format!("view [{sender}] (empty book)")
            } else {
                format!(
                    "view [{sender}] {} {}",
                    frame.range(),
                    frame_names(frame).join(" | ")
                )
            }
        }
        BookEvent::NextContentsChanged { sender, frame, .. } => {
            format!("ready [{sender}] {}", frame.range())
        }
        BookEvent::PageTerminated { sender, direction } => {
            format!("end [{sender}] {direction}")
        }
        BookEvent::PagesSorted { mode } => format!("sorted {mode}"),
        BookEvent::PagesRemoved { pages } => format!("removed {}", pages.len()),
    }
}

fn event_json(event: &BookEvent) -> serde_json::Value {
    match event {
        BookEvent::ViewContentsChanged { sender, frame } => json!({
            "event": "view",
            "sender": sender.to_string(),
            "range": frame.range(),
            "pages": frame_names(frame),
        }),
        BookEvent::NextContentsChanged { sender, frame, .. } => json!({
            "event": "next",
            "sender": sender.to_string(),
            "range": frame.range(),
            "pages": frame_names(frame),
        }),
        BookEvent::PageTerminated { sender, direction } => json!({
            "event": "terminated",
            "sender": sender.to_string(),
            "direction": direction.sign(),
        }),
        BookEvent::PagesSorted { mode } => json!({ "event": "sorted", "mode": mode }),
        BookEvent::PagesRemoved { pages } => json!({
            "event": "removed",
            "pages": pages.iter().map(|page| page.name().to_string()).collect::<Vec<_>>(),
        }),
    }
}

/// Settings from `--config`, else from `default_path` when present, with the
/// command-line overrides applied on top.
fn load_config(args: &Args, default_path: &Path) -> Result<BookConfig> {
    let mut config = match args.config.as_deref() {
        Some(path) => read_config(path)?,
        None if default_path.exists() => read_config(default_path)?,
        None => BookConfig::default(),
    };
    if args.wide {
        config.page_mode = PageMode::WidePage;
    }
    if args.left_to_right {
        config.read_order = ReadOrder::LeftToRight;
    }
    if let Some(prefetch) = args.prefetch {
        config.prefetch_size = prefetch;
    }
    if let Some(sort) = args.sort {
        config.sort_mode = sort;
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<BookConfig> {
    let config = BookConfig::load(path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    info!(path = %path.display(), "loaded settings");
    Ok(config)
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "folio.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{PageDirection, PagePosition, PageRange};

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["folio", "book"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn overrides_apply_on_top_of_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.toml");
        fs::write(&settings, "prefetch_size = 9\nread_order = \"left-to-right\"\n").unwrap();

        let parsed = args(&["--config", settings.to_str().unwrap(), "--wide", "--sort", "size"]);
        let config = load_config(&parsed, &dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.page_mode, PageMode::WidePage);
        assert_eq!(config.read_order, ReadOrder::LeftToRight);
        assert_eq!(config.prefetch_size, 9);
        assert_eq!(config.sort_mode, PageSortMode::Size);
    }

    #[test]
    fn broken_settings_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.toml");
        fs::write(&settings, "prefetch_size = \"many\"").unwrap();
        let parsed = args(&["--config", settings.to_str().unwrap()]);
        assert!(load_config(&parsed, &dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn defaults_without_any_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&args(&[]), &dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, BookConfig::default());
    }

    #[test]
    fn termination_events_render_direction() {
        let event = BookEvent::PageTerminated {
            sender: SenderId::USER,
            direction: PageDirection::Backward,
        };
        assert_eq!(event_text(&event), "end [user] -1");
        assert_eq!(event_json(&event)["direction"], -1);
    }

    #[test]
    fn empty_view_renders_as_empty_book() {
        let frame = Frame::empty(PageRange::at(PagePosition::ZERO, PageDirection::Forward));
        let event = BookEvent::ViewContentsChanged {
            sender: SenderId::BOOK,
            frame,
        };
        assert_eq!(event_text(&event), "view [book] (empty book)");
        assert_eq!(event_json(&event)["pages"], json!([]));
    }
}
