//! Fires concurrent requests at one contention strategy and shows what
//! happened to the table.
//!
//! Run with:
//! ```bash
//! cargo run --example race --features demo -- --help
//! cargo run --example race --features demo -- none --callers 2
//! cargo run --example race --features demo -- /asyncio-lock --processes 2
//! ```
//!
//! Set `RUST_LOG=contesa=debug` to follow every allocation.

use clap::{Parser, ValueEnum};
use contesa::config::{Config, DEFAULT_LANE_CAPACITY};
use contesa::dispatcher::Dispatcher;
use contesa::render::{TableRenderer, TableStyle};
use contesa::response::Response;
use contesa::stats::StatsSnapshot;
use contesa::store::{CounterRow, Isolation, MemoryStore, RowStore};
use contesa::strategy::StrategyKind;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Output format for rows and statistics.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Pretty ASCII tables
    Table,
    /// JSON documents
    Json,
}

/// Table style selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum StyleChoice {
    Ascii,
    #[default]
    Rounded,
    Sharp,
    Markdown,
    Blank,
}

impl From<StyleChoice> for TableStyle {
    fn from(choice: StyleChoice) -> Self {
        match choice {
            StyleChoice::Ascii => TableStyle::Ascii,
            StyleChoice::Rounded => TableStyle::Rounded,
            StyleChoice::Sharp => TableStyle::Sharp,
            StyleChoice::Markdown => TableStyle::Markdown,
            StyleChoice::Blank => TableStyle::Blank,
        }
    }
}

/// Isolation level of the in-memory store.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum IsolationChoice {
    #[default]
    ReadCommitted,
    RepeatableRead,
}

impl From<IsolationChoice> for Isolation {
    fn from(choice: IsolationChoice) -> Self {
        match choice {
            IsolationChoice::ReadCommitted => Isolation::ReadCommitted,
            IsolationChoice::RepeatableRead => Isolation::RepeatableRead,
        }
    }
}

/// Race demo for contesa - contention strategies over a shared counter table.
///
/// Starts one or more dispatchers ("processes") over a single in-memory
/// table, releases all callers at once and reports each response.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Strategy name or route (none, row-lock-nowait, /for-update, /sync, ...)
    #[arg(value_parser = parse_kind)]
    strategy: StrategyKind,

    /// Number of concurrent callers
    #[arg(short, long, default_value = "2")]
    callers: usize,

    /// Number of dispatchers sharing the table; callers are spread round-robin
    #[arg(short, long, default_value = "1")]
    processes: usize,

    /// Stall between read and write, in milliseconds
    #[arg(long, default_value = "500")]
    stall_ms: u64,

    /// Store isolation level
    #[arg(long, value_enum, default_value = "read-committed")]
    isolation: IsolationChoice,

    /// Serial lane queue capacity
    #[arg(long, default_value_t = DEFAULT_LANE_CAPACITY)]
    lane_capacity: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Table style (for table format)
    #[arg(short, long, value_enum, default_value = "rounded")]
    style: StyleChoice,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,

    /// Also print per-strategy outcome statistics
    #[arg(long)]
    stats: bool,
}

fn parse_kind(s: &str) -> Result<StrategyKind, String> {
    s.parse().map_err(|e: contesa::error::Error| e.to_string())
}

/// Releases all callers together and collects `(caller, process, response)`.
fn fire(
    dispatchers: &[Dispatcher],
    kind: StrategyKind,
    callers: usize,
) -> Vec<(usize, usize, contesa::error::Result<Response>)> {
    let barrier = Barrier::new(callers);
    thread::scope(|s| {
        let handles: Vec<_> = (0..callers)
            .map(|caller| {
                let process = caller % dispatchers.len();
                let dispatcher = &dispatchers[process];
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    (caller, process, dispatcher.respond(kind))
                })
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| handle.join().ok())
            .collect()
    })
}

fn render_rows(args: &Args, rows: &[CounterRow]) -> String {
    match args.format {
        OutputFormat::Table => TableRenderer::new()
            .with_style(args.style.into())
            .with_title("rows")
            .render_rows(rows),
        OutputFormat::Json => {
            let json = if args.pretty {
                serde_json::to_string_pretty(rows)
            } else {
                serde_json::to_string(rows)
            };
            json.unwrap_or_else(|e| format!("Error: {}", e))
        }
    }
}

fn render_stats(args: &Args, stats: &StatsSnapshot) -> String {
    match args.format {
        OutputFormat::Table => TableRenderer::new()
            .with_style(args.style.into())
            .with_title("outcomes")
            .render_stats(stats),
        OutputFormat::Json => stats
            .to_json(args.pretty)
            .unwrap_or_else(|e| format!("Error: {}", e)),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let callers = args.callers.max(1);
    let processes = args.processes.max(1);

    let store: Arc<dyn RowStore> =
        Arc::new(MemoryStore::new().with_isolation(args.isolation.into()));
    let config = Config::new()
        .with_stall(Duration::from_millis(args.stall_ms))
        .with_lane_capacity(args.lane_capacity);
    let dispatchers: Vec<Dispatcher> = (0..processes)
        .map(|_| Dispatcher::new(Arc::clone(&store), config.clone()))
        .collect();

    eprintln!(
        "Firing {} callers at {} across {} process(es)...",
        callers, args.strategy, processes
    );
    let start = Instant::now();
    let mut results = fire(&dispatchers, args.strategy, callers);
    results.sort_by_key(|(caller, _, _)| *caller);
    eprintln!("Done in {:?}.\n", start.elapsed());

    for (caller, process, result) in &results {
        match result {
            Ok(response) => println!(
                "caller {caller} (process {process}): {}",
                response
                    .to_json()
                    .unwrap_or_else(|e| format!("Error: {}", e))
            ),
            Err(err) => println!("caller {caller} (process {process}): error: {err}"),
        }
    }
    println!();

    match store.list_rows() {
        Ok(rows) => println!("{}", render_rows(&args, &rows)),
        Err(err) => eprintln!("could not list rows: {err}"),
    }

    if args.stats {
        for (process, dispatcher) in dispatchers.iter().enumerate() {
            println!("\nprocess {process}");
            println!("{}", render_stats(&args, &dispatcher.stats()));
        }
    }
}
