use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use chargeback::{
    aggregation::Granularity,
    config::ChargebackConfig,
    db::{
        DbPool,
        memory::{Fixture, MemoryStore},
    },
    fields::FieldRegistry,
    models::EntityKind,
    observability::init_tracing,
    pricing::microdollars_to_dollars,
    report::{Report, ReportOptions},
    services::ChargebackService,
};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(version, about = "Chargeback cost reports", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a report over fixture data
    Report(ReportArgs),
    /// Validate a configuration file and its rate catalog
    Check {
        /// Path to config file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct ReportArgs {
    /// Path to config file
    #[arg(short, long)]
    config: PathBuf,

    /// JSON fixture with entities, tags, samples and assignments
    #[arg(short, long)]
    fixture: PathBuf,

    /// JSON file with report options; flags below override it
    #[arg(short, long)]
    options: Option<PathBuf>,

    #[arg(long)]
    interval: Option<Granularity>,

    /// IANA time zone for interval boundaries
    #[arg(long)]
    tz: Option<String>,

    /// Tag categories to group by (repeatable)
    #[arg(long)]
    groupby_tag: Vec<String>,

    /// Only bill entities carrying one of these tags (repeatable)
    #[arg(long)]
    tag: Vec<String>,

    #[arg(long)]
    entity_kind: Option<EntityKind>,

    #[arg(long)]
    entity_id: Option<Uuid>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Report(report) => run_report(report).await,
        Command::Check { config } => run_check(&config),
    }
}

fn load_config(path: &Path) -> ChargebackConfig {
    match ChargebackConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn run_check(path: &Path) {
    let config = load_config(path);
    match config.build_catalog() {
        Ok((fields, catalog)) => {
            println!(
                "Configuration OK: {} fields, {} rates, {} assignments",
                fields.len(),
                catalog.len(),
                config.assignments.len()
            );
            for name in catalog.names() {
                println!("  rate {name}");
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn report_options(args: &ReportArgs) -> Result<ReportOptions, String> {
    let mut options = match &args.options {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read options {}: {e}", path.display()))?;
            serde_json::from_str(&json)
                .map_err(|e| format!("Failed to parse options {}: {e}", path.display()))?
        }
        None => ReportOptions::default(),
    };

    if let Some(interval) = args.interval {
        options.interval = interval;
    }
    if let Some(tz) = &args.tz {
        options.ext_options.tz = Some(tz.clone());
    }
    if !args.groupby_tag.is_empty() {
        options.groupby_tag = args.groupby_tag.clone();
    }
    if !args.tag.is_empty() {
        options.tag = args.tag.clone();
    }
    if let Some(kind) = args.entity_kind {
        options.entity_kind = kind;
    }
    if args.entity_id.is_some() {
        options.entity_id = args.entity_id;
    }
    Ok(options)
}

async fn run_report(args: ReportArgs) {
    let config = load_config(&args.config);
    if let Err(e) = init_tracing(&config.observability.logging) {
        eprintln!("Warning: {e}");
    }

    let options = match report_options(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let store = MemoryStore::new();
    let loaded = config
        .rate_assignments()
        .map_err(|e| e.to_string())
        .map(|assignments| assignments.into_iter().for_each(|a| store.add_assignment(a)))
        .and_then(|()| {
            Fixture::from_file(&args.fixture)
                .and_then(|fixture| fixture.load_into(&store))
                .map_err(|e| format!("Failed to load fixture {}: {e}", args.fixture.display()))
        });
    if let Err(e) = loaded {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    let db = Arc::new(DbPool::in_memory(Arc::new(store)));
    let service = match ChargebackService::from_config(db, &config) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling report");
                cancel.cancel();
            }
        }
    });

    let report = match service.build_report_with_cancel(&options, cancel).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    match args.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        },
        OutputFormat::Table => print!("{}", render_table(&report, service.fields())),
    }
}

/// Plain-text table: one line per row, `metric / $cost` per field.
fn render_table(report: &Report, fields: &FieldRegistry) -> String {
    let columns = Report::columns(fields);
    let mut out = String::new();

    let _ = write!(out, "{:<24} {:<20}", "group", "interval");
    for column in &columns {
        let _ = write!(out, " {:>24}", column.as_str());
    }
    let _ = writeln!(out, " {:>12}", "total");

    for row in &report.rows {
        let _ = write!(out, "{:<24} {:<20}", row.group.label, row.interval.label);
        for column in &columns {
            let cell = format!(
                "{:.2} / ${:.2}",
                row.metric(column.as_str()),
                row.cost_dollars(column.as_str())
            );
            let _ = write!(out, " {cell:>24}");
        }
        let _ = writeln!(out, " {:>12}", format!("${:.2}", microdollars_to_dollars(row.total_cost)));
    }

    let _ = writeln!(
        out,
        "{} rows, {} entities billed, {} without rate, {} filtered, total ${:.2}",
        report.rows.len(),
        report.stats.entities_billed,
        report.stats.entities_without_rate,
        report.stats.entities_filtered,
        microdollars_to_dollars(report.total_cost())
    );
    out
}
