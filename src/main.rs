// Entry point and high-level CLI flow.
//
// With a subcommand the binary runs one report and exits. Without one it
// falls back to the numbered menu:
// - Option [1] loads the efficiency CSV and prints diagnostics.
// - Options [2]-[4] list hospitals and build the individual or consolidated
//   report; the dataset is loaded once and reused until the file changes.
// - Option [5] sends a free-form prompt to Gemini.
mod aggregate;
mod config;
mod error;
mod format;
mod loader;
mod merge;
mod narrative;
mod output;
mod reports;
mod types;
mod util;
mod view;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use format::{format_change, format_count, format_pt_br};
use loader::{DatasetCache, LoadReport};
use narrative::{GeminiClient, NarrativeRequester};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use types::Period;
use view::Dataset;

#[derive(Parser)]
#[command(name = "eficiencia")]
#[command(about = "Hospital efficiency dashboard (DEA scores per CNES and month)")]
#[command(version)]
struct Args {
    /// Efficiency CSV (default: $EFICIENCIA_DATA or resultado_eficiencia.csv)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the hospitals present in the dataset
    Hospitals,
    /// Indicators, monthly table and optional AI analysis for one hospital
    Individual {
        /// Hospital CNES code
        #[arg(long)]
        cnes: String,

        /// First month (YYYYMM, MM/YYYY or YYYY-MM)
        #[arg(long)]
        start: Option<Period>,

        /// Last month
        #[arg(long)]
        end: Option<Period>,

        /// Request the Gemini narrative analysis
        #[arg(long)]
        narrative: bool,

        /// Write the filtered rows to this CSV
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Monthly aggregates and distribution over every hospital
    Consolidated {
        #[arg(long)]
        start: Option<Period>,

        #[arg(long)]
        end: Option<Period>,

        /// Directory for the exported CSV and JSON files (default: .)
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Merge raw monthly extracts into one efficiency CSV
    Merge {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,
    },
    /// Send a raw prompt to Gemini (connectivity check)
    Ask { prompt: String },
}

/// Per-process state: the dataset cache and the narrative memo.
struct App {
    data_path: PathBuf,
    cache: DatasetCache,
    narrator: NarrativeRequester<GeminiClient>,
}

impl App {
    fn new(config: Config) -> Self {
        let temperature = config.gemini.as_ref().and_then(|g| g.temperature);
        let client = config.gemini.as_ref().and_then(|g| match GeminiClient::new(g) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "Gemini client unavailable");
                None
            }
        });
        App {
            data_path: config.data_path,
            cache: DatasetCache::new(),
            narrator: NarrativeRequester::new(client, temperature),
        }
    }

    /// Load through the cache; the first successful load prints its report.
    fn dataset(&mut self) -> Result<(Dataset, LoadReport)> {
        let first_load = !self.cache.is_loaded();
        let (dataset, report) = self
            .cache
            .get_or_load(&self.data_path)
            .with_context(|| format!("failed to load {}", self.data_path.display()))?;
        if first_load {
            print_load_report(&report);
        }
        Ok((dataset, report))
    }
}

fn print_load_report(report: &LoadReport) {
    let range = match (report.first_period, report.last_period) {
        (Some(first), Some(last)) => format!("{} to {}", first, last),
        _ => "no periods".to_string(),
    };
    println!(
        "Dataset loaded: {} records, {} hospitals ({})",
        format_count(report.total_rows),
        format_count(report.hospitals),
        range
    );
    if report.total_unknown() > 0 {
        let detail: Vec<String> = report
            .unknown_values
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(column, n)| format!("{} {}", column, format_count(*n)))
            .collect();
        println!(
            "Note: {} unknown values ({}).",
            format_count(report.total_unknown()),
            detail.join(", ")
        );
    }
    println!();
}

fn handle_load(app: &mut App) -> Result<()> {
    let was_loaded = app.cache.is_loaded();
    let (dataset, report) = app.dataset()?;
    if was_loaded {
        print_load_report(&report);
    }
    if dataset.is_empty() {
        println!("Warning: the file has no data rows.\n");
    }
    Ok(())
}

fn handle_hospitals(app: &mut App) -> Result<()> {
    let (dataset, _) = app.dataset()?;
    let ids = dataset.hospital_ids();
    println!("{} hospitals:", format_count(ids.len()));
    for id in ids {
        println!("  {}", id);
    }
    println!();
    Ok(())
}

fn handle_individual(
    app: &mut App,
    cnes: &str,
    start: Option<Period>,
    end: Option<Period>,
    with_narrative: bool,
    export: Option<&Path>,
) -> Result<()> {
    let (dataset, _) = app.dataset()?;
    let cnes = util::zero_pad_cnes(cnes);
    if !dataset.contains_hospital(&cnes) {
        bail!("CNES {} not found in {}", cnes, app.data_path.display());
    }

    let view = dataset.filter(&cnes, start, end);
    if view.is_empty() {
        println!("No records for CNES {} in the selected period.\n", cnes);
        return Ok(());
    }
    let (Some(kpis), Some((range_start, range_end))) = (reports::hospital_kpis(&view), view.range())
    else {
        return Ok(());
    };

    let narrator = &mut app.narrator;
    let records = view.records();
    let hospital_id = cnes.as_str();
    let narrative = std::thread::scope(|s| {
        let pending = if with_narrative {
            Some(s.spawn(move || narrator.request(hospital_id, range_start, range_end, records)))
        } else {
            None
        };

        println!("Hospital CNES {} ({} to {})\n", cnes, range_start, range_end);
        println!("Latest month: {}", kpis.period);
        println!(
            "  Efficiency: {} ({} vs previous month)",
            format_pt_br(kpis.efficiency, 4, ""),
            format_change(kpis.efficiency_change_pct)
        );
        println!(
            "  Production: {} ({} vs previous month)",
            format_pt_br(kpis.production, 2, "R$ "),
            format_change(kpis.production_change_pct)
        );
        println!(
            "  Production-weighted efficiency over {} months: {}",
            format_count(kpis.months),
            format_pt_br(kpis.weighted_efficiency, 4, "")
        );
        let note = format!("{} months", format_count(view.len()));
        output::preview_table(
            "Monthly indicators",
            Some(&note),
            &format::record_rows(records),
            usize::MAX,
        );

        pending.map(|handle| {
            handle.join().unwrap_or_else(|_| {
                Err(error::DashboardError::ServiceUnavailable(
                    "narrative worker panicked".to_string(),
                ))
            })
        })
    });

    if let Some(path) = export {
        output::write_csv(path, &format::record_rows(records))
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("(Full table exported to {})\n", path.display());
    }

    match narrative {
        Some(Ok(text)) => println!("AI analysis:\n{}\n", text.trim()),
        Some(Err(e)) if e.is_service_error() => println!("AI analysis unavailable: {}\n", e),
        Some(Err(e)) => println!("AI analysis failed: {}\n", e),
        None => {}
    }
    Ok(())
}

fn handle_consolidated(
    app: &mut App,
    start: Option<Period>,
    end: Option<Period>,
    out_dir: &Path,
) -> Result<()> {
    let (dataset, _) = app.dataset()?;
    let view = dataset.filter_period(start, end);
    let Some(summary) = reports::consolidated_summary(&view) else {
        println!("No records in the selected period.\n");
        return Ok(());
    };

    println!("Consolidated analysis ({} to {})\n", summary.first_period, summary.last_period);
    println!(
        "  Records: {}  Hospitals: {}",
        format_count(summary.total_records),
        format_count(summary.total_hospitals)
    );
    println!("  Mean efficiency: {}", format_pt_br(summary.simple_mean, 4, ""));
    println!(
        "  Production-weighted efficiency: {}",
        format_pt_br(summary.weighted_mean, 4, "")
    );

    let monthly = format::monthly_rows(&aggregate::monthly_aggregate(view.records()));
    let distribution = format::distribution_rows(&aggregate::monthly_distribution(view.records()));

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let monthly_file = out_dir.join("consolidated_monthly.csv");
    let distribution_file = out_dir.join("consolidated_distribution.csv");
    let summary_file = out_dir.join("summary.json");
    output::write_csv(&monthly_file, &monthly)?;
    output::write_csv(&distribution_file, &distribution)?;
    output::write_json(&summary_file, &summary)?;

    output::preview_table(
        "Monthly efficiency",
        Some("simple and production-weighted means"),
        &monthly,
        12,
    );
    println!("(Full table exported to {})\n", monthly_file.display());
    output::preview_table(
        "Efficiency distribution",
        Some("per month, across hospitals"),
        &distribution,
        12,
    );
    println!("(Full table exported to {})\n", distribution_file.display());
    println!("Summary saved to {}\n", summary_file.display());
    Ok(())
}

fn handle_merge(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let report = merge::merge_csv_files(inputs, output)?;
    for skipped in &report.files_skipped {
        println!("Skipped unreadable file: {}", skipped.display());
    }
    if !report.written {
        bail!("no input file could be read; {} was not written", output.display());
    }
    println!(
        "Merged {} files ({} rows, {} columns) into {}",
        format_count(report.files_read),
        format_count(report.rows_written),
        report.columns.len(),
        output.display()
    );
    Ok(())
}

fn handle_ask(app: &App, prompt: &str) -> Result<()> {
    let answer = app.narrator.ask(prompt)?;
    println!("{}", answer.trim());
    Ok(())
}

/// Read a single line of input after printing `prompt`.
fn read_input(prompt: &str) -> String {
    print!("{}", prompt);
    let _ = io::stdout().flush();
    let mut buf = String::new();
    io::stdin().read_line(&mut buf).ok();
    buf.trim().to_string()
}

/// Blank input means "open bound".
fn read_period(prompt: &str) -> Result<Option<Period>> {
    let input = read_input(prompt);
    if input.is_empty() {
        return Ok(None);
    }
    Ok(Some(input.parse()?))
}

/// Ask the user whether to go back to the menu after a report.
///
/// Returns `true` if the user chose `Y`, `false` if they chose `N`.
fn prompt_back_to_menu() -> bool {
    loop {
        match read_input("Back to Report Selection (Y/N): ").to_uppercase().as_str() {
            "Y" => return true,
            "N" => return false,
            _ => println!("Invalid choice. Please enter Y or N."),
        }
    }
}

fn menu_individual(app: &mut App) -> Result<()> {
    let cnes = read_input("CNES: ");
    if cnes.is_empty() {
        bail!("no CNES given");
    }
    let start = read_period("Start month (blank for first): ")?;
    let end = read_period("End month (blank for last): ")?;
    let narrative = app.narrator.is_enabled()
        && read_input("Request AI analysis? (Y/N): ").eq_ignore_ascii_case("y");
    println!();
    handle_individual(app, &cnes, start, end, narrative, None)
}

fn menu_consolidated(app: &mut App) -> Result<()> {
    let start = read_period("Start month (blank for first): ")?;
    let end = read_period("End month (blank for last): ")?;
    println!();
    handle_consolidated(app, start, end, Path::new("."))
}

fn run_menu(app: &mut App) {
    loop {
        println!("Hospital Efficiency Dashboard");
        println!("[1] Load the file");
        println!("[2] List hospitals");
        println!("[3] Individual report");
        println!("[4] Consolidated report");
        println!("[5] Ask Gemini");
        println!("[0] Exit\n");
        let result = match read_input("Enter choice: ").as_str() {
            "1" => handle_load(app),
            "2" => handle_hospitals(app),
            "3" => menu_individual(app),
            "4" => menu_consolidated(app),
            "5" => {
                let prompt = read_input("Prompt: ");
                handle_ask(app, &prompt)
            }
            "0" => {
                println!("Exiting the program.");
                break;
            }
            _ => {
                println!("Invalid choice. Please enter 0-5.\n");
                continue;
            }
        };
        if let Err(e) = result {
            eprintln!("Error: {:#}\n", e);
            continue;
        }
        if !prompt_back_to_menu() {
            println!("Exiting the program.");
            break;
        }
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(path) = args.data {
        config.data_path = path;
    }
    info!(data = %config.data_path.display(), narrative = config.gemini.is_some(), "starting");
    let mut app = App::new(config);

    match args.command {
        None => {
            run_menu(&mut app);
            Ok(())
        }
        Some(Commands::Hospitals) => handle_hospitals(&mut app),
        Some(Commands::Individual { cnes, start, end, narrative, export }) => {
            handle_individual(&mut app, &cnes, start, end, narrative, export.as_deref())
        }
        Some(Commands::Consolidated { start, end, out_dir }) => {
            handle_consolidated(&mut app, start, end, &out_dir)
        }
        Some(Commands::Merge { inputs, output }) => handle_merge(&inputs, &output),
        Some(Commands::Ask { prompt }) => handle_ask(&app, &prompt),
    }
}
