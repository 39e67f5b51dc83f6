//! `analyze-gaps`: find untracked stretches in DJ set timelines.
//!
//! Reads one analysis input object, or an array of them, and writes the
//! matching analysis (gaps, suggestions, coverage, confidence) as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use setlist_reconcile::gaps::{analyze_sets, GapConfig};
use setlist_reconcile::models::SetAnalysisInput;
use setlist_reconcile::progress::{create_spinner, format_duration, init_logging, set_log_only};
use setlist_reconcile::safety::validate_output_path;
use setlist_reconcile::scoring::SuggestionWeights;
use setlist_reconcile::suggest::DurationFit;

#[derive(Parser, Debug)]
#[command(name = "analyze-gaps")]
#[command(about = "Detect timeline gaps in DJ sets and suggest likely tracks")]
struct Args {
    /// Input JSON file; reads stdin when omitted or "-"
    input: Option<PathBuf>,

    /// Write results here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Rayon worker threads (0 = all cores)
    #[arg(long, default_value = "0")]
    workers: usize,

    /// Ignore gaps shorter than this many seconds
    #[arg(long)]
    min_gap_secs: Option<f64>,

    #[arg(long)]
    pretty: bool,

    /// Hide the spinner
    #[arg(long)]
    log_only: bool,
}

fn read_input(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(p) if p.as_os_str() != "-" => {
            std::fs::read_to_string(p).with_context(|| format!("Failed to read {}", p.display()))
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

/// Accepts a single input object or an array of them.
fn parse_inputs(raw: &str) -> Result<(Vec<SetAnalysisInput>, bool)> {
    let value: Value = serde_json::from_str(raw).context("Input is not valid JSON")?;
    if value.is_array() {
        let inputs = serde_json::from_value(value).context("Invalid set analysis input array")?;
        Ok((inputs, true))
    } else {
        let input = serde_json::from_value(value).context("Invalid set analysis input")?;
        Ok((vec![input], false))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    set_log_only(args.log_only);

    if let Some(output) = &args.output {
        let sources: Vec<&std::path::Path> = args.input.iter().map(|p| p.as_path()).collect();
        validate_output_path(output, &sources)?;
    }

    if args.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    let (inputs, was_array) = parse_inputs(&read_input(args.input.as_ref())?)?;

    let mut config = GapConfig::default();
    if let Some(min_gap) = args.min_gap_secs {
        config.min_gap = min_gap;
    }
    let weights = SuggestionWeights::default();
    let fit = DurationFit::default();

    let start = Instant::now();
    let spinner = create_spinner(&format!("Analyzing {} set(s)", inputs.len()));
    let analyses = analyze_sets(&inputs, &config, &weights, &fit);
    spinner.finish_and_clear();

    let gap_total: usize = analyses.iter().map(|a| a.gaps.len()).sum();
    info!(
        sets = analyses.len(),
        gaps = gap_total,
        elapsed = %format_duration(start.elapsed()),
        "Analysis complete"
    );

    let json = match (was_array, args.pretty) {
        (true, true) => serde_json::to_string_pretty(&analyses)?,
        (true, false) => serde_json::to_string(&analyses)?,
        (false, pretty) => {
            let single = analyses.first().context("No analysis produced")?;
            if pretty {
                serde_json::to_string_pretty(single)?
            } else {
                serde_json::to_string(single)?
            }
        }
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Wrote analysis");
        }
        None => println!("{}", json),
    }
    Ok(())
}
