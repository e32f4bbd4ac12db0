//! cellstress command line
//!
//! `train` learns and freezes the signature and calibrator artifacts from
//! simulation. `run` executes a plate assignment against frozen artifacts
//! and writes per-well results plus the decision event log.

use cellstress::batch::{load_assignments, BatchRunner};
use cellstress::calibration::CalibratorArtifact;
use cellstress::core::error::Result;
use cellstress::core::LabConfig;
use cellstress::inference::SignatureSet;
use cellstress::pipeline::Pipeline;
use cellstress::simulation::BiologyTable;
use cellstress::training::train_all;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "cellstress=info";

#[derive(Parser, Debug)]
#[command(name = "cellstress")]
#[command(about = "Simulate stressed cell cultures and call their mechanism of action")]
struct Cli {
    /// Lab configuration (TOML)
    #[arg(long, default_value = "data/lab.toml")]
    config: PathBuf,

    /// Compound and cell-line table (TOML)
    #[arg(long, default_value = "data/biology.toml")]
    biology: PathBuf,

    /// Override the configured base seed
    #[arg(long)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Learn signatures and the calibrator, then write both artifacts
    Train {
        /// Output directory for artifacts and the gate report
        #[arg(long, default_value = "artifacts")]
        out: PathBuf,

        /// Version label prefix
        #[arg(long, default_value = "v1")]
        label: String,
    },

    /// Run a plate assignment against frozen artifacts
    Run {
        /// Plate assignment (JSON array of wells)
        #[arg(long)]
        plate: PathBuf,

        #[arg(long, default_value = "artifacts/signatures.json")]
        signatures: PathBuf,

        #[arg(long, default_value = "artifacts/calibrator.json")]
        calibrator: PathBuf,

        /// Per-well result records (JSON)
        #[arg(long, default_value = "results.json")]
        results: PathBuf,

        /// Decision event log (TSV)
        #[arg(long, default_value = "decisions.tsv")]
        decisions: PathBuf,
    },
}

/// `RUST_LOG` when set and parseable, `cellstress=info` otherwise
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let cli = Cli::parse();
    let mut config = LabConfig::load(&cli.config)?;
    if let Some(seed) = cli.seed {
        config.base_seed = seed;
    }
    let biology = BiologyTable::load(&cli.biology)?;

    match cli.command {
        Command::Train { out, label } => {
            fs::create_dir_all(&out)?;
            let report = train_all(&config, &biology, &label)?;
            report.signatures.save_json(&out.join("signatures.json"))?;
            report.calibrator.save_json(&out.join("calibrator.json"))?;
            fs::write(out.join("gate_report.json"), serde_json::to_string_pretty(&report.gate)?)?;

            println!("signatures: {}", report.signatures.version);
            println!("calibrator: {}", report.calibrator.version);
            println!(
                "samples:    {} train / {} held out ({} without posterior)",
                report.train_samples, report.holdout_samples, report.skipped
            );
            println!(
                "ECE:        {:.4} (threshold {:.2}) {}",
                report.gate.ece,
                report.gate.ece_threshold,
                if report.gate.ece_passed { "PASS" } else { "FAIL" }
            );
            println!(
                "high-nuisance stratum: confidence {:.4} vs accuracy {:.4} {}",
                report.gate.high_nuisance_mean_confidence,
                report.gate.high_nuisance_accuracy,
                if report.gate.conservative { "PASS" } else { "FAIL" }
            );
        }
        Command::Run {
            plate,
            signatures,
            calibrator,
            results,
            decisions,
        } => {
            let signatures = SignatureSet::load_json(&signatures)?;
            let calibrator = CalibratorArtifact::load_json(&calibrator)?;
            let pipeline = Pipeline::new(&config, biology, signatures, calibrator)?;
            let assignments = load_assignments(&plate)?;

            let report = BatchRunner::new(&pipeline).run(&assignments);
            report.save_json(&results)?;
            report.log.write_tsv(&decisions)?;

            println!(
                "{} wells: {} committed, {} budget exhausted ({} inference unavailable), {} failed",
                report.summary.wells,
                report.summary.committed,
                report.summary.budget_exhausted,
                report.summary.inference_unavailable,
                report.summary.failed
            );
        }
    }

    Ok(())
}
