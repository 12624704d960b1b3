//! simulate-logs: synthetic CP log generator for pipeline testing
//!
//! Writes tab-separated tester logs in the same shape real probers emit
//! (lot/wafer header, No.U parameter row, LimitU/LimitL rows, one data row
//! per site). Values follow plausible distributions in raw instrument
//! units, with a configurable fraction of gross outliers and dead sites so
//! cleaning has something to find.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal, Normal};
use tracing::info;

use cp_analyzer::error::{AnalyzerError, Result};

#[derive(Parser, Debug)]
#[command(name = "simulate-logs", about = "Generate synthetic CP test logs", version)]
struct CliArgs {
    /// Directory receiving one folder of logs per batch
    #[arg(long, value_name = "DIR", default_value = "data")]
    output_dir: PathBuf,

    /// Number of batches (lots) to generate
    #[arg(long, default_value = "2")]
    batches: usize,

    /// Wafers per batch
    #[arg(long, default_value = "3")]
    wafers: usize,

    /// Probed sites per wafer
    #[arg(long, default_value = "120")]
    sites: usize,

    /// Fraction of sites given a gross outlier on one parameter
    #[arg(long, default_value = "0.02")]
    outlier_fraction: f64,

    /// RNG seed for reproducible datasets
    #[arg(long, default_value = "42")]
    seed: u64,
}

const PARAMS: &[&str] = &[
    "BVDSS1", "BVDSS2", "DELTABV", "IDSS1", "VTH", "RDSON1", "VFSDS", "IGSS2", "IGSSR2", "IDSS2",
    "IDSS3",
];

const LIMIT_U_ROW: &str =
    "LimitU\t900.0V\t900.0V\t50.0V\t250nA\t4.0V\t365.0mOHM\t1.0V\t300nA\t300nA\t250nA\t250uA";
const LIMIT_L_ROW: &str =
    "LimitL\t660.0V\t660.0V\t-10.0V\t0.0nA\t3.0V\t100.0mOHM\t0.0V\t0.0nA\t0.0nA\t0.0nA\t0.0uA";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let files = run(&args)?;
    info!(files, dir = %args.output_dir.display(), "synthetic logs written");
    Ok(())
}

fn run(args: &CliArgs) -> Result<usize> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut files = 0usize;

    for batch in 0..args.batches {
        let lot = format!("FA{}-{}", 50 + batch, 3000 + rng.gen_range(0..1000));
        let batch_dir = args.output_dir.join(&lot);
        fs::create_dir_all(&batch_dir).map_err(|e| AnalyzerError::io(&batch_dir, e))?;

        for wafer in 1..=args.wafers {
            let text = render_log(&lot, wafer, args.sites, args.outlier_fraction, &mut rng);
            let path = batch_dir.join(format!("{lot}_{wafer}.TXT"));
            fs::write(&path, text).map_err(|e| AnalyzerError::io(&path, e))?;
            files += 1;
        }
        info!(lot = %lot, wafers = args.wafers, "batch generated");
    }
    Ok(files)
}

/// One complete log file for one wafer.
fn render_log(lot: &str, wafer: usize, sites: usize, outlier_fraction: f64, rng: &mut StdRng) -> String {
    let sampler = Sampler::new();
    let mut out = String::new();

    let _ = writeln!(out, "Test program\tPMOS650-CP");
    let _ = writeln!(out, "Lot number\t{lot}");
    let _ = writeln!(out, "Wafer number\t{wafer}");
    let _ = writeln!(out, "Test date\t2026-08-30");
    let _ = writeln!(out, "No.U\t{}", PARAMS.join("\t"));
    let _ = writeln!(out, "{LIMIT_U_ROW}");
    let _ = writeln!(out, "{LIMIT_L_ROW}");

    for site in 1..=sites {
        let mut values = sampler.site_values(rng);
        if rng.gen_bool(outlier_fraction) {
            // One gross outlier on a random parameter: an order of
            // magnitude off, the classic probe-contact failure signature.
            let idx = rng.gen_range(0..values.len());
            values[idx] *= 10.0;
        }

        let mut row = site.to_string();
        for value in values {
            if rng.gen_bool(0.005) {
                // Dead site cell.
                row.push_str("\t999.9");
            } else {
                let _ = write!(row, "\t{value:.6E}");
            }
        }
        let _ = writeln!(out, "{row}");
    }
    out
}

/// Per-parameter distributions, in raw instrument units (V, A, Ohm).
struct Sampler {
    bvdss: Normal<f64>,
    deltabv: Normal<f64>,
    vth: Normal<f64>,
    rdson: Normal<f64>,
    vfsds: Normal<f64>,
    leak_na: LogNormal<f64>,
    leak_ua: LogNormal<f64>,
}

impl Sampler {
    #[allow(clippy::unwrap_used)] // constants are valid distribution params
    fn new() -> Self {
        // Parameters chosen so nominal values sit comfortably in spec:
        // leakage medians around 1 nA / 1 uA, RDSON around 250 mOhm.
        Self {
            bvdss: Normal::new(740.0, 15.0).unwrap(),
            deltabv: Normal::new(1.0, 0.5).unwrap(),
            vth: Normal::new(3.5, 0.12).unwrap(),
            rdson: Normal::new(0.25, 0.02).unwrap(),
            vfsds: Normal::new(0.7, 0.05).unwrap(),
            leak_na: LogNormal::new((1e-9f64).ln(), 0.5).unwrap(),
            leak_ua: LogNormal::new((1e-6f64).ln(), 0.5).unwrap(),
        }
    }

    /// Values in `PARAMS` order.
    fn site_values(&self, rng: &mut StdRng) -> Vec<f64> {
        vec![
            self.bvdss.sample(rng),
            self.bvdss.sample(rng),
            self.deltabv.sample(rng),
            self.leak_na.sample(rng),
            self.vth.sample(rng),
            self.rdson.sample(rng),
            self.vfsds.sample(rng),
            self.leak_na.sample(rng),
            self.leak_na.sample(rng),
            self.leak_na.sample(rng),
            self.leak_ua.sample(rng),
        ]
    }
}
