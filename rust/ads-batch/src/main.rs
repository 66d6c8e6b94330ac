//! ads-batch CLI.
//!
//! Usage:
//!   ads-batch --mode=batch  --p=2 --n-max=500 [--start=0] [--step=1] [--out-dir=data]
//!                           [--chunks=40] [--jobs=N] [--oracle=./ads_p] [--timeout-secs=N]
//!                           [--best-effort]
//!   ads-batch --mode=verify --p=2 --n-max=20 [--step=1] [--oracle=./ads_p] [--timeout-secs=N]
//!
//! Modes:
//!   batch   evaluate n = start+step, start+2*step, ... <= n-max in parallel and
//!           write data/ads_<p>_<n-max>_every_<step>.csv plus a JSON manifest
//!   verify  cross-check the oracle against brute-force enumeration
//!
//! Set RUST_LOG=debug to see every oracle invocation.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ads_batch::config::{self, BatchConfig, OracleConfig, VerifyConfig};
use ads_batch::oracle::CancelToken;
use ads_batch::pipeline;
use ads_batch::verify;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = parse_args(&args);

    let mode = opts.get("mode").map(|s| s.as_str()).unwrap_or("batch");

    let code = match mode {
        "batch" => run_batch_mode(&opts),
        "verify" => run_verify_mode(&opts),
        other => {
            eprintln!("Unknown mode: {other}. Use --mode=batch|verify");
            1
        }
    };
    std::process::exit(code);
}

fn batch_config(opts: &HashMap<String, String>) -> Result<BatchConfig, String> {
    let defaults = BatchConfig::default();
    Ok(BatchConfig {
        p: require(opts, "p")?,
        range_start: optional(opts, "start", defaults.range_start)?,
        n_max: require(opts, "n-max")?,
        step: optional(opts, "step", defaults.step)?,
        out_dir: opts
            .get("out-dir")
            .map(PathBuf::from)
            .unwrap_or(defaults.out_dir),
        num_chunks: optional(opts, "chunks", defaults.num_chunks)?,
        jobs: optional(opts, "jobs", config::default_jobs())?,
        oracle: oracle_config(opts)?,
        best_effort: opts.contains_key("best-effort"),
    })
}

fn verify_config(opts: &HashMap<String, String>) -> Result<VerifyConfig, String> {
    let defaults = VerifyConfig::default();
    Ok(VerifyConfig {
        p: require(opts, "p")?,
        n_max: optional(opts, "n-max", defaults.n_max)?,
        step: optional(opts, "step", defaults.step)?,
        oracle: oracle_config(opts)?,
    })
}

fn oracle_config(opts: &HashMap<String, String>) -> Result<OracleConfig, String> {
    let defaults = OracleConfig::default();
    let timeout = match opts.get("timeout-secs") {
        Some(_) => Some(Duration::from_secs(require(opts, "timeout-secs")?)),
        None => defaults.timeout,
    };
    Ok(OracleConfig {
        program: opts.get("oracle").map(PathBuf::from).unwrap_or(defaults.program),
        timeout,
    })
}

fn run_batch_mode(opts: &HashMap<String, String>) -> i32 {
    let config = match batch_config(opts) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{msg}");
            return 1;
        }
    };

    println!("========================================");
    println!("  ads-batch: |A+A| for A = {{ i * p^j }}");
    println!("========================================");
    println!("  p = {}, n in ({}, {}] step {}", config.p, config.range_start, config.n_max, config.step);
    println!("  {} chunks on {} workers, oracle {}", config.num_chunks, config.jobs, config.oracle.program.display());
    if config.best_effort {
        println!("  best-effort mode: failing n values are skipped and listed");
    }
    println!();

    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone());

    let result = pipeline::run_batch(&config, &cancel, |event| {
        println!(
            "{}% done, {:.1}s since start",
            event.percent(),
            event.elapsed.as_secs_f64()
        );
    });

    match result {
        Ok(report) => {
            println!();
            println!("Wrote {} rows to {}", report.outcome.rows.len(), report.csv_path.display());
            println!("Manifest: {}", report.manifest_path.display());
            if !report.outcome.missing.is_empty() {
                println!("Missing {} values of n:", report.outcome.missing.len());
                for m in &report.outcome.missing {
                    println!("  n={}: {}", m.n, m.reason);
                }
                return 2;
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("No output written.");
            1
        }
    }
}

fn run_verify_mode(opts: &HashMap<String, String>) -> i32 {
    let config = match verify_config(opts) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{msg}");
            return 1;
        }
    };

    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone());

    let results = match pipeline::run_verification(&config, &cancel) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    let mut stdout = std::io::stdout().lock();
    match verify::print_report(&mut stdout, config.p, &results) {
        Ok(summary) if summary.all_agree() => 0,
        Ok(_) => 2,
        Err(e) => {
            eprintln!("Error writing report: {e}");
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Interrupt handling
// ---------------------------------------------------------------------------

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Turn SIGINT/SIGTERM into a cancellation so in-flight oracle processes
/// (which run in their own process groups) get killed instead of orphaned.
fn install_interrupt_handler(cancel: CancelToken) {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGINT, on_interrupt as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_interrupt as libc::sighandler_t);
    }

    std::thread::spawn(move || loop {
        if INTERRUPTED.load(Ordering::SeqCst) {
            eprintln!("Interrupted, stopping workers...");
            cancel.cancel();
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    });
}

// ---------------------------------------------------------------------------
// Argument parsing helpers
// ---------------------------------------------------------------------------

fn parse_args(args: &[String]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for arg in args {
        if let Some(kv) = arg.strip_prefix("--") {
            if let Some((k, v)) = kv.split_once('=') {
                map.insert(k.to_string(), v.to_string());
            } else {
                map.insert(kv.to_string(), "true".to_string());
            }
        }
    }
    map
}

fn require<T>(opts: &HashMap<String, String>, key: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    match opts.get(key) {
        Some(v) => v.parse().map_err(|e| format!("Invalid --{key}={v}: {e}")),
        None => Err(format!("Missing required --{key}=<integer>")),
    }
}

/// Absent keys take `default`; present but malformed values are an error.
fn optional<T>(opts: &HashMap<String, String>, key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    match opts.get(key) {
        Some(_) => require(opts, key),
        None => Ok(default),
    }
}
