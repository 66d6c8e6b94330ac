//! Result sink: CSV artifact with a fixed header.
//!
//!   n,|A|,|A+A|,delta,dup_density
//!
//! Integer columns are written exactly. `delta` and `dup_density` are
//! narrowed from their exact rationals to `f64` here and nowhere else,
//! printed with Rust's shortest round-trip formatting.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use num_bigint::BigUint;

use crate::stats::ResultRow;

pub const HEADER: [&str; 5] = ["n", "|A|", "|A+A|", "delta", "dup_density"];

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: unexpected header {found:?}")]
    Header { path: PathBuf, found: String },

    #[error("{path}:{line}: {detail}")]
    Row {
        path: PathBuf,
        line: usize,
        detail: String,
    },
}

/// A row read back from an artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub n: u64,
    pub a_size: BigUint,
    pub aa_size: BigUint,
    pub delta: f64,
    pub dup_density: f64,
}

/// Deterministic artifact name for a run: `ads_<p>_<n_max>_every_<step>.csv`.
pub fn artifact_name(p: u64, n_max: u64, step: u64) -> String {
    format!("ads_{}_{}_every_{}.csv", p, n_max, step)
}

/// Render rows as CSV text, in the order given.
pub fn render(rows: &[ResultRow]) -> String {
    let mut out = String::with_capacity(32 * (rows.len() + 1));
    out.push_str(&HEADER.join(","));
    out.push('\n');
    for row in rows {
        let _ = writeln!(
            out,
            "{},{},{},{},{}",
            row.n,
            row.a_size,
            row.aa_size,
            row.delta_f64(),
            row.dup_density_f64()
        );
    }
    out
}

/// Write rows to `path`, replacing any existing file.
pub fn write(rows: &[ResultRow], path: &Path) -> Result<(), SinkError> {
    let io_err = |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    std::fs::write(path, render(rows)).map_err(io_err)?;

    log::info!("wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Read an artifact written by [`write`].
pub fn read(path: &Path) -> Result<Vec<StoredRow>, SinkError> {
    let text = std::fs::read_to_string(path).map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text, path)
}

fn parse(text: &str, path: &Path) -> Result<Vec<StoredRow>, SinkError> {
    let mut lines = text.lines().enumerate();

    let header = lines.next().map(|(_, l)| l.trim()).unwrap_or("");
    let expected = HEADER.join(",");
    if header != expected {
        return Err(SinkError::Header {
            path: path.to_path_buf(),
            found: header.to_string(),
        });
    }

    let mut rows = Vec::new();
    for (idx, line) in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row_err = |detail: String| SinkError::Row {
            path: path.to_path_buf(),
            line: idx + 1,
            detail,
        };

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != HEADER.len() {
            return Err(row_err(format!(
                "expected {} fields, got {}",
                HEADER.len(),
                fields.len()
            )));
        }

        rows.push(StoredRow {
            n: fields[0].parse().map_err(|e| row_err(format!("n: {e}")))?,
            a_size: fields[1].parse().map_err(|e| row_err(format!("|A|: {e}")))?,
            aa_size: fields[2].parse().map_err(|e| row_err(format!("|A+A|: {e}")))?,
            delta: fields[3].parse().map_err(|e| row_err(format!("delta: {e}")))?,
            dup_density: fields[4]
                .parse()
                .map_err(|e| row_err(format!("dup_density: {e}")))?,
        });
    }
    Ok(rows)
}
