//! Cardinality oracle client.
//!
//! The fast oracle is an external program invoked as `<program> <p> <n>`.
//! It prints progress chatter and, somewhere in its stdout, a record
//!
//!   <n>, <|A|>, <|A+A|>
//!
//! whose leading field equals the requested `n`. This module:
//! 1. Spawns the program in its own process group
//! 2. Polls it, killing the group on timeout or cancellation
//! 3. Scans stdout for the matching record
//! 4. Returns a `CardinalityPair` or a typed `OracleError`

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use num_bigint::BigUint;

use crate::config::OracleConfig;
use crate::{CardinalityPair, ParamPair};

/// Errors from a single oracle query.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    #[error("oracle program not found at {0}")]
    NotFound(PathBuf),

    #[error("oracle exited with status {status:?}: {diagnostic}")]
    Execution {
        status: Option<i32>,
        diagnostic: String,
    },

    #[error("could not parse oracle output for n={n}: {detail}")]
    Parse { n: u64, detail: String },

    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("oracle call cancelled")]
    Cancelled,

    #[error("IO error talking to oracle: {0}")]
    Io(String),
}

/// Shared cancellation flag. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Anything that can produce exact `(|A|, |A+A|)` for a parameter pair.
pub trait CardinalityOracle: Send + Sync {
    fn query(&self, pair: ParamPair, cancel: &CancelToken) -> Result<CardinalityPair, OracleError>;

    /// Short label for logs and reports.
    fn describe(&self) -> String;
}

/// The production oracle: an external executable.
#[derive(Debug, Clone)]
pub struct SubprocessOracle {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl SubprocessOracle {
    pub fn new(config: &OracleConfig) -> Self {
        SubprocessOracle {
            program: config.program.clone(),
            timeout: config.timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Fail early with `NotFound` if the program path does not exist.
    ///
    /// Bare names (no directory component) are left to `PATH` lookup at
    /// spawn time.
    pub fn validate(&self) -> Result<(), OracleError> {
        let has_dir = self
            .program
            .parent()
            .is_some_and(|parent| !parent.as_os_str().is_empty());
        if has_dir && !self.program.exists() {
            return Err(OracleError::NotFound(self.program.clone()));
        }
        Ok(())
    }

    fn spawn(&self, pair: ParamPair) -> Result<Child, OracleError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(pair.p.to_string())
            .arg(pair.n.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so a kill takes any helpers down with it
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        log::debug!("oracle: {} {} {}", self.program.display(), pair.p, pair.n);

        cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OracleError::NotFound(self.program.clone()),
            _ => OracleError::Io(e.to_string()),
        })
    }
}

impl CardinalityOracle for SubprocessOracle {
    fn query(&self, pair: ParamPair, cancel: &CancelToken) -> Result<CardinalityPair, OracleError> {
        if cancel.is_cancelled() {
            return Err(OracleError::Cancelled);
        }

        let start = Instant::now();
        let mut child = self.spawn(pair)?;

        // Drain both pipes on their own threads so a chatty oracle can't
        // block on a full pipe while we poll.
        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let mut poll_interval = Duration::from_millis(1);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if cancel.is_cancelled() {
                        kill_group(&mut child);
                        return Err(OracleError::Cancelled);
                    }
                    if let Some(timeout) = self.timeout {
                        if start.elapsed() > timeout {
                            log::warn!("oracle timed out on p={} n={}, killing", pair.p, pair.n);
                            kill_group(&mut child);
                            return Err(OracleError::Timeout(timeout));
                        }
                    }
                    std::thread::sleep(poll_interval);
                    poll_interval = (poll_interval * 2).min(Duration::from_millis(50));
                }
                Err(e) => {
                    kill_group(&mut child);
                    return Err(OracleError::Io(e.to_string()));
                }
            }
        };

        let stdout = join_reader(stdout_reader)?;
        let stderr = join_reader(stderr_reader)?;

        log::debug!(
            "oracle p={} n={} finished in {:.3}s ({} bytes stdout)",
            pair.p,
            pair.n,
            start.elapsed().as_secs_f64(),
            stdout.len()
        );

        if !status.success() {
            let diagnostic = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(OracleError::Execution {
                status: status.code(),
                diagnostic,
            });
        }

        parse_oracle_output(&stdout, pair.n)
    }

    fn describe(&self) -> String {
        self.program.display().to_string()
    }
}

/// Find the `<n>, <|A|>, <|A+A|>` record for `n` in the oracle's stdout.
///
/// Lines whose leading field is not exactly `n` (progress output, the
/// column header, records for other `n`) are skipped. The first matching
/// record wins.
pub fn parse_oracle_output(stdout: &str, n: u64) -> Result<CardinalityPair, OracleError> {
    let wanted = n.to_string();

    for line in stdout.lines() {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.first() != Some(&wanted.as_str()) {
            continue;
        }
        if fields.len() != 3 {
            return Err(OracleError::Parse {
                n,
                detail: format!("expected 3 fields, got {} in {:?}", fields.len(), line),
            });
        }
        let a_size = parse_count(fields[1], n, "|A|")?;
        let aa_size = parse_count(fields[2], n, "|A+A|")?;
        return Ok(CardinalityPair { a_size, aa_size });
    }

    Err(OracleError::Parse {
        n,
        detail: "no output line with matching leading n".to_string(),
    })
}

fn parse_count(field: &str, n: u64, what: &str) -> Result<BigUint, OracleError> {
    field.parse::<BigUint>().map_err(|e| OracleError::Parse {
        n,
        detail: format!("{} field {:?}: {}", what, field, e),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<std::io::Result<String>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).into_owned())
        })
    })
}

/// Output of a drain thread. A failed read is an `Io` error, never a
/// truncated string.
fn join_reader(reader: Option<JoinHandle<std::io::Result<String>>>) -> Result<String, OracleError> {
    let Some(handle) = reader else {
        return Ok(String::new());
    };
    match handle.join() {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(OracleError::Io(format!("reading oracle output: {}", e))),
        Err(_) => Err(OracleError::Io("oracle output reader panicked".to_string())),
    }
}

/// Kill the child's whole process group and reap it.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        let pgid = child.id() as libc::pid_t;
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }
    let _ = child.wait();
}
