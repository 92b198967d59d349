use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{Oracle, OracleError};

/// Interval between checks on a running oracle process.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How to launch the legacy program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Executable to run. Empty means no oracle is configured.
    pub program: String,
    /// Leading arguments; days, miles and receipts are appended after them.
    pub args: Vec<String>,
    /// A question still unanswered after this long is killed and reported
    /// as unavailable.
    pub timeout_millis: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            timeout_millis: 10_000,
        }
    }
}

impl OracleConfig {
    pub fn is_configured(&self) -> bool {
        !self.program.trim().is_empty()
    }

    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.timeout_millis == 0 {
            problems.push("timeout_millis must be positive".to_string());
        }
        problems
    }
}

/// Runs the legacy program once per question and reads the amount from the
/// last non-empty line of its standard output.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    config: OracleConfig,
}

impl CommandOracle {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        if !config.is_configured() {
            return Err(OracleError::Unavailable {
                reason: "no oracle program configured".to_string(),
            });
        }
        if let Some(problem) = config.problems().into_iter().next() {
            return Err(OracleError::Unavailable { reason: problem });
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }
}

impl Oracle for CommandOracle {
    fn ask(&self, days: u32, miles: f64, receipts: f64) -> Result<f64, OracleError> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(days.to_string())
            .arg(miles.to_string())
            .arg(receipts.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        self.wait(&mut child)?;
        let output = child.wait_with_output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OracleError::Unavailable {
                reason: format!("{} exited with {}: {}", self.config.program, output.status, stderr.trim()),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("oracle({days}, {miles}, {receipts}) -> {:?}", stdout.trim());
        parse_amount(&stdout)
    }
}

impl CommandOracle {
    /// Wait for `child` to exit, killing it once the timeout passes.
    fn wait(&self, child: &mut Child) -> Result<(), OracleError> {
        let limit = Duration::from_millis(self.config.timeout_millis);
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return Ok(()),
                Ok(None) if started.elapsed() >= limit => {
                    reap(child);
                    return Err(OracleError::Unavailable {
                        reason: format!(
                            "{} timed out after {}ms",
                            self.config.program, self.config.timeout_millis
                        ),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    reap(child);
                    return Err(e.into());
                }
            }
        }
    }
}

fn reap(child: &mut Child) {
    // Either may fail if the process already exited; nothing is left to do.
    let _ = child.kill();
    let _ = child.wait();
}

/// The amount printed on the last non-empty line.
pub fn parse_amount(stdout: &str) -> Result<f64, OracleError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| OracleError::Malformed {
            output: stdout.to_string(),
        })?;
    match line.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(OracleError::Malformed {
            output: line.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_last_line() {
        assert_eq!(parse_amount("warming up\n380.50\n\n").unwrap(), 380.5);
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert!(matches!(parse_amount("n/a"), Err(OracleError::Malformed { .. })));
        assert!(matches!(parse_amount("  \n"), Err(OracleError::Malformed { .. })));
        assert!(matches!(parse_amount("inf"), Err(OracleError::Malformed { .. })));
    }

    #[test]
    fn test_unconfigured_is_unavailable() {
        let err = CommandOracle::new(OracleConfig::default()).unwrap_err();
        assert!(matches!(err, OracleError::Unavailable { .. }));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = OracleConfig {
            program: "legacy".to_string(),
            timeout_millis: 0,
            ..Default::default()
        };
        assert_eq!(config.problems().len(), 1);
        assert!(matches!(CommandOracle::new(config), Err(OracleError::Unavailable { .. })));
    }
}
