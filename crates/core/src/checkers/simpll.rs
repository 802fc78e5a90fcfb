use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::compare::{
    CheckOutcome, CheckRequest, CheckerError, EquivalenceChecker, Severity, Verdict,
};
use crate::patterns::ParseFailure;
use crate::process::{run_with_deadline, tail, RunError, Waited};

/// Report file used instead of running the binary; lets tests run without simpll installed.
pub const FAKE_REPORT_ENV: &str = "SEMDIFF_SIMPLL_FAKE_REPORT";

const STDERR_TAIL: usize = 20;

/// Checker that shells out to the external `simpll` tool.
///
/// simpll receives both modules, the function names and the enabled patterns,
/// and prints a YAML report on stdout:
///
/// ```yaml
/// result: not-equal
/// diff: |
///   ...
/// message: optional detail
/// simplified: [old.ll, new.ll]
/// ```
#[derive(Debug, Clone, Default)]
pub struct SimpllChecker {
    binary: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Report {
    result: String,
    #[serde(default)]
    diff: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    simplified: Vec<PathBuf>,
}

impl SimpllChecker {
    pub fn new(binary: Option<PathBuf>) -> Self {
        Self { binary }
    }

    fn binary(&self) -> Result<&Path, CheckerError> {
        self.binary.as_deref().ok_or_else(|| {
            CheckerError::Unavailable("no simpll binary configured (set SEMDIFF_SIMPLL)".into())
        })
    }
}

impl EquivalenceChecker for SimpllChecker {
    fn name(&self) -> &'static str {
        "simpll"
    }

    fn ensure_available(&self) -> Result<(), CheckerError> {
        if std::env::var_os(FAKE_REPORT_ENV).is_some() {
            return Ok(());
        }
        let binary = self.binary()?;
        if binary.is_file() {
            return Ok(());
        }
        match Command::new(binary).arg("--version").output() {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(CheckerError::Unavailable(format!(
                "{} --version exited with {}",
                binary.display(),
                output.status
            ))),
            Err(e) => {
                Err(CheckerError::Unavailable(format!("cannot run {}: {e}", binary.display())))
            }
        }
    }

    fn check(&self, request: &CheckRequest) -> Result<CheckOutcome, CheckerError> {
        if let Some(fake) = std::env::var_os(FAKE_REPORT_ENV) {
            let path = PathBuf::from(fake);
            let body = fs::read_to_string(&path)
                .map_err(|e| CheckerError::Io { path: path.clone(), message: e.to_string() })?;
            return Ok(parse_report(&body));
        }

        let binary = self.binary()?;
        debug!(function = %request.old.name, "running simpll");
        let mut command = Command::new(binary);
        command.args(command_args(request));
        let finished = match run_with_deadline(&mut command, request.timeout) {
            Ok(Waited::Finished(finished)) => finished,
            Ok(Waited::TimedOut) => {
                warn!(function = %request.old.name, "simpll timed out");
                return Ok(CheckOutcome::new(Verdict::Timeout));
            }
            Err(RunError::Spawn(e)) => {
                return Ok(CheckOutcome::new(Verdict::InternalError {
                    severity: Severity::Error,
                    message: format!("failed to spawn {}: {e}", binary.display()),
                }))
            }
            Err(e) => return Err(CheckerError::Failed(format!("running simpll: {e}"))),
        };

        if !finished.status.success() {
            return Ok(CheckOutcome::new(Verdict::InternalError {
                severity: Severity::Error,
                message: format!(
                    "simpll exited with {}: {}",
                    finished.status,
                    tail(&finished.stderr, STDERR_TAIL)
                ),
            }));
        }
        Ok(parse_report(&finished.stdout))
    }
}

/// Arguments passed to simpll for one request.
pub fn command_args(request: &CheckRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        request.old.module.clone().into(),
        request.new.module.clone().into(),
        "--fun".into(),
        request.old.name.clone().into(),
    ];
    if request.new.name != request.old.name {
        args.push("--new-fun".into());
        args.push(request.new.name.clone().into());
    }
    if let Some(var) = &request.old.glob_var {
        args.push("--var".into());
        args.push(var.into());
    }
    args.push("--patterns".into());
    args.push(request.patterns.set.to_string().into());
    for custom in &request.patterns.custom {
        args.push("--custom-pattern".into());
        args.push(custom.clone().into());
    }
    if request.patterns.on_parse_failure == ParseFailure::Error {
        args.push("--fail-on-pattern-error".into());
    }
    if request.control_flow_only {
        args.push("--control-flow-only".into());
    }
    if let Some(dir) = &request.emit_ir {
        args.push("--output-llvm-ir".into());
        args.push(dir.clone().into());
    }
    args
}

/// Map a simpll report to an outcome. An unreadable report is an
/// `Unknown` internal error, never a difference.
pub fn parse_report(body: &str) -> CheckOutcome {
    let report: Report = match serde_yaml::from_str(body) {
        Ok(report) => report,
        Err(e) => {
            return CheckOutcome::new(Verdict::InternalError {
                severity: Severity::Unknown,
                message: format!("unparsable simpll report: {e}"),
            })
        }
    };
    let detail = |fallback: &str| report.message.clone().unwrap_or_else(|| fallback.to_string());
    let verdict = match report.result.as_str() {
        "equal" => Verdict::Equal,
        "not-equal" => Verdict::Different { diff: report.diff.clone().unwrap_or_default() },
        "timeout" => Verdict::Timeout,
        "error" => Verdict::InternalError {
            severity: Severity::Error,
            message: detail("simpll reported an error"),
        },
        "unknown" => Verdict::InternalError {
            severity: Severity::Unknown,
            message: detail("simpll could not decide"),
        },
        other => Verdict::InternalError {
            severity: Severity::Unknown,
            message: format!("unexpected simpll result '{other}'"),
        },
    };
    CheckOutcome::new(verdict).with_artifacts(report.simplified)
}
