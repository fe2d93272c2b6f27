//! Catalog of conformance cases and the runner that executes them.
//!
//! A procedure returns `Err` when a fixture step the case depends on fails;
//! it panics (through `assert_status!` and friends) when the runtime under
//! test answers something other than what the contract requires. The runner
//! reports the former and never catches the latter.

mod agent;
mod executable;
mod init;
mod memory;
mod queue;
mod signal;

use crate::config::SuiteConfig;
use crate::runtime::SharedRuntime;
use crate::{HsaError, Result};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Everything a procedure may use: the runtime and the suite knobs.
#[derive(Clone)]
pub struct CaseEnv {
    pub runtime: SharedRuntime,
    pub config: SuiteConfig,
}

impl CaseEnv {
    pub fn new(runtime: SharedRuntime, config: SuiteConfig) -> Self {
        Self { runtime, config }
    }

    /// The configured wait timeout in timestamp ticks. Needs an open
    /// session.
    pub fn wait_ticks(&self) -> Result<u64> {
        let nanos = u64::try_from(self.config.wait_timeout.as_nanos()).unwrap_or(u64::MAX);
        Ok(self.runtime.system_info()?.ticks_from_nanos(nanos))
    }

    /// Skips the calling case unless the runtime answers stale and
    /// made-up handles without dereferencing them.
    pub fn require_forged_handle_checks(&self) -> Result<()> {
        if self.runtime.survives_forged_handles() {
            Ok(())
        } else {
            Err(HsaError::CaseSkipped(format!(
                "runtime {} dereferences forged handles",
                self.runtime.name()
            )))
        }
    }
}

pub type Procedure = fn(&CaseEnv) -> Result<()>;

#[derive(Clone, Copy)]
pub struct TestCase {
    pub suite: &'static str,
    pub name: &'static str,
    pub procedure: Procedure,
}

impl TestCase {
    pub const fn new(suite: &'static str, name: &'static str, procedure: Procedure) -> Self {
        Self {
            suite,
            name,
            procedure,
        }
    }

    pub fn id(&self) -> String {
        format!("{}::{}", self.suite, self.name)
    }

    pub fn run(&self, env: &CaseEnv) -> Outcome {
        match (self.procedure)(env) {
            Ok(()) => Outcome::Passed,
            Err(HsaError::CaseSkipped(reason)) => Outcome::Skipped(reason),
            Err(e) => Outcome::Failed(e),
        }
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("suite", &self.suite)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Outcome {
    Passed,
    Skipped(String),
    Failed(HsaError),
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }
}

#[derive(Debug, Default)]
pub struct Report {
    pub passed: Vec<String>,
    pub skipped: Vec<(String, String)>,
    pub failed: Vec<(String, HsaError)>,
    pub elapsed: Duration,
}

impl Report {
    pub fn total(&self) -> usize {
        self.passed.len() + self.skipped.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} passed, {} skipped, {} failed in {:.2?}",
            self.passed.len(),
            self.skipped.len(),
            self.failed.len(),
            self.elapsed
        )?;
        for (id, reason) in &self.skipped {
            writeln!(f, "  SKIPPED {id}: {reason}")?;
        }
        for (id, e) in &self.failed {
            writeln!(f, "  FAILED {id}: {e}")?;
        }
        Ok(())
    }
}

/// Every case, grouped by suite, in a stable order.
pub fn catalog() -> Vec<TestCase> {
    [
        init::CASES,
        agent::CASES,
        signal::CASES,
        memory::CASES,
        queue::CASES,
        executable::CASES,
    ]
    .concat()
}

pub fn suite(name: &str) -> Vec<TestCase> {
    catalog()
        .into_iter()
        .filter(|case| case.suite == name)
        .collect()
}

/// Runs every case whose id contains `filter`, each in an environment from
/// `make_env`.
pub fn run_cases<F>(mut make_env: F, filter: &str) -> Report
where
    F: FnMut() -> CaseEnv,
{
    let started = Instant::now();
    let mut report = Report::default();
    for case in catalog() {
        let id = case.id();
        if !id.contains(filter) {
            continue;
        }
        let env = make_env();
        info!(runtime = env.runtime.name(), "running {id}");
        match case.run(&env) {
            Outcome::Passed => report.passed.push(id),
            Outcome::Skipped(reason) => {
                warn!("{id} skipped: {reason}");
                report.skipped.push((id, reason));
            }
            Outcome::Failed(e) => {
                error!("{id} failed: {e}");
                report.failed.push((id, e));
            }
        }
    }
    report.elapsed = started.elapsed();
    report
}

/// Polls `check` until it yields a value or `timeout` passes.
pub(crate) fn poll_until<T>(
    timeout: Duration,
    mut check: impl FnMut() -> Result<Option<T>>,
) -> Result<Option<T>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check()? {
            return Ok(Some(value));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_micros(200));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn case_ids_are_unique() {
        let cases = catalog();
        let ids: HashSet<_> = cases.iter().map(TestCase::id).collect();
        assert_eq!(ids.len(), cases.len());
    }

    #[test]
    fn every_suite_has_cases() {
        for name in ["init", "agent", "signal", "memory", "queue", "executable"] {
            assert!(!suite(name).is_empty(), "suite {name} is empty");
        }
    }

    fn env() -> CaseEnv {
        use crate::soft::{SoftConfig, SoftRuntime};
        CaseEnv::new(
            SoftRuntime::shared(SoftConfig::default()),
            SuiteConfig::default(),
        )
    }

    fn skips(_: &CaseEnv) -> Result<()> {
        Err(HsaError::CaseSkipped("needs a device".to_string()))
    }

    fn fails(_: &CaseEnv) -> Result<()> {
        Err(HsaError::InvalidQueue("fixture queue missing".to_string()))
    }

    #[test]
    fn skipped_cases_are_neither_passed_nor_failed() {
        let env = env();
        match TestCase::new("unit", "skips", skips).run(&env) {
            Outcome::Skipped(reason) => assert_eq!(reason, "needs a device"),
            other => panic!("expected a skip, got {other:?}"),
        }

        let outcome = TestCase::new("unit", "fails", fails).run(&env);
        assert!(matches!(outcome, Outcome::Failed(HsaError::InvalidQueue(_))));
    }

    #[test]
    fn report_lists_skipped_cases() {
        let report = Report {
            passed: vec!["a::one".to_string()],
            skipped: vec![("a::two".to_string(), "needs a device".to_string())],
            ..Report::default()
        };
        assert_eq!(report.total(), 2);
        assert!(report.is_success());
        let text = report.to_string();
        assert!(text.starts_with("1 passed, 1 skipped, 0 failed"), "{text}");
        assert!(text.contains("SKIPPED a::two: needs a device"), "{text}");
    }

    #[test]
    fn soft_runtime_runs_forged_handle_cases() {
        assert!(env().require_forged_handle_checks().is_ok());
    }
}
