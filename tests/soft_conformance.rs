//! The whole catalog against the reference runtime, one test per suite.

use hsa_cts::SuiteConfig;
use hsa_cts::conformance::{self, CaseEnv};
use hsa_cts::soft::{SoftConfig, SoftRuntime};
use std::time::Duration;

fn suite_config() -> SuiteConfig {
    SuiteConfig::default()
        .with_threads(6)
        .with_iterations(8)
        .with_wait_timeout(Duration::from_secs(10))
}

fn run_suite(name: &str) {
    let config = suite_config();
    let report = conformance::run_cases(
        || CaseEnv::new(SoftRuntime::shared(SoftConfig::default()), config.clone()),
        &format!("{name}::"),
    );
    assert_eq!(
        report.total(),
        conformance::suite(name).len(),
        "filter missed cases"
    );
    assert!(report.is_success(), "{report}");
    assert!(report.skipped.is_empty(), "{report}");
}

#[test]
fn init_suite() {
    run_suite("init");
}

#[test]
fn agent_suite() {
    run_suite("agent");
}

#[test]
fn signal_suite() {
    run_suite("signal");
}

#[test]
fn memory_suite() {
    run_suite("memory");
}

#[test]
fn queue_suite() {
    run_suite("queue");
}

#[test]
fn executable_suite() {
    run_suite("executable");
}

#[test]
fn catalog_passes_with_many_agents() {
    let config = suite_config().with_iterations(2);
    let report = conformance::run_cases(
        || {
            let soft = SoftConfig::default().with_cpu_agents(2).with_gpu_agents(3);
            CaseEnv::new(SoftRuntime::shared(soft), config.clone())
        },
        "",
    );
    assert_eq!(report.total(), conformance::catalog().len());
    assert!(report.is_success(), "{report}");
    assert!(report.skipped.is_empty(), "{report}");
}
