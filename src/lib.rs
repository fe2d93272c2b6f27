//! Conformance suite for HSA runtime implementations
//!
//! The suite drives a runtime through the [`Runtime`] trait: life cycle,
//! agent and region enumeration, signals and waits, memory, queues with
//! packet processing, and executables. Every case asserts on the status
//! codes the HSA runtime API documents.
//!
//! [`soft::SoftRuntime`] is an in-process reference runtime so the catalog
//! runs without an accelerator. With the `system-hsa` feature,
//! `system::SystemRuntime` binds the vendor `libhsa-runtime64`.
//!
//! ```no_run
//! use hsa_cts::conformance::{self, CaseEnv};
//! use hsa_cts::soft::{SoftConfig, SoftRuntime};
//! use hsa_cts::SuiteConfig;
//!
//! hsa_cts::logging::init_logging_default();
//! let config = SuiteConfig::from_env().expect("valid HSA_CTS_* settings");
//! let report = conformance::run_cases(
//!     || CaseEnv::new(SoftRuntime::shared(SoftConfig::default()), config.clone()),
//!     "signal::",
//! );
//! println!("{report}");
//! ```

mod agent;
pub mod config;
pub mod conformance;
mod context;
pub mod error;
mod executable;
pub mod logging;
mod memory;
pub mod packet;
mod queue;
pub mod runtime;
pub mod session;
mod signal;
pub mod soft;
#[cfg(feature = "system-hsa")]
pub mod system;
pub mod thread_group;
pub mod types;
pub mod wait;

pub use agent::agents;
pub use config::SuiteConfig;
pub use context::HsaContext;
pub use error::{HsaError, Result, Status};
pub use executable::Executable;
pub use memory::Memory;
pub use queue::Queue;
pub use runtime::{Runtime, SharedRuntime};
pub use session::Session;
pub use signal::Signal;
pub use thread_group::ThreadGroup;
pub use types::{Agent, DeviceType, MemoryRegion};
