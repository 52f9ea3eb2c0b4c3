//! # rtx
//!
//! A trust gate for dependency upgrades. rtx rebuilds a project's resolved
//! dependency set from its lockfiles, enriches every dependency with
//! vulnerability advisories and registry metadata, derives boolean trust
//! signals, and folds them through a deterministic policy into a report
//! with a CI exit code.
//!
//! ## Pipeline
//!
//! The core flow is **scan → enrich → derive → evaluate → report**:
//!
//! 1. Scanners (the `rtx-scanners` crate) read lockfiles into
//!    [`Dependency`] observations; [`depset::build_working_set`]
//!    deduplicates and orders them.
//! 2. The [`orchestrator::Orchestrator`] fans out to advisory and metadata
//!    providers under a global and a per-source concurrency bound, merging
//!    answers per dependency and tolerating partial source failure.
//! 3. [`signals::derive`] turns advisories plus metadata into a
//!    [`TrustSignal`] — pure, and unknown inputs never assert a signal.
//! 4. [`policy::evaluate`] maps fired signals onto severities and picks the
//!    maximum as the verdict.
//! 5. [`Report`](rtx_types::Report) orders verdicts totally, so identical
//!    inputs serialize to identical bytes, and carries the exit code:
//!    `0` safe/low, `1` medium, `2` high/critical.
//!
//! ## Example
//!
//! ```ignore
//! use rtx::depset::build_working_set;
//! use rtx::orchestrator::orchestrator_from_config;
//! use rtx_scanners::ScannerRegistry;
//!
//! let config = rtx_config::load_config(project_root)?;
//! let (deps, _failures) = ScannerRegistry::with_default_scanners().scan_all(project_root);
//! let working_set = build_working_set(deps);
//!
//! let orchestrator = orchestrator_from_config(&config);
//! let report = orchestrator.run(&working_set).await;
//! std::process::exit(report.exit_code);
//! ```

pub mod depset;
pub mod orchestrator;
pub mod policy;
pub mod preupgrade;
pub mod signals;

pub use rtx_types::{
    Advisory, DepKey, Dependency, DependencyReport, Ecosystem, ReleaseMetadata, Report, Severity,
    Signal, SourceOutcome, TrustSignal, Verdict,
};
