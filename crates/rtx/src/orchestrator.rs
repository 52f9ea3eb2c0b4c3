//! The pipeline driver: bounded provider fan-out, per-dependency result
//! merging, and report assembly.
//!
//! Tasks run under two layers of bounded concurrency: a run-wide semaphore
//! (`global_concurrency`, default 16) and a per-source semaphore sized to
//! that source's configured in-flight maximum. Completion order is
//! arbitrary; the output is not. Results merge into key-ordered bundles and
//! the report's total ordering makes identical inputs produce identical
//! bytes.
//!
//! Cancellation is drop-based: when the optional run deadline expires, the
//! remaining task futures are dropped at their next suspension point and
//! every dependency a source never answered for is annotated unavailable.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use rtx_cache::SourceCache;
use rtx_config::{RtxConfig, Thresholds};
use rtx_providers::{
    AdvisoryProvider, CratesIoMetadataProvider, DepAdvisories, GithubAdvisoryProvider,
    MetadataProvider, NpmMetadataProvider, OsvProvider, ProviderError, ProviderSettings,
    CRATES_IO_DEFAULT_BASE, GITHUB_DEFAULT_BASE, NPM_DEFAULT_BASE, OSV_DEFAULT_BASE,
    PYPI_DEFAULT_BASE, PypiMetadataProvider,
};
use rtx_types::{
    DepKey, Dependency, DependencyReport, Ecosystem, ReleaseMetadata, Report, SourceOutcome,
};

use crate::policy;
use crate::signals;

/// One registered advisory source with its scheduling bounds.
struct AdvisorySlot {
    provider: Arc<dyn AdvisoryProvider>,
    batch_size: usize,
    semaphore: Arc<Semaphore>,
}

/// One registered metadata source with its scheduling bound.
struct MetadataSlot {
    provider: Arc<dyn MetadataProvider>,
    semaphore: Arc<Semaphore>,
}

/// Drives the evaluation pipeline end-to-end.
pub struct Orchestrator {
    advisory: Vec<AdvisorySlot>,
    metadata: BTreeMap<Ecosystem, MetadataSlot>,
    config_disabled: BTreeSet<String>,
    disabled_advisory: BTreeSet<String>,
    disabled_metadata: BTreeMap<Ecosystem, String>,
    thresholds: Thresholds,
    global_concurrency: usize,
    deadline: Option<Duration>,
}

/// Accumulated provider answers for one dependency.
#[derive(Default)]
struct ResultBundle {
    advisories: Vec<rtx_types::Advisory>,
    answered: BTreeSet<String>,
    unavailable: BTreeSet<String>,
    metadata: Option<ReleaseMetadata>,
}

/// What one scheduled task produced.
enum TaskOutcome {
    AdvisoryBatch {
        source: String,
        results: BTreeMap<DepKey, DepAdvisories>,
    },
    AdvisoryAuthFailed {
        source: String,
        message: String,
        keys: Vec<DepKey>,
    },
    AdvisorySkipped {
        source: String,
        keys: Vec<DepKey>,
    },
    Metadata {
        source: String,
        key: DepKey,
        metadata: ReleaseMetadata,
    },
    MetadataUnavailable {
        source: String,
        key: DepKey,
    },
}

impl Orchestrator {
    /// Orchestrator with no providers registered.
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            advisory: Vec::new(),
            metadata: BTreeMap::new(),
            config_disabled: BTreeSet::new(),
            disabled_advisory: BTreeSet::new(),
            disabled_metadata: BTreeMap::new(),
            thresholds,
            global_concurrency: 16,
            deadline: None,
        }
    }

    /// Set the run-wide concurrency ceiling.
    pub fn with_global_concurrency(mut self, limit: usize) -> Self {
        self.global_concurrency = limit.max(1);
        self
    }

    /// Set an overall run deadline.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Register an advisory source.
    pub fn register_advisory_provider(
        &mut self,
        provider: Arc<dyn AdvisoryProvider>,
        batch_size: usize,
        max_in_flight: usize,
    ) {
        self.advisory.push(AdvisorySlot {
            provider,
            batch_size: batch_size.max(1),
            semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
        });
    }

    /// Register the metadata source for one ecosystem.
    pub fn register_metadata_provider(
        &mut self,
        provider: Arc<dyn MetadataProvider>,
        max_in_flight: usize,
    ) {
        self.metadata.insert(
            provider.ecosystem(),
            MetadataSlot {
                provider,
                semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
            },
        );
    }

    /// Mark an advisory source as disabled by configuration. Its tag still
    /// appears in the report (`disabled`) and every dependency is annotated
    /// unavailable for it.
    pub fn register_disabled_advisory_source(&mut self, tag: &str) {
        self.config_disabled.insert(tag.to_string());
        self.disabled_advisory.insert(tag.to_string());
    }

    /// Mark an ecosystem's metadata source as disabled by configuration.
    /// Dependencies of that ecosystem are annotated unavailable for it.
    pub fn register_disabled_metadata_source(&mut self, ecosystem: Ecosystem, tag: &str) {
        self.config_disabled.insert(tag.to_string());
        self.disabled_metadata.insert(ecosystem, tag.to_string());
    }

    /// Every registered source tag, enabled or not.
    fn source_tags(&self) -> BTreeSet<String> {
        let mut tags: BTreeSet<String> = self
            .advisory
            .iter()
            .map(|s| s.provider.source().to_string())
            .collect();
        tags.extend(self.metadata.values().map(|s| s.provider.source().to_string()));
        tags.extend(self.config_disabled.iter().cloned());
        tags
    }

    /// Evaluate a working set and emit the report.
    pub async fn run(&self, working_set: &[Dependency]) -> Report {
        let now = Utc::now();
        let global = Arc::new(Semaphore::new(self.global_concurrency));
        // Sources disabled mid-run by an auth failure; config-disabled
        // sources never schedule tasks in the first place.
        let auth_disabled: Arc<Mutex<BTreeSet<String>>> = Arc::new(Mutex::new(BTreeSet::new()));

        let mut by_ecosystem: BTreeMap<Ecosystem, Vec<Dependency>> = BTreeMap::new();
        for dep in working_set {
            by_ecosystem.entry(dep.ecosystem).or_default().push(dep.clone());
        }

        let mut tasks: FuturesUnordered<BoxFuture<'static, TaskOutcome>> = FuturesUnordered::new();

        for slot in &self.advisory {
            let source_tag = slot.provider.source().to_string();
            if self.config_disabled.contains(&source_tag) {
                continue;
            }
            for group in by_ecosystem.values() {
                for chunk in group.chunks(slot.batch_size) {
                    let provider = Arc::clone(&slot.provider);
                    let source_sem = Arc::clone(&slot.semaphore);
                    let global_sem = Arc::clone(&global);
                    let disabled = Arc::clone(&auth_disabled);
                    let chunk = chunk.to_vec();
                    tasks.push(Box::pin(advisory_task(
                        provider, source_sem, global_sem, disabled, chunk,
                    )));
                }
            }
        }

        for dep in working_set {
            let Some(slot) = self.metadata.get(&dep.ecosystem) else {
                continue;
            };
            let source_tag = slot.provider.source().to_string();
            if self.config_disabled.contains(&source_tag) {
                continue;
            }
            let provider = Arc::clone(&slot.provider);
            let source_sem = Arc::clone(&slot.semaphore);
            let global_sem = Arc::clone(&global);
            let disabled = Arc::clone(&auth_disabled);
            let dep = dep.clone();
            tasks.push(Box::pin(metadata_task(
                provider, source_sem, global_sem, disabled, dep,
            )));
        }

        let mut bundles: BTreeMap<DepKey, ResultBundle> = working_set
            .iter()
            .map(|d| (d.key(), ResultBundle::default()))
            .collect();

        let drive = drain_tasks(&mut tasks, &mut bundles, &auth_disabled);
        match self.deadline {
            Some(deadline) => {
                if tokio::time::timeout(deadline, drive).await.is_err() {
                    warn!(
                        pending = tasks.len(),
                        "run deadline expired; reporting with partial results"
                    );
                }
            }
            None => drive.await,
        }
        drop(tasks);

        self.assemble(working_set, bundles, &auth_disabled.lock().expect("disabled lock"), now)
    }

    /// Fold the merged bundles into the final report.
    fn assemble(
        &self,
        working_set: &[Dependency],
        mut bundles: BTreeMap<DepKey, ResultBundle>,
        auth_disabled: &BTreeSet<String>,
        now: chrono::DateTime<Utc>,
    ) -> Report {
        let advisory_tags: Vec<String> = self
            .advisory
            .iter()
            .map(|s| s.provider.source().to_string())
            .collect();

        let mut verdicts = Vec::with_capacity(working_set.len());
        for dep in working_set {
            let mut bundle = bundles.remove(&dep.key()).unwrap_or_default();

            // Any source that should have answered but did not (disabled,
            // auth-disabled, or cancelled by the deadline) is annotated.
            let mut expected: Vec<String> = advisory_tags.clone();
            expected.extend(self.disabled_advisory.iter().cloned());
            if let Some(slot) = self.metadata.get(&dep.ecosystem) {
                expected.push(slot.provider.source().to_string());
            }
            if let Some(tag) = self.disabled_metadata.get(&dep.ecosystem) {
                expected.push(tag.clone());
            }
            for tag in expected {
                if !bundle.answered.contains(&tag) {
                    bundle.unavailable.insert(tag);
                }
            }

            // Sources may overlap (the same GHSA id from two feeds).
            bundle.advisories.sort_by(|a, b| a.id.cmp(&b.id));
            bundle.advisories.dedup_by(|a, b| a.id == b.id);

            let metadata = bundle
                .metadata
                .take()
                .unwrap_or_else(|| ReleaseMetadata::unknown("unresolved"));
            let signal = signals::derive(dep, &bundle.advisories, &metadata, &self.thresholds, now);
            let verdict = policy::evaluate(&signal);

            verdicts.push(DependencyReport {
                ecosystem: dep.ecosystem,
                name: dep.normalized_name(),
                version: dep.version.clone(),
                direct: dep.direct,
                verdict,
                unavailable_sources: bundle.unavailable.into_iter().collect(),
            });
        }

        let mut sources = BTreeMap::new();
        for tag in self.source_tags() {
            let outcome = if self.config_disabled.contains(&tag) || auth_disabled.contains(&tag) {
                SourceOutcome::Disabled
            } else if verdicts
                .iter()
                .any(|v| v.unavailable_sources.contains(&tag))
            {
                SourceOutcome::Degraded
            } else {
                SourceOutcome::Ok
            };
            sources.insert(tag, outcome);
        }

        Report::assemble(verdicts, sources)
    }
}

/// Drain the task set, merging each outcome as it completes.
async fn drain_tasks(
    tasks: &mut FuturesUnordered<BoxFuture<'static, TaskOutcome>>,
    bundles: &mut BTreeMap<DepKey, ResultBundle>,
    auth_disabled: &Arc<Mutex<BTreeSet<String>>>,
) {
    while let Some(outcome) = tasks.next().await {
        match outcome {
            TaskOutcome::AdvisoryBatch { source, results } => {
                for (key, dep_advisories) in results {
                    let Some(bundle) = bundles.get_mut(&key) else {
                        continue;
                    };
                    if dep_advisories.available {
                        bundle.advisories.extend(dep_advisories.advisories);
                        bundle.answered.insert(source.clone());
                    } else {
                        bundle.unavailable.insert(source.clone());
                    }
                }
            }
            TaskOutcome::AdvisoryAuthFailed {
                source,
                message,
                keys,
            } => {
                let newly = auth_disabled
                    .lock()
                    .expect("disabled lock")
                    .insert(source.clone());
                if newly {
                    warn!(%source, %message, "disabling source for the rest of the run");
                }
                for key in keys {
                    if let Some(bundle) = bundles.get_mut(&key) {
                        bundle.unavailable.insert(source.clone());
                    }
                }
            }
            TaskOutcome::AdvisorySkipped { source, keys } => {
                for key in keys {
                    if let Some(bundle) = bundles.get_mut(&key) {
                        bundle.unavailable.insert(source.clone());
                    }
                }
            }
            TaskOutcome::Metadata {
                source,
                key,
                metadata,
            } => {
                if let Some(bundle) = bundles.get_mut(&key) {
                    bundle.metadata = Some(metadata);
                    bundle.answered.insert(source);
                }
            }
            TaskOutcome::MetadataUnavailable { source, key } => {
                if let Some(bundle) = bundles.get_mut(&key) {
                    bundle.unavailable.insert(source);
                }
            }
        }
    }
}

/// One advisory batch under both semaphores.
async fn advisory_task(
    provider: Arc<dyn AdvisoryProvider>,
    source_sem: Arc<Semaphore>,
    global_sem: Arc<Semaphore>,
    auth_disabled: Arc<Mutex<BTreeSet<String>>>,
    chunk: Vec<Dependency>,
) -> TaskOutcome {
    let source = provider.source().to_string();
    let keys: Vec<DepKey> = chunk.iter().map(Dependency::key).collect();

    // The semaphores live for the whole run and are never closed.
    let _source_permit = source_sem.acquire_owned().await.ok();
    let _global_permit = global_sem.acquire_owned().await.ok();

    if auth_disabled.lock().expect("disabled lock").contains(&source) {
        return TaskOutcome::AdvisorySkipped { source, keys };
    }

    debug!(%source, count = chunk.len(), "dispatching advisory batch");
    match provider.enrich_batch(&chunk).await {
        Ok(batch) => TaskOutcome::AdvisoryBatch {
            source,
            results: batch.into_results(),
        },
        Err(ProviderError::Auth { source_tag: source, message }) => TaskOutcome::AdvisoryAuthFailed {
            source,
            message,
            keys,
        },
        Err(ProviderError::Unavailable { source_tag: source, message }) => {
            warn!(%source, %message, "advisory batch unavailable");
            TaskOutcome::AdvisorySkipped { source, keys }
        }
    }
}

/// One metadata fetch under both semaphores.
async fn metadata_task(
    provider: Arc<dyn MetadataProvider>,
    source_sem: Arc<Semaphore>,
    global_sem: Arc<Semaphore>,
    auth_disabled: Arc<Mutex<BTreeSet<String>>>,
    dep: Dependency,
) -> TaskOutcome {
    let source = provider.source().to_string();
    let key = dep.key();

    let _source_permit = source_sem.acquire_owned().await.ok();
    let _global_permit = global_sem.acquire_owned().await.ok();

    if auth_disabled.lock().expect("disabled lock").contains(&source) {
        return TaskOutcome::MetadataUnavailable { source, key };
    }

    debug!(%source, dep = %key, "dispatching metadata fetch");
    match provider.fetch(&dep).await {
        Ok(metadata) => TaskOutcome::Metadata {
            source,
            key,
            metadata,
        },
        Err(ProviderError::Auth { source_tag: source, message }) => {
            let newly = auth_disabled
                .lock()
                .expect("disabled lock")
                .insert(source.clone());
            if newly {
                warn!(%source, %message, "disabling source for the rest of the run");
            }
            TaskOutcome::MetadataUnavailable { source, key }
        }
        Err(ProviderError::Unavailable { source_tag: source, .. }) => {
            TaskOutcome::MetadataUnavailable { source, key }
        }
    }
}

/// Wire the production providers from configuration.
///
/// Advisory sources: OSV and the GitHub advisory database. Metadata
/// sources: the npm, PyPI, and crates.io registries. Disabled sources are
/// registered so they still appear in the report.
pub fn orchestrator_from_config(config: &RtxConfig) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(config.thresholds.clone())
        .with_global_concurrency(config.run.global_concurrency)
        .with_deadline(config.run.deadline());

    let cache_dir = config.cache.dir.clone();
    let max_entries = config.cache.max_entries_per_source;
    let cache = |tag: &str| SourceCache::new(tag, cache_dir.clone(), max_entries);

    let wire_advisory = |orchestrator: &mut Orchestrator,
                         tag: &str,
                         provider: Arc<dyn AdvisoryProvider>| {
        if config.source_disabled(tag) {
            orchestrator.register_disabled_advisory_source(tag);
        } else {
            let source = config.source(tag);
            orchestrator.register_advisory_provider(provider, source.batch_size, source.max_in_flight);
        }
    };

    let osv_settings = ProviderSettings::from_config(config, "osv", OSV_DEFAULT_BASE);
    wire_advisory(
        &mut orchestrator,
        "osv",
        Arc::new(OsvProvider::new(osv_settings, cache("osv"))),
    );

    let github_settings = ProviderSettings::from_config(config, "github", GITHUB_DEFAULT_BASE);
    wire_advisory(
        &mut orchestrator,
        "github",
        Arc::new(GithubAdvisoryProvider::new(github_settings, cache("github"))),
    );

    let wire_metadata = |orchestrator: &mut Orchestrator,
                         tag: &str,
                         provider: Arc<dyn MetadataProvider>| {
        if config.source_disabled(tag) {
            orchestrator.register_disabled_metadata_source(provider.ecosystem(), tag);
        } else {
            orchestrator.register_metadata_provider(provider, config.source(tag).max_in_flight);
        }
    };

    let npm_settings = ProviderSettings::from_config(config, "npm", NPM_DEFAULT_BASE);
    wire_metadata(
        &mut orchestrator,
        "npm",
        Arc::new(NpmMetadataProvider::new(npm_settings, cache("npm"))),
    );

    let pypi_settings = ProviderSettings::from_config(config, "pypi", PYPI_DEFAULT_BASE);
    wire_metadata(
        &mut orchestrator,
        "pypi",
        Arc::new(PypiMetadataProvider::new(pypi_settings, cache("pypi"))),
    );

    let crates_settings = ProviderSettings::from_config(config, "crates-io", CRATES_IO_DEFAULT_BASE);
    wire_metadata(
        &mut orchestrator,
        "crates-io",
        Arc::new(CratesIoMetadataProvider::new(crates_settings, cache("crates-io"))),
    );

    orchestrator
}
