//! Lockfile scanners for rtx.
//!
//! A [`Scanner`] recognizes a set of manifest file names and turns a project
//! root into a list of [`Dependency`] observations. Scanners read only the
//! filesystem — never the network — and report what the lockfile resolves,
//! not what they think should be installed.
//!
//! The bundled scanners cover npm (`package-lock.json`), cargo
//! (`Cargo.lock`), and pinned pip requirements (`requirements.txt`). The
//! [`ScannerRegistry`] detects which scanners apply to a project and runs
//! them all, collecting per-scanner failures without dropping the records
//! the other scanners produced.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use rtx_types::{Dependency, Ecosystem};

/// A manifest scanner for one ecosystem.
pub trait Scanner: Send + Sync {
    /// The ecosystem this scanner reports dependencies for.
    fn ecosystem(&self) -> Ecosystem;

    /// Manifest file names this scanner recognizes in a project root.
    fn manifest_names(&self) -> &'static [&'static str];

    /// Scan the project root and return every resolved dependency.
    fn scan(&self, project_root: &Path) -> Result<Vec<Dependency>>;
}

/// A scanner failure that did not abort the overall scan.
#[derive(Debug)]
pub struct ScanFailure {
    /// Ecosystem of the failing scanner.
    pub ecosystem: Ecosystem,
    /// The underlying error, with context.
    pub error: anyhow::Error,
}

/// The bundled scanners plus detection over a project root.
pub struct ScannerRegistry {
    scanners: Vec<Box<dyn Scanner>>,
}

impl ScannerRegistry {
    /// Registry with every bundled scanner.
    pub fn with_default_scanners() -> Self {
        Self {
            scanners: vec![
                Box::new(NpmLockScanner),
                Box::new(CargoLockScanner),
                Box::new(PipRequirementsScanner),
            ],
        }
    }

    /// All registered scanners.
    pub fn scanners(&self) -> &[Box<dyn Scanner>] {
        &self.scanners
    }

    /// Scanners whose manifests exist under `project_root`.
    pub fn detect(&self, project_root: &Path) -> Vec<&dyn Scanner> {
        self.scanners
            .iter()
            .filter(|s| {
                s.manifest_names()
                    .iter()
                    .any(|name| project_root.join(name).exists())
            })
            .map(|s| s.as_ref())
            .collect()
    }

    /// Run every applicable scanner, keeping records from the ones that
    /// succeed and reporting the ones that fail.
    pub fn scan_all(&self, project_root: &Path) -> (Vec<Dependency>, Vec<ScanFailure>) {
        let mut dependencies = Vec::new();
        let mut failures = Vec::new();
        for scanner in self.detect(project_root) {
            match scanner.scan(project_root) {
                Ok(mut found) => {
                    debug!(
                        ecosystem = %scanner.ecosystem(),
                        count = found.len(),
                        "scanner finished"
                    );
                    dependencies.append(&mut found);
                }
                Err(error) => failures.push(ScanFailure {
                    ecosystem: scanner.ecosystem(),
                    error,
                }),
            }
        }
        (dependencies, failures)
    }
}

// ---------------------------------------------------------------------------
// npm
// ---------------------------------------------------------------------------

/// Scanner for npm `package-lock.json` (lockfile version 2 and 3).
pub struct NpmLockScanner;

#[derive(Debug, Deserialize)]
struct NpmLockfile {
    #[serde(default)]
    packages: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct NpmRootPackage {
    #[serde(default)]
    dependencies: serde_json::Map<String, serde_json::Value>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: serde_json::Map<String, serde_json::Value>,
    #[serde(default, rename = "optionalDependencies")]
    optional_dependencies: serde_json::Map<String, serde_json::Value>,
}

impl Scanner for NpmLockScanner {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Npm
    }

    fn manifest_names(&self) -> &'static [&'static str] {
        &["package-lock.json"]
    }

    fn scan(&self, project_root: &Path) -> Result<Vec<Dependency>> {
        let path = project_root.join("package-lock.json");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read lockfile: {}", path.display()))?;
        let lockfile: NpmLockfile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse lockfile: {}", path.display()))?;

        // The root entry ("") lists what the project itself depends on;
        // everything hoisted under node_modules/ may still be transitive.
        let root: NpmRootPackage = lockfile
            .packages
            .get("")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .unwrap_or_default()
            .unwrap_or_default();
        let mut root_names: BTreeSet<String> = BTreeSet::new();
        for map in [
            &root.dependencies,
            &root.dev_dependencies,
            &root.optional_dependencies,
        ] {
            root_names.extend(map.keys().cloned());
        }

        let mut out = Vec::new();
        for (key, value) in &lockfile.packages {
            let Some(name) = npm_package_name(key) else {
                continue;
            };
            let Some(version) = value.get("version").and_then(|v| v.as_str()) else {
                continue;
            };
            out.push(Dependency {
                ecosystem: Ecosystem::Npm,
                name: name.to_string(),
                version: version.to_string(),
                manifest_path: path.clone(),
                direct: root_names.contains(name),
            });
        }
        Ok(out)
    }
}

/// Package name from a `packages` map key: the part after the last
/// `node_modules/`, which may be scoped (`@scope/name`).
fn npm_package_name(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }
    match key.rfind("node_modules/") {
        Some(idx) => {
            let name = &key[idx + "node_modules/".len()..];
            (!name.is_empty()).then_some(name)
        }
        // Workspace-local paths ("packages/foo") are the project's own
        // members, not registry dependencies.
        None => None,
    }
}

// ---------------------------------------------------------------------------
// cargo
// ---------------------------------------------------------------------------

/// Scanner for `Cargo.lock`.
pub struct CargoLockScanner;

#[derive(Debug, Deserialize)]
struct CargoLockfile {
    #[serde(default, rename = "package")]
    packages: Vec<CargoLockPackage>,
}

#[derive(Debug, Deserialize)]
struct CargoLockPackage {
    name: String,
    version: String,
    /// Registry packages carry a source; path-local members do not.
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CargoManifest {
    #[serde(default)]
    dependencies: toml::Table,
    #[serde(default, rename = "dev-dependencies")]
    dev_dependencies: toml::Table,
    #[serde(default, rename = "build-dependencies")]
    build_dependencies: toml::Table,
}

impl Scanner for CargoLockScanner {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Cargo
    }

    fn manifest_names(&self) -> &'static [&'static str] {
        &["Cargo.lock"]
    }

    fn scan(&self, project_root: &Path) -> Result<Vec<Dependency>> {
        let path = project_root.join("Cargo.lock");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read lockfile: {}", path.display()))?;
        let lockfile: CargoLockfile = toml::from_str(&content)
            .with_context(|| format!("failed to parse lockfile: {}", path.display()))?;

        let direct_names = cargo_direct_names(project_root);

        let mut out = Vec::new();
        for package in lockfile.packages {
            // Entries without a source are workspace members, not dependencies.
            if package.source.is_none() {
                continue;
            }
            let normalized = Ecosystem::Cargo.normalize_name(&package.name);
            out.push(Dependency {
                ecosystem: Ecosystem::Cargo,
                direct: direct_names.contains(&normalized),
                name: package.name,
                version: package.version,
                manifest_path: path.clone(),
            });
        }
        Ok(out)
    }
}

/// Direct dependency names from the root `Cargo.toml`, when readable.
fn cargo_direct_names(project_root: &Path) -> BTreeSet<String> {
    let path = project_root.join("Cargo.toml");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return BTreeSet::new();
    };
    let Ok(manifest) = toml::from_str::<CargoManifest>(&content) else {
        return BTreeSet::new();
    };
    let mut names = BTreeSet::new();
    for table in [
        &manifest.dependencies,
        &manifest.dev_dependencies,
        &manifest.build_dependencies,
    ] {
        names.extend(table.keys().map(|k| Ecosystem::Cargo.normalize_name(k)));
    }
    names
}

// ---------------------------------------------------------------------------
// pip
// ---------------------------------------------------------------------------

/// Scanner for pinned `requirements.txt` files.
///
/// Only `name==version` pins are reported; unpinned or range requirements
/// cannot be evaluated against a registry and are skipped.
pub struct PipRequirementsScanner;

impl Scanner for PipRequirementsScanner {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Pypi
    }

    fn manifest_names(&self) -> &'static [&'static str] {
        &["requirements.txt"]
    }

    fn scan(&self, project_root: &Path) -> Result<Vec<Dependency>> {
        let path = project_root.join("requirements.txt");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read requirements: {}", path.display()))?;

        let mut out = Vec::new();
        for raw_line in content.lines() {
            let Some((name, version)) = parse_requirement_line(raw_line) else {
                continue;
            };
            out.push(Dependency {
                ecosystem: Ecosystem::Pypi,
                name: name.to_string(),
                version: version.to_string(),
                manifest_path: path.clone(),
                direct: true,
            });
        }
        Ok(out)
    }
}

/// Parse one requirements line into a `(name, version)` pin.
///
/// Handles comments, extras (`name[extra]==v`), and environment markers
/// (`name==v ; python_version < "3.9"`). Returns `None` for anything that
/// is not an exact pin.
fn parse_requirement_line(raw: &str) -> Option<(&str, &str)> {
    let line = raw.split('#').next().unwrap_or("").trim();
    if line.is_empty() || line.starts_with('-') {
        return None;
    }
    let line = line.split(';').next().unwrap_or("").trim();
    let (name_part, version) = line.split_once("==")?;
    let version = version.trim();
    let name = name_part.split('[').next().unwrap_or("").trim();
    if name.is_empty() || version.is_empty() || version.contains(['<', '>', '=', '*']) {
        return None;
    }
    Some((name, version))
}
