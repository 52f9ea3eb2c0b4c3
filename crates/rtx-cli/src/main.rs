//! The `rtx` binary: scan a project's lockfiles, evaluate dependency trust,
//! and gate CI on the result.
//!
//! Exit codes: `0` safe/low, `1` medium, `2` high/critical, `3` usage or
//! configuration errors, `4` internal errors. Flag and configuration
//! validation happens before any network call.

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use rtx::depset::build_working_set;
use rtx::orchestrator::{Orchestrator, orchestrator_from_config};
use rtx_config::RtxConfig;
use rtx_scanners::ScannerRegistry;
use rtx_types::{Dependency, Ecosystem, Report};

mod render;

/// Exit code for usage and configuration errors.
const USAGE_EXIT: u8 = 3;

/// Exit code for internal failures.
const INTERNAL_EXIT: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "rtx", version)]
#[command(about = "Dependency trust gating: advisories, registry health, and typosquat checks")]
struct Cli {
    /// Project root containing the manifests to scan.
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Report output format.
    #[arg(long, value_enum, default_value = "table")]
    format: Format,

    /// Write the report to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Overall run deadline (e.g. 30s, 2m). Overrides the configured value.
    #[arg(long)]
    deadline: Option<String>,

    /// Only log errors.
    #[arg(long)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate every dependency resolved by the project's lockfiles.
    Scan {
        /// Restrict to specific package managers (repeatable).
        #[arg(long = "manager")]
        managers: Vec<String>,
    },
    /// Compare the current resolution against a proposed version.
    PreUpgrade {
        /// Ecosystem of the target package (npm, pypi, cargo, ...).
        ecosystem: String,
        /// Target package name.
        name: String,
        /// Proposed version.
        version: String,
    },
    /// Re-render a previously saved JSON report.
    Report {
        /// Path to a report produced with `--format json`.
        input: PathBuf,
    },
    /// List the supported package managers and their manifests.
    ListManagers,
    /// Print resolved configuration and source settings.
    Diagnostics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Aligned plain-text table.
    Table,
    /// Stable JSON schema.
    Json,
    /// Standalone HTML page.
    Html,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => USAGE_EXIT,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    init_tracing(cli.quiet);

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("[error] {err:#}");
            ExitCode::from(INTERNAL_EXIT)
        }
    }
}

/// Install the fmt subscriber, honoring `RTX_LOG` then `RUST_LOG`.
fn init_tracing(quiet: bool) {
    use tracing_subscriber::EnvFilter;
    let default_directive = if quiet { "error" } else { "warn" };
    let filter = EnvFilter::try_from_env("RTX_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<u8> {
    // Everything user-facing is validated before a runtime (and therefore
    // any network access) exists.
    let config = match load_and_validate_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("[error] {err:#}");
            return Ok(USAGE_EXIT);
        }
    };

    match &cli.cmd {
        Commands::ListManagers => {
            print_managers();
            Ok(0)
        }
        Commands::Diagnostics => {
            print_diagnostics(&config);
            Ok(0)
        }
        Commands::Report { input } => {
            let content = std::fs::read_to_string(input)
                .with_context(|| format!("failed to read report: {}", input.display()));
            let content = match content {
                Ok(content) => content,
                Err(err) => {
                    eprintln!("[error] {err:#}");
                    return Ok(USAGE_EXIT);
                }
            };
            let report: Report = match serde_json::from_str(&content) {
                Ok(report) => report,
                Err(err) => {
                    eprintln!("[error] not a saved rtx report: {err}");
                    return Ok(USAGE_EXIT);
                }
            };
            emit(&cli, &render_report(&cli, &report)?)?;
            Ok(exit_from_report(&report))
        }
        Commands::Scan { managers } => {
            let selected = match validate_managers(managers) {
                Ok(selected) => selected,
                Err(err) => {
                    eprintln!("[error] {err:#}");
                    return Ok(USAGE_EXIT);
                }
            };
            let working_set = scan_working_set(&cli.project_root, &selected)?;
            let orchestrator = build_orchestrator(&config, &cli)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            let report = runtime.block_on(orchestrator.run(&working_set));

            emit(&cli, &render_report(&cli, &report)?)?;
            Ok(exit_from_report(&report))
        }
        Commands::PreUpgrade {
            ecosystem,
            name,
            version,
        } => {
            let ecosystem = match Ecosystem::from_str(ecosystem) {
                Ok(ecosystem) => ecosystem,
                Err(err) => {
                    eprintln!("[error] {err}");
                    return Ok(USAGE_EXIT);
                }
            };
            let target = Dependency {
                ecosystem,
                name: name.clone(),
                version: version.clone(),
                manifest_path: PathBuf::from("pre-upgrade"),
                direct: true,
            };

            let current = scan_working_set(&cli.project_root, &[])?;
            let orchestrator = build_orchestrator(&config, &cli)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            let outcome = runtime.block_on(orchestrator.run_preupgrade(current, &target));

            let rendered = match cli.format {
                Format::Json => {
                    serde_json::to_string_pretty(&outcome).context("failed to render json")?
                }
                Format::Table | Format::Html => render::render_preupgrade_table(&outcome),
            };
            emit(&cli, &rendered)?;
            Ok(clamp_exit(outcome.exit_code))
        }
    }
}

fn load_and_validate_config(cli: &Cli) -> Result<RtxConfig> {
    let config = rtx_config::load_config(&cli.project_root)?;
    config.validate()?;
    if let Some(raw) = &cli.deadline {
        // Parsed here so a bad flag fails before any scheduling.
        humantime::parse_duration(raw).with_context(|| format!("invalid --deadline: {raw}"))?;
    }
    Ok(config)
}

fn build_orchestrator(config: &RtxConfig, cli: &Cli) -> Result<Orchestrator> {
    let mut orchestrator = orchestrator_from_config(config);
    if let Some(raw) = &cli.deadline {
        let deadline: Duration = humantime::parse_duration(raw)
            .with_context(|| format!("invalid --deadline: {raw}"))?;
        orchestrator = orchestrator.with_deadline(Some(deadline));
    }
    Ok(orchestrator)
}

/// Resolve `--manager` filters to ecosystems, rejecting unknown names.
fn validate_managers(managers: &[String]) -> Result<Vec<Ecosystem>> {
    let registry = ScannerRegistry::with_default_scanners();
    let supported: Vec<Ecosystem> = registry.scanners().iter().map(|s| s.ecosystem()).collect();

    let mut selected = Vec::new();
    for manager in managers {
        let ecosystem = Ecosystem::from_str(manager)
            .map_err(|e| anyhow::anyhow!("{e} (see `rtx list-managers`)"))?;
        if !supported.contains(&ecosystem) {
            bail!("no scanner available for '{manager}' (see `rtx list-managers`)");
        }
        selected.push(ecosystem);
    }
    Ok(selected)
}

/// Scan the project and build the working set, keeping records from
/// scanners that succeeded.
fn scan_working_set(project_root: &std::path::Path, selected: &[Ecosystem]) -> Result<Vec<Dependency>> {
    let registry = ScannerRegistry::with_default_scanners();
    let (deps, failures) = registry.scan_all(project_root);
    for failure in &failures {
        eprintln!(
            "[warn] {} scanner failed: {:#}",
            failure.ecosystem, failure.error
        );
    }
    let deps = deps
        .into_iter()
        .filter(|d| selected.is_empty() || selected.contains(&d.ecosystem))
        .collect::<Vec<_>>();
    Ok(build_working_set(deps))
}

fn render_report(cli: &Cli, report: &Report) -> Result<String> {
    Ok(match cli.format {
        Format::Table => render::render_table(report),
        Format::Json => report.to_json().context("failed to render json")?,
        Format::Html => render::render_html(report),
    })
}

/// Write to `--output` or stdout.
fn emit(cli: &Cli, rendered: &str) -> Result<()> {
    match &cli.output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("failed to write report: {}", path.display())),
        None => {
            println!("{rendered}");
            Ok(())
        }
    }
}

fn exit_from_report(report: &Report) -> u8 {
    clamp_exit(report.exit_code)
}

fn clamp_exit(code: i32) -> u8 {
    u8::try_from(code.clamp(0, 2)).unwrap_or(2)
}

fn print_managers() {
    let registry = ScannerRegistry::with_default_scanners();
    for scanner in registry.scanners() {
        println!(
            "{:<10} {}",
            scanner.ecosystem().to_string(),
            scanner.manifest_names().join(", ")
        );
    }
}

fn print_diagnostics(config: &RtxConfig) {
    println!("cache_dir: {}", config.cache.dir.display());
    for tag in rtx_config::KNOWN_SOURCES {
        let entries = std::fs::read_dir(config.cache.dir.join(tag))
            .map(|dir| dir.count())
            .unwrap_or(0);
        println!("cache entries ({tag}): {entries}");
    }
    println!("cache_max_entries_per_source: {}", config.cache.max_entries_per_source);
    println!("cache_ttl_secs: {}", config.cache.ttl_secs);
    println!("http_timeout_secs: {}", config.http.timeout_secs);
    println!("http_retries: {}", config.http.retries);
    println!("global_concurrency: {}", config.run.global_concurrency);
    match config.run.deadline_secs {
        Some(secs) => println!("deadline_secs: {secs}"),
        None => println!("deadline_secs: none"),
    }
    println!();

    for tag in rtx_config::KNOWN_SOURCES {
        let source = config.source(tag);
        let token = source
            .token_env
            .as_deref()
            .map(|var| {
                if std::env::var(var).is_ok_and(|v| !v.is_empty()) {
                    format!("{var} (set)")
                } else {
                    format!("{var} (unset)")
                }
            })
            .unwrap_or_else(|| "none".to_string());
        println!(
            "source {tag}: disabled={} batch={} in_flight={} timeout={}s retries={} token_env={}",
            config.source_disabled(tag),
            source.batch_size,
            source.max_in_flight,
            source.timeout_secs.unwrap_or_default(),
            source.retries.unwrap_or_default(),
            token,
        );
    }
    println!();

    println!("thresholds: {:?}", config.thresholds);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_validation_accepts_supported() {
        let selected = validate_managers(&["npm".to_string(), "cargo".to_string()]).expect("ok");
        assert_eq!(selected, vec![Ecosystem::Npm, Ecosystem::Cargo]);
    }

    #[test]
    fn manager_validation_rejects_unknown_name() {
        let err = validate_managers(&["homebrew".to_string()]).expect_err("must fail");
        assert!(format!("{err:#}").contains("unknown ecosystem"));
    }

    #[test]
    fn manager_validation_rejects_unscanned_ecosystem() {
        let err = validate_managers(&["maven".to_string()]).expect_err("must fail");
        assert!(format!("{err:#}").contains("no scanner available"));
    }

    #[test]
    fn exit_codes_clamp_to_gate_range() {
        assert_eq!(clamp_exit(0), 0);
        assert_eq!(clamp_exit(1), 1);
        assert_eq!(clamp_exit(2), 2);
        assert_eq!(clamp_exit(99), 2);
        assert_eq!(clamp_exit(-1), 0);
    }

    #[test]
    fn cli_parses_scan_with_filters() {
        let cli = Cli::try_parse_from([
            "rtx",
            "--format",
            "json",
            "scan",
            "--manager",
            "npm",
            "--manager",
            "pypi",
        ])
        .expect("parse");
        assert_eq!(cli.format, Format::Json);
        match cli.cmd {
            Commands::Scan { managers } => assert_eq!(managers, vec!["npm", "pypi"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["rtx", "--format", "xml", "scan"]).is_err());
    }

    #[test]
    fn cli_parses_pre_upgrade_triple() {
        let cli = Cli::try_parse_from(["rtx", "pre-upgrade", "npm", "react", "18.2.0"])
            .expect("parse");
        match cli.cmd {
            Commands::PreUpgrade {
                ecosystem,
                name,
                version,
            } => {
                assert_eq!(ecosystem, "npm");
                assert_eq!(name, "react");
                assert_eq!(version, "18.2.0");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
