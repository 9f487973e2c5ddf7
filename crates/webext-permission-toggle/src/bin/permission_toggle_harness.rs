use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use webext_permission_toggle::toggle_contract::{
    load_toggle_contract_fixture, run_toggle_contract_replay, ToggleContractReplaySummary,
};

#[derive(Debug, Clone)]
struct HarnessCli {
    fixture: PathBuf,
    summary_json_out: Option<PathBuf>,
}

impl HarnessCli {
    fn parse() -> Result<Self> {
        let mut fixture: Option<PathBuf> = None;
        let mut summary_json_out: Option<PathBuf> = None;

        let mut args = std::env::args().skip(1);
        while let Some(flag) = args.next() {
            match flag.as_str() {
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                "--fixture" => fixture = Some(PathBuf::from(require_arg_value(&mut args, &flag)?)),
                "--summary-json-out" => {
                    summary_json_out = Some(PathBuf::from(require_arg_value(&mut args, &flag)?));
                }
                other => {
                    bail!("unknown argument '{other}'");
                }
            }
        }

        let fixture = fixture.context("--fixture is required")?;
        Ok(Self {
            fixture,
            summary_json_out,
        })
    }
}

fn require_arg_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .with_context(|| format!("missing value for {flag}"))
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

fn write_summary_json(path: &Path, summary: &ToggleContractReplaySummary) -> Result<()> {
    ensure_parent_dir(path)?;
    let rendered =
        serde_json::to_string_pretty(summary).context("serialize contract summary json")?;
    std::fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))
}

fn print_usage() {
    println!("Usage: permission_toggle_harness --fixture <path> [--summary-json-out <path>]");
}

fn run() -> Result<()> {
    let cli = HarnessCli::parse()?;
    if !cli.fixture.is_file() {
        bail!("fixture '{}' must point to a file", cli.fixture.display());
    }
    init_tracing();

    let fixture = load_toggle_contract_fixture(&cli.fixture)
        .with_context(|| format!("failed to load fixture '{}'", cli.fixture.display()))?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let summary = runtime.block_on(run_toggle_contract_replay(&fixture))?;

    println!(
        "permission toggle harness summary: fixture={} discovered={} passed={} steps={}",
        summary.fixture, summary.discovered_cases, summary.passed_cases, summary.replayed_steps,
    );
    if let Some(path) = &cli.summary_json_out {
        write_summary_json(path, &summary)?;
        println!("summary_json={}", path.display());
    }
    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("permission toggle harness failed: {error:#}");
        std::process::exit(1);
    }
}
