// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use chrono::Local;
use simple_logger::SimpleLogger;
use std::env;
use std::path::{Path, PathBuf};

use coa_mapper::{AccountSide, Config, SqliteRepository, Workspace, WorkspaceOptions};

const USAGE: &str = "usage: coa-mapper [ui | import <source|target> <file.csv> | validate | export [dir] | activate]";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = Config::load()?;

    match args.get(1).map(String::as_str) {
        None | Some("ui") => run_ui_mode(&config),
        Some(command) => {
            init_logging(&config)?;
            match command {
                "import" => run_import(&config, &args[2..]),
                "validate" => run_validate(&config),
                "export" => run_export(&config, args.get(2).map(PathBuf::from)),
                "activate" => run_activate(&config),
                other => bail!("unknown command '{}'\n{}", other, USAGE),
            }
        }
    }
}

/// CLI only: a stderr logger would corrupt the alternate screen
fn init_logging(config: &Config) -> Result<()> {
    SimpleLogger::new()
        .with_level(config.level_filter())
        .init()
        .context("Failed to install logger")
}

fn open_workspace(config: &Config) -> Result<Workspace<SqliteRepository>> {
    let repository = SqliteRepository::open(&config.database_path, &config.actor)?;
    let workspace = Workspace::open(repository, WorkspaceOptions::from_config(config));
    if let Some(banner) = workspace.banner() {
        bail!("{}", banner);
    }
    Ok(workspace)
}

fn run_import(config: &Config, args: &[String]) -> Result<()> {
    let (side, csv_path) = match args {
        [side, path] => {
            let side = match side.as_str() {
                "source" => AccountSide::Source,
                "target" => AccountSide::Target,
                other => bail!("side must be 'source' or 'target', got '{}'", other),
            };
            (side, Path::new(path))
        }
        _ => bail!("{}", USAGE),
    };

    println!("📂 Importing {} accounts from {}", side, csv_path.display());
    let mut repository = SqliteRepository::open(&config.database_path, &config.actor)?;
    let count = repository.import_accounts(side, csv_path)?;
    println!("✓ {} {} accounts in {}", count, side, config.database_path.display());
    Ok(())
}

fn run_validate(config: &Config) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let report = workspace.validate()?;

    println!("🔍 Workspace {}: {}", config.workspace_id, report.summary());
    for issue in report.errors.iter() {
        println!("  ✗ {}: {}", issue.issue_type.as_str(), issue.message);
    }
    for issue in report.warnings.iter() {
        println!("  ! {}: {}", issue.issue_type.as_str(), issue.message);
    }

    if !report.is_valid {
        std::process::exit(2);
    }
    Ok(())
}

fn run_export(config: &Config, dir: Option<PathBuf>) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let dir = dir.unwrap_or_else(|| config.export_dir.clone());
    let path = workspace.export(&dir, Local::now().date_naive())?;
    println!(
        "📤 Exported {} mappings to {}",
        workspace.state().mappings.len(),
        path.display()
    );
    Ok(())
}

fn run_activate(config: &Config) -> Result<()> {
    let mut workspace = open_workspace(config)?;
    let promoted = workspace.activate_all();
    if promoted == 0 {
        println!("Nothing to activate");
        return Ok(());
    }
    let summary = workspace.save()?;
    println!("✓ Activated {} mappings ({} saved)", promoted, summary.total());
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &Config) -> Result<()> {
    let workspace = open_workspace(config)?;
    let mut app = ui::App::new(workspace, config.export_dir.clone());
    ui::run_ui(&mut app)?;

    if app.workspace.is_dirty() {
        println!(
            "⚠ {} unsaved changes discarded",
            app.workspace.state().pending.len()
        );
    }
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &Config) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   {}", USAGE);
    std::process::exit(1);
}
