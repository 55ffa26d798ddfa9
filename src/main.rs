// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use chrono::Local;
use meal_ledger::{
    import_csv, retention_cutoff, AppConfig, InMemoryLedger, LedgerStore, SettlementEngine,
    SettlementReport, SqliteLedger,
};
use std::env;
use std::path::Path;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: meal-ledger [COMMAND]

Commands:
  ui                        Settlement dashboard (default)
  settle [--json]           Print balances and suggested transfers
  import <file.csv> [--dry-run]
                            Import items and payments from CSV
  settle-all                Mark every unsettled meal as settled
  cleanup                   Delete settled meals past the retention horizon";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    if let Err(e) = config.validate() {
        bail!("Invalid configuration: {}", e);
    }

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("ui");

    match command {
        "ui" => run_ui_mode(&config)?,
        "settle" => run_settle(&config, args.iter().any(|a| a == "--json"))?,
        "import" => {
            let Some(file) = args.get(2) else {
                bail!("import needs a CSV file\n\n{}", USAGE);
            };
            run_import(&config, Path::new(file), args.iter().any(|a| a == "--dry-run"))?
        }
        "settle-all" => run_settle_all(&config)?,
        "cleanup" => run_cleanup(&config)?,
        "help" | "--help" | "-h" => println!("{}", USAGE),
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }

    Ok(())
}

fn open_ledger(config: &AppConfig) -> Result<SqliteLedger> {
    let ledger = SqliteLedger::open(&config.database.path)
        .with_context(|| format!("Failed to open {}", config.database.path.display()))?;
    Ok(ledger.with_actor("cli"))
}

fn engine(config: &AppConfig) -> Result<SettlementEngine> {
    Ok(SettlementEngine::with_tolerance(config.tolerance()?))
}

fn run_settle(config: &AppConfig, json: bool) -> Result<()> {
    let ledger = open_ledger(config)?;
    let report = engine(config)?.settle_from_ledger(&ledger)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &SettlementReport) {
    println!("🍱 Meal Ledger - Settlement");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", report.summary());

    if report.unsettled_count == 0 {
        println!("\n✓ Nothing to settle");
        return;
    }

    println!("\n📋 Meals");
    for meal in &report.meal_summaries {
        let mut flags = String::new();
        if meal.missing_payer {
            flags.push_str("  ⚠️  no payer");
        }
        if meal.unattributed_shared {
            flags.push_str("  ⚠️  shared cost with no diners");
        }
        println!(
            "  {}  {:<24} spent {:>10.2}  paid {:>10.2}{}",
            meal.date, meal.restaurant, meal.total_spent, meal.total_paid, flags
        );
    }

    println!("\n⚖️  Balances");
    for (person, balance) in &report.balances {
        println!("  {:<24} {:>10.2}", person, balance);
    }

    println!("\n💸 Transfers");
    if report.transactions.is_empty() {
        println!("  ✓ Everyone is square");
    }
    for transfer in &report.transactions {
        println!("  {} → {}: {}", transfer.from, transfer.to, transfer.amount);
    }

    if !report.rounding_residual.is_zero() {
        println!("\n  (rounding residual {})", report.rounding_residual);
    }
}

fn run_import(config: &AppConfig, csv_path: &Path, dry_run: bool) -> Result<()> {
    println!("📥 Importing {}", csv_path.display());

    let summary = if dry_run {
        let mut ledger = InMemoryLedger::new();
        let summary = import_csv(&mut ledger, csv_path)?;
        let report = engine(config)?.settle_from_ledger(&ledger)?;
        print_report(&report);
        summary
    } else {
        let mut ledger = open_ledger(config)?;
        import_csv(&mut ledger, csv_path)?
    };

    println!("\n✓ Meals created: {}", summary.meals_created);
    println!("✓ Items added: {}", summary.items_added);
    println!("✓ Payments added: {}", summary.payments_added);
    println!("✓ Skipped duplicates: {}", summary.duplicates_skipped);
    if dry_run {
        println!("(dry run, nothing was written)");
    }

    Ok(())
}

fn run_settle_all(config: &AppConfig) -> Result<()> {
    let mut ledger = open_ledger(config)?;
    let count = ledger.settle_all_unsettled()?;
    println!("✓ Marked {} meals settled", count);
    Ok(())
}

fn run_cleanup(config: &AppConfig) -> Result<()> {
    let mut ledger = open_ledger(config)?;
    let cutoff = retention_cutoff(Local::now().date_naive(), config.retention.months);

    info!(%cutoff, months = config.retention.months, "running retention cleanup");
    let deleted = ledger.cleanup_settled_before(cutoff)?;
    println!("✓ Deleted {} settled meals dated before {}", deleted, cutoff);

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &AppConfig) -> Result<()> {
    let ledger = open_ledger(config)?;
    let report = engine(config)?.settle_from_ledger(&ledger)?;

    println!("Starting UI... (Press 'q' to quit)\n");

    let mut app = ui::App::new(report);
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &AppConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use: meal-ledger settle");
    std::process::exit(1);
}
