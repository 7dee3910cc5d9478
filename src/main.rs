use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;

use flowday::config::FlowdayConfig;
use flowday::core::temporal;
use flowday::remote::MemoryLedger;
use flowday::service::TaskService;
use flowday::store::JsonStore;
use flowday::sync::ReconciliationEngine;

struct Args {
    config: PathBuf,
    date: Option<NaiveDate>,
    debug: bool,
}

fn parse_args() -> Result<Args, Box<dyn std::error::Error>> {
    let mut args = Args {
        config: FlowdayConfig::default_path(),
        date: None,
        debug: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--date" => {
                let value = iter.next().ok_or("--date needs a YYYY-MM-DD value")?;
                args.date = Some(NaiveDate::parse_from_str(&value, "%Y-%m-%d")?);
            }
            "--config" => {
                args.config = iter.next().ok_or("--config needs a path")?.into();
            }
            "--debug" => args.debug = true,
            other => return Err(format!("unknown argument: {other}").into()),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args()?;
    let config = FlowdayConfig::load(&args.config)?;
    flowday::logging::init("flowday", config.debug_logging || args.debug);
    config.ensure_dirs()?;

    let store = Arc::new(JsonStore::open(config.store_path())?);
    // No backend is configured for this tool, so it stays anonymous.
    let engine = Arc::new(ReconciliationEngine::new(store, Arc::new(MemoryLedger::new())));
    let service = TaskService::new(engine);

    let failed = service.start().await?;
    if failed > 0 {
        println!("Marked {failed} overdue tasks as failed\n");
    }

    let date = args.date.unwrap_or_else(temporal::today);
    service.select_date(date);
    let occurrences = service.occurrences_on_selected();
    println!("=== {} ({} tasks) ===", date.format("%A %Y-%m-%d"), occurrences.len());
    for occurrence in &occurrences {
        let time = temporal::local_time_of_day(occurrence.execution_at)
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string());
        let task = &occurrence.definition;
        println!(
            "  {}  [{}] {}  ({})",
            time,
            task.status.as_keyword(),
            task.name,
            task.validity_label
        );
    }

    let progress = service.day_progress(temporal::today());
    println!(
        "\nToday: {}/{} completed ({:.0}%)",
        progress.completed,
        progress.total,
        progress.ratio() * 100.0
    );

    Ok(())
}
