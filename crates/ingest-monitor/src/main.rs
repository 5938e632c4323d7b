mod bootstrap;
mod report;

use std::time::Duration;

use anyhow::Result;
use monitor_core::models::SourceProfile;
use monitor_core::settings::{DetectionConfig, Settings};
use monitor_data::aggregator::build_report;
use monitor_runtime::collector::collect_inputs;
use monitor_runtime::observer::TracingObserver;
use monitor_runtime::orchestrator::{CancelHandle, DetectionCycle};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load();

    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;

    tracing::info!("Ingest Monitor v{} starting", env!("CARGO_PKG_VERSION"));

    let date = settings.analysis_date()?;
    let data_dir = bootstrap::expand_home(&settings.data_dir);
    let config = DetectionConfig::default();
    tracing::info!(
        "Analysing {} from {} (concurrency {})",
        date,
        data_dir.display(),
        settings.concurrency
    );

    let inputs = collect_inputs(&data_dir, date, &config)?;
    let profiles: Vec<SourceProfile> = inputs.profiles.values().cloned().collect();

    let mut cycle = DetectionCycle::new(settings.concurrency as usize, config);
    if let Some(secs) = settings.deadline_secs {
        cycle = cycle.with_deadline(Duration::from_secs(secs));
    }

    // Ctrl+C stops dispatch; finished sources are still reported.
    let cancel = CancelHandle::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received; stopping detection cycle");
            on_signal.cancel();
        }
    });

    let mut observer = TracingObserver::new();
    let mut outcome = cycle
        .run_until_cancelled(inputs, &mut observer, &cancel)
        .await?;

    if settings.sort {
        outcome.sort_by_source();
    }
    if !outcome.complete {
        tracing::warn!(
            not_run = outcome.sources_not_run,
            "Report is incomplete; some sources were not analysed"
        );
    }

    let reports = build_report(&outcome.incidents, &profiles);
    let rendered = match settings.format.as_str() {
        "json" => report::render_json(date, &outcome, &reports)?,
        _ => report::render_text(date, &outcome, &reports),
    };
    println!("{}", rendered.trim_end());

    Ok(())
}
