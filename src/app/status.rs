use prlens::batch::{BatchOutcome, ItemResult};
use prlens::config::Config;
use prlens::diagnostics::health::HealthReport;

pub fn render_health(report: &HealthReport, config: &Config) -> String {
    let mut lines = vec![
        "◆ prlens health".to_string(),
        String::new(),
        format!("Version     {}", env!("CARGO_PKG_VERSION")),
        format!("Config      {}", config.config_path.display()),
        format!("Model       {}", config.classifier.model),
        format!("Status      {}", report.status),
        String::new(),
    ];

    for breaker in &report.breakers {
        lines.push(format!(
            "  breaker {:<12} {:<9} calls={} failed={} rejected={} trips={} timeout={:.0}s",
            breaker.service,
            breaker.state.to_string(),
            breaker.total_calls,
            breaker.failed_calls,
            breaker.rejected_calls,
            breaker.trips,
            breaker.recovery_timeout_secs
        ));
    }
    for limiter in &report.limiters {
        lines.push(format!(
            "  limiter {:<12} delay={:.2}s (base {:.2}s, max {:.2}s)",
            limiter.service,
            limiter.current_delay_secs,
            limiter.base_delay_secs,
            limiter.max_delay_secs
        ));
    }
    lines.push(format!(
        "  cache   {}/{} entries, ttl={}s, hit rate {:.0}%",
        report.cache.size,
        report.cache.max_size,
        report.cache.ttl_secs,
        report.cache.hit_rate * 100.0
    ));

    match &report.memory {
        Some(memory) => {
            let used = memory
                .used_percent
                .map_or_else(|| "unknown".to_string(), |p| format!("{p:.1}%"));
            lines.push(format!(
                "  memory  {} used, level {} (warn {:.0}%, critical {:.0}%)",
                used, memory.pressure_level, memory.warning_percent, memory.critical_percent
            ));
            if !memory.quarantined_cleanups.is_empty() {
                lines.push(format!(
                    "          quarantined: {}",
                    memory.quarantined_cleanups.join(", ")
                ));
            }
        }
        None => lines.push("  memory  monitor disabled".to_string()),
    }
    if let Some(note) = &report.note {
        lines.push(String::new());
        lines.push(format!("note: {note}"));
    }

    lines.join("\n")
}

pub fn render_outcome(outcome: &BatchOutcome) -> String {
    let summary = &outcome.summary;
    let mut lines = vec![format!(
        "{} step '{}': {} items, {} ok ({} cached), {} failed{}",
        outcome.run_id,
        outcome.step,
        summary.total,
        summary.succeeded,
        summary.cached,
        summary.failed,
        if outcome.resumed_from_checkpoint {
            " [resumed from checkpoint]"
        } else {
            ""
        }
    )];

    for item in &outcome.results {
        lines.push(match item {
            ItemResult::Success {
                item_id, result, ..
            } => format!(
                "  {item_id:<24} {:<9} impact {:>5.2}  {}",
                result.work_type.to_string(),
                result.impact_score(),
                result.summary
            ),
            ItemResult::Error(err) => {
                format!("  {:<24} error     {}", err.item_id, err.reason)
            }
        });
    }

    if let Some(record) = &outcome.checkpoint {
        lines.push(format!("checkpoint: {}", record.file));
    }
    lines.join("\n")
}
