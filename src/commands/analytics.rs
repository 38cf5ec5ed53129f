use crate::analytics::AnalyticsSnapshot;
use crate::config::Config;
use crate::context::AppContext;
use crate::error::Result;
use colored::Colorize;
use prettytable::{format, Table};

const RECENT_EVENTS: usize = 10;

fn format_response_time(ms: f64) -> String {
    if ms <= 0.0 {
        "-".to_string()
    } else if ms < 1000.0 {
        format!("{:.0} ms", ms)
    } else {
        format!("{:.1} s", ms / 1000.0)
    }
}

/// Print a snapshot as tables
pub fn print_snapshot(snapshot: &AnalyticsSnapshot) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row!["Metric".bold(), "Value".bold()]);
    table.add_row(prettytable::row!["Session", snapshot.session_id.cyan()]);
    table.add_row(prettytable::row!["Conversations", snapshot.conversation_count]);
    table.add_row(prettytable::row!["Messages", snapshot.message_count]);
    table.add_row(prettytable::row![
        "Avg. response time",
        format_response_time(snapshot.average_response_time)
    ]);
    table.add_row(prettytable::row!["Helpful", snapshot.helpful_count.to_string().green()]);
    table.add_row(prettytable::row!["Unhelpful", snapshot.unhelpful_count.to_string().red()]);
    table.add_row(prettytable::row!["Total feedback", snapshot.total_feedback]);

    println!("\nUsage Analytics:");
    table.printstd();

    println!("\nTop queries:");
    if snapshot.top_queries.is_empty() {
        println!("  {}", "none yet".dimmed());
    }
    for (i, query) in snapshot.top_queries.iter().enumerate() {
        println!("  {}. {}", i + 1, query);
    }

    println!("\nRecent events:");
    let skip = snapshot.events.len().saturating_sub(RECENT_EVENTS);
    for event in snapshot.events.iter().skip(skip) {
        println!(
            "  {} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            event.event_name
        );
    }
    println!();
}

/// Show the analytics report, as tables or JSON
pub fn show_analytics(config: Config, json: bool) -> Result<()> {
    let ctx = AppContext::new(config);
    let snapshot = ctx.analytics_snapshot()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::AnalyticsService;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_format_response_time() {
        assert_eq!(format_response_time(0.0), "-");
        assert_eq!(format_response_time(250.4), "250 ms");
        assert_eq!(format_response_time(2500.0), "2.5 s");
    }

    #[test]
    fn test_print_snapshot_does_not_panic() {
        let service = AnalyticsService::new(Arc::new(MemoryStore::new()));
        print_snapshot(&service.snapshot());
    }
}
