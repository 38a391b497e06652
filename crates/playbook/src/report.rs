//! Report assembly helpers.

use chrono::{DateTime, Utc};

use crate::types::{ExecutionReport, ReportStatus, TaskResult, TaskStatus};

/// Render an elapsed interval as a short human string: "850ms", "1.5s",
/// "2m30s", "1h04m".
pub fn format_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let millis = (end - start).num_milliseconds().max(0);

    if millis < 1000 {
        return format!("{millis}ms");
    }
    let secs = millis as f64 / 1000.0;
    if secs < 60.0 {
        return format!("{secs:.1}s");
    }
    let total_secs = millis / 1000;
    let mins = total_secs / 60;
    if mins < 60 {
        return format!("{}m{:02}s", mins, total_secs % 60);
    }
    format!("{}h{:02}m", mins / 60, mins % 60)
}

/// Stamp a task result with its end time and duration.
pub fn finish_task(result: &mut TaskResult) {
    result.end_time = Utc::now();
    result.duration = format_duration(result.start_time, result.end_time);
}

/// Stamp a report with its final status, end time and duration.
pub fn finish_report(report: &mut ExecutionReport, status: ReportStatus) {
    report.status = status;
    report.end_time = Utc::now();
    report.total_duration = format_duration(report.start_time, report.end_time);
}

/// Fold one task result into the report's aggregate counters.
pub fn count_result(report: &mut ExecutionReport, status: TaskStatus) {
    match status {
        TaskStatus::Completed => report.tasks_completed += 1,
        TaskStatus::Failed => report.tasks_failed += 1,
        TaskStatus::Skipped => report.tasks_skipped += 1,
        TaskStatus::Pending | TaskStatus::Running => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn span(ms: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc::now();
        (start, start + TimeDelta::milliseconds(ms))
    }

    #[test]
    fn formats_sub_second_as_millis() {
        let (s, e) = span(850);
        assert_eq!(format_duration(s, e), "850ms");
    }

    #[test]
    fn formats_seconds_with_one_decimal() {
        let (s, e) = span(1500);
        assert_eq!(format_duration(s, e), "1.5s");
    }

    #[test]
    fn formats_minutes_and_hours() {
        let (s, e) = span(150_000);
        assert_eq!(format_duration(s, e), "2m30s");
        let (s, e) = span(64 * 60 * 1000);
        assert_eq!(format_duration(s, e), "1h04m");
    }

    #[test]
    fn negative_intervals_clamp_to_zero() {
        let (s, e) = span(100);
        assert_eq!(format_duration(e, s), "0ms");
    }
}
