//! Failure-report artifact rendering.
//!
//! When a chart install fails with per-resource detail, the manager
//! renders an HTML page describing the failure and uploads it to the blob
//! store under a minute-rounded, timestamped key.

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::installer::{ChartError, FailedResource};

/// Data rendered into a failure-report page.
#[derive(Debug, Clone)]
pub struct FailureReport<'a> {
    pub env_name: &'a str,
    pub pull_request_url: String,
    pub started_time: DateTime<Utc>,
    pub failed_time: DateTime<Utc>,
    pub error: &'a ChartError,
}

impl FailureReport<'_> {
    /// Render the report as a standalone HTML page.
    pub fn render_html(&self) -> String {
        let mut out = String::with_capacity(2048);
        out.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
        let _ = writeln!(
            out,
            "<title>Environment failure: {}</title>",
            escape(self.env_name)
        );
        out.push_str("</head>\n<body>\n");
        let _ = writeln!(out, "<h1>Environment failure: {}</h1>", escape(self.env_name));
        let _ = writeln!(
            out,
            "<p><a href=\"{}\">{}</a></p>",
            escape(&self.pull_request_url),
            escape(&self.pull_request_url)
        );
        let _ = writeln!(
            out,
            "<p>Started: {}<br>Failed: {}</p>",
            self.started_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.failed_time.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(
            out,
            "<h2>Helm error</h2>\n<pre>{}</pre>",
            escape(&self.error.helm_error)
        );
        render_resources(&mut out, "Failed deployments", &self.error.failed_deployments);
        render_resources(&mut out, "Failed jobs", &self.error.failed_jobs);
        render_resources(&mut out, "Failed daemon sets", &self.error.failed_daemon_sets);
        out.push_str("</body>\n</html>\n");
        out
    }
}

fn render_resources(out: &mut String, heading: &str, resources: &[FailedResource]) {
    if resources.is_empty() {
        return;
    }
    let _ = writeln!(out, "<h2>{heading}</h2>");
    out.push_str("<table border=\"1\">\n<tr><th>Name</th><th>Reason</th><th>Message</th></tr>\n");
    for r in resources {
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&r.name),
            escape(&r.reason),
            escape(&r.message)
        );
    }
    out.push_str("</table>\n");
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Blob key for a failure report:
/// `{prefix}envfailures/{minute-rounded RFC3339}/{env_name}.html`.
pub fn report_key(prefix: &str, env_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "{prefix}envfailures/{}/{env_name}.html",
        minute_rounded_rfc3339(now)
    )
}

/// RFC3339 timestamp rounded to the nearest minute (30 s rounds up).
fn minute_rounded_rfc3339(t: DateTime<Utc>) -> String {
    let rounded = (t.timestamp() + 30).div_euclid(60) * 60;
    Utc.timestamp_opt(rounded, 0)
        .single()
        .unwrap_or(t)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::FailedResource;

    fn chart_error() -> ChartError {
        ChartError {
            helm_error: "release widgets-web failed: timed out".to_string(),
            failed_deployments: vec![FailedResource {
                name: "widgets-web".to_string(),
                reason: "CrashLoopBackOff".to_string(),
                message: "back-off restarting <container>".to_string(),
            }],
            failed_jobs: Vec::new(),
            failed_daemon_sets: Vec::new(),
        }
    }

    #[test]
    fn renders_all_fields() {
        let ce = chart_error();
        let report = FailureReport {
            env_name: "calm-heron-7",
            pull_request_url: "https://github.com/acme/widgets/pull/7".to_string(),
            started_time: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            failed_time: Utc.with_ymd_and_hms(2026, 3, 1, 12, 9, 30).unwrap(),
            error: &ce,
        };
        let html = report.render_html();
        assert!(html.contains("calm-heron-7"));
        assert!(html.contains("https://github.com/acme/widgets/pull/7"));
        assert!(html.contains("widgets-web"));
        assert!(html.contains("CrashLoopBackOff"));
        // resource messages are escaped
        assert!(html.contains("&lt;container&gt;"));
        assert!(!html.contains("<container>"));
        // empty sections are omitted
        assert!(!html.contains("Failed jobs"));
    }

    #[test]
    fn key_is_minute_rounded() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 9, 31).unwrap();
        let key = report_key("qa/", "calm-heron-7", t);
        assert_eq!(key, "qa/envfailures/2026-03-01T12:10:00Z/calm-heron-7.html");

        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 9, 29).unwrap();
        let key = report_key("", "calm-heron-7", t);
        assert_eq!(key, "envfailures/2026-03-01T12:09:00Z/calm-heron-7.html");
    }
}
