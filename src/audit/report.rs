use crate::types::{AuditError, AuditReport, Category, CheckResult, Verdict};

const COLOR_RED: &str = "\x1b[91m";
const COLOR_GREEN: &str = "\x1b[92m";
const COLOR_YELLOW: &str = "\x1b[93m";
const COLOR_RESET: &str = "\x1b[0m";

/// Line-oriented report, grouped by category
pub fn generate_text_report(report: &AuditReport, color: bool) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "--- HARDENSCAN SECURITY AUDIT: {} ---\n",
        report.target
    ));

    for category in Category::ALL {
        let mut results = report.results_in(category).peekable();
        if results.peek().is_none() {
            continue;
        }

        out.push_str(&format!("\n[+] {}...", category.title()));
        if category.is_advisory() {
            out.push_str(" (advisory: verified best-effort from outside the host)");
        }
        out.push('\n');

        for result in results {
            out.push_str(&format_line(result, color));
            out.push('\n');
        }
    }

    out.push_str(&format!(
        "\n--- AUDIT COMPLETE: {} passed, {} failed, {} indeterminate ---\n",
        report.summary.passed, report.summary.failed, report.summary.indeterminate
    ));

    out
}

/// `[PASS] M5 : Admin Panel Port (8080) Closed (detail)`
pub fn format_line(result: &CheckResult, color: bool) -> String {
    let tag = if color {
        let paint = match result.verdict {
            Verdict::Pass => COLOR_GREEN,
            Verdict::Fail => COLOR_RED,
            Verdict::Indeterminate => COLOR_YELLOW,
        };
        format!("{}{}{}", paint, result.verdict.tag(), COLOR_RESET)
    } else {
        result.verdict.tag().to_string()
    };

    let mut line = format!("[{}] {} : {}", tag, result.check.code, result.check.name);
    if let Some(detail) = &result.detail {
        line.push_str(&format!(" ({})", detail));
    }
    line
}

pub fn generate_json_report(report: &AuditReport) -> Result<String, AuditError> {
    Ok(serde_json::to_string_pretty(report)?)
}
