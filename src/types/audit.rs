use serde::{Deserialize, Serialize};
use std::fmt;

/// Check category, declared in report order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Infrastructure,
    HttpConfig,
    AppLogic,
    AuthWorkflow,
    StorageSecrets,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Infrastructure,
        Category::HttpConfig,
        Category::AppLogic,
        Category::AuthWorkflow,
        Category::StorageSecrets,
    ];

    /// Header line used by the text report
    pub fn title(&self) -> &'static str {
        match self {
            Category::Infrastructure => "Checking Infrastructure",
            Category::HttpConfig => "Checking Web Server Headers & Access",
            Category::AppLogic => "Checking App Logic",
            Category::AuthWorkflow => "Checking Authenticated Features (Auto-Register)",
            Category::StorageSecrets => "Checking Storage & Secrets",
        }
    }

    /// Categories verified only on a best-effort basis from outside the host
    pub fn is_advisory(&self) -> bool {
        matches!(self, Category::StorageSecrets)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Infrastructure => write!(f, "infrastructure"),
            Category::HttpConfig => write!(f, "http-config"),
            Category::AppLogic => write!(f, "app-logic"),
            Category::AuthWorkflow => write!(f, "auth-workflow"),
            Category::StorageSecrets => write!(f, "storage-secrets"),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "infrastructure" | "infra" => Ok(Category::Infrastructure),
            "http-config" | "http" => Ok(Category::HttpConfig),
            "app-logic" | "app" => Ok(Category::AppLogic),
            "auth-workflow" | "auth" => Ok(Category::AuthWorkflow),
            "storage-secrets" | "storage" => Ok(Category::StorageSecrets),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Indeterminate,
}

impl Verdict {
    pub fn from_safe(is_safe: bool) -> Self {
        if is_safe {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    /// Four-letter report tag
    pub fn tag(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "VULN",
            Verdict::Indeterminate => "UNKN",
        }
    }
}

/// Catalogue identity of a check. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInfo {
    pub code: String,
    pub name: String,
    pub category: Category,
}

impl CheckInfo {
    pub fn new(code: &str, name: impl Into<String>, category: Category) -> Self {
        Self {
            code: code.to_string(),
            name: name.into(),
            category,
        }
    }
}

/// Verdict plus free-text detail, as returned by a check evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub verdict: Verdict,
    pub detail: Option<String>,
}

impl Outcome {
    pub fn pass() -> Self {
        Self {
            verdict: Verdict::Pass,
            detail: None,
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            detail: Some(detail.into()),
        }
    }

    pub fn indeterminate(detail: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Indeterminate,
            detail: Some(detail.into()),
        }
    }

    pub fn from_safe(is_safe: bool) -> Self {
        Self {
            verdict: Verdict::from_safe(is_safe),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// One result per check per run; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(flatten)]
    pub check: CheckInfo,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    pub fn new(check: CheckInfo, outcome: Outcome) -> Self {
        Self {
            check,
            verdict: outcome.verdict,
            detail: outcome.detail,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub indeterminate: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.indeterminate
    }
}

/// Consolidated run output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub target: String,
    pub auditor: AuditorInfo,
    pub started_at: String,
    pub finished_at: String,
    pub results: Vec<CheckResult>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditorInfo {
    pub name: String,
    pub version: String,
}

impl AuditReport {
    /// Build the report; the summary is derived from `results` here and nowhere else
    pub fn new(
        target: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        results: Vec<CheckResult>,
    ) -> Self {
        let mut summary = Summary::default();
        for result in &results {
            match result.verdict {
                Verdict::Pass => summary.passed += 1,
                Verdict::Fail => summary.failed += 1,
                Verdict::Indeterminate => summary.indeterminate += 1,
            }
        }

        Self {
            target: target.to_string(),
            auditor: AuditorInfo {
                name: "hardenscan".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            started_at: started_at.to_rfc3339(),
            finished_at: chrono::Utc::now().to_rfc3339(),
            results,
            summary,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }

    /// Process exit code: non-zero on any `fail`, or on `indeterminate` when strict
    pub fn exit_code(&self, strict: bool) -> u8 {
        if self.has_failures() || (strict && self.summary.indeterminate > 0) {
            1
        } else {
            0
        }
    }

    pub fn results_in(&self, category: Category) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(move |r| r.check.category == category)
    }
}
