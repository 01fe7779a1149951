use serde::{Deserialize, Serialize};

sql_text_enum! {
    pub enum VerificationLayer {
        Basic => "basic",
        Integrity => "integrity",
        Functional => "functional",
    }
}

sql_text_enum! {
    pub enum VerificationStatus {
        Pending => "pending",
        Running => "running",
        Passed => "passed",
        Failed => "failed",
    }
}

/// Outcome of one check. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            details: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResults {
    pub summary: CheckSummary,
    pub checks: Vec<CheckResult>,
}

impl VerificationResults {
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        let passed = checks.iter().filter(|c| c.passed).count();
        Self {
            summary: CheckSummary {
                total: checks.len(),
                passed,
                failed: checks.len() - passed,
            },
            checks,
        }
    }

    /// A layer passes only when it ran at least one check and none failed.
    pub fn all_passed(&self) -> bool {
        self.summary.total > 0 && self.summary.failed == 0
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub id: String,
    pub migration_id: String,
    pub layer: VerificationLayer,
    pub status: VerificationStatus,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub results: Option<VerificationResults>,
    pub created_at: String,
}

/// Which live probes the functional layer should run. Probes left unset are
/// not run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionalOptions {
    pub query_table: Option<String>,
    pub storage_bucket: Option<String>,
    pub function_name: Option<String>,
    pub test_auth: bool,
}

impl FunctionalOptions {
    pub fn is_empty(&self) -> bool {
        self.query_table.is_none()
            && self.storage_bucket.is_none()
            && self.function_name.is_none()
            && !self.test_auth
    }
}
