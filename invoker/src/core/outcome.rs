//! Reports and results: the structured verdict for one Handle.
//!
//! A [`CaseResult`] is the only thing external reporting sees. Its
//! classification is derived, never stored:
//!
//! - skipped wins over everything,
//! - a conflicted result is neither passed nor failed,
//! - otherwise `passed = (no failing report) XOR reversed`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::case::TestCase;
use crate::core::call_state::ResultState;
use crate::core::exception::Exception;
use crate::core::modifier::ExpectedRaiseSummary;
use crate::core::resolver::ModifierConflict;
use crate::core::signature::ParameterMismatch;
use crate::handle::HandleRecord;

/// Classified evidence attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    /// The body raised the framework's assertion type.
    Asserting { exception: Exception },
    /// A raised exception. Without an expectation this is the generic
    /// unexpected-exception report; with one, the outcome did not match it.
    Raising {
        expected: Option<ExpectedRaiseSummary>,
        actual: ResultState,
    },
    /// A declared return value did not match the outcome.
    Returning { expected: Value, actual: ResultState },
    ParameterMismatch(ParameterMismatch),
    /// Captured output. The only informal report.
    Output {
        stdout: String,
        stderr: String,
        truncated: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Asserting,
    UnexpectedException,
    ExpectationMismatch,
    ParameterMismatch,
    Output,
}

impl Report {
    /// Generic report for an exception nothing expected.
    pub fn unexpected(exception: Exception) -> Self {
        Self::Raising {
            expected: None,
            actual: ResultState::Raised(exception),
        }
    }

    pub fn kind(&self) -> ReportKind {
        match self {
            Self::Asserting { .. } => ReportKind::Asserting,
            Self::Raising { expected: None, .. } => ReportKind::UnexpectedException,
            Self::Raising { .. } | Self::Returning { .. } => ReportKind::ExpectationMismatch,
            Self::ParameterMismatch(_) => ReportKind::ParameterMismatch,
            Self::Output { .. } => ReportKind::Output,
        }
    }

    pub fn is_failing(&self) -> bool {
        !self.is_informal()
    }

    pub fn is_informal(&self) -> bool {
        matches!(self, Self::Output { .. })
    }

    /// The exception carried by this report, if any.
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Self::Asserting { exception } => Some(exception),
            Self::Raising { actual, .. } | Self::Returning { actual, .. } => actual.exception(),
            _ => None,
        }
    }
}

/// Mutually exclusive verdict categories consumed by reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Skipped,
    Conflicted,
    Failed,
    /// Passed, with informal reports attached.
    Informal,
    Passed,
}

/// Final structured verdict for one Handle (or for a case that never reached
/// one: skipped or conflicted).
#[derive(Debug, Clone)]
pub struct CaseResult {
    case: Arc<TestCase>,
    conflict: Option<ModifierConflict>,
    continuing: bool,
    skipped: Option<String>,
    reverse: Option<bool>,
    reports: Vec<Report>,
    handle: Option<HandleRecord>,
}

impl CaseResult {
    pub fn new(case: Arc<TestCase>) -> Self {
        Self {
            case,
            conflict: None,
            continuing: false,
            skipped: None,
            reverse: None,
            reports: Vec::new(),
            handle: None,
        }
    }

    pub fn skipped(case: Arc<TestCase>, reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Self::new(case)
        }
    }

    pub fn conflicted(case: Arc<TestCase>, conflict: ModifierConflict) -> Self {
        Self {
            conflict: Some(conflict),
            ..Self::new(case)
        }
    }

    pub fn with_continuing(mut self, continuing: bool) -> Self {
        self.continuing = continuing;
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = Some(reverse);
        self
    }

    pub fn with_reports(mut self, reports: impl IntoIterator<Item = Report>) -> Self {
        self.reports.extend(reports);
        self
    }

    pub(crate) fn set_handle(&mut self, record: HandleRecord) {
        self.handle = Some(record);
    }

    /// Append a report. Reports keep production order.
    pub fn push_report(&mut self, report: Report) {
        self.reports.push(report);
    }

    pub fn case(&self) -> &Arc<TestCase> {
        &self.case
    }

    pub fn conflict(&self) -> Option<&ModifierConflict> {
        self.conflict.as_ref()
    }

    /// True when more results for the same case follow.
    pub fn is_continuing(&self) -> bool {
        self.continuing
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skipped.as_deref()
    }

    pub fn is_reversed(&self) -> bool {
        self.reverse.unwrap_or(false)
    }

    /// The Handle this result came from, for rendering parameters and
    /// location. `None` for skipped and conflicted results.
    pub fn handle(&self) -> Option<&HandleRecord> {
        self.handle.as_ref()
    }

    pub fn iter_reports(&self) -> std::slice::Iter<'_, Report> {
        self.reports.iter()
    }

    /// The first failing report: "the" failure for summaries.
    pub fn failure_report(&self) -> Option<&Report> {
        self.reports.iter().find(|report| report.is_failing())
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    pub fn is_conflicted(&self) -> bool {
        self.conflict.is_some()
    }

    pub fn is_passed(&self) -> bool {
        if self.is_skipped() {
            return true;
        }
        if self.is_conflicted() {
            return false;
        }
        let clean = self.failure_report().is_none();
        clean ^ self.is_reversed()
    }

    pub fn is_failed(&self) -> bool {
        !self.is_skipped() && !self.is_conflicted() && !self.is_passed()
    }

    pub fn is_informal(&self) -> bool {
        self.failure_report().is_none() && self.reports.iter().any(Report::is_informal)
    }

    pub fn classification(&self) -> Classification {
        if self.is_skipped() {
            Classification::Skipped
        } else if self.is_conflicted() {
            Classification::Conflicted
        } else if self.is_failed() {
            Classification::Failed
        } else if self.is_informal() {
            Classification::Informal
        } else {
            Classification::Passed
        }
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            name: self.case.name().to_string(),
            file: self.case.file().to_path_buf(),
            classification: self.classification(),
            continuing: self.continuing,
            skipped: self.skipped.clone(),
            conflict: self.conflict.as_ref().map(ToString::to_string),
            modifiers: self
                .handle
                .as_ref()
                .map(|record| record.modifiers().iter().map(ToString::to_string).collect())
                .unwrap_or_default(),
            reports: self.reports.clone(),
        }
    }
}

/// Serializable snapshot of a result for external reporters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub name: String,
    pub file: PathBuf,
    pub classification: Classification,
    pub continuing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<String>,
    pub modifiers: Vec<String>,
    pub reports: Vec<Report>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::modifier::Modifier;
    use crate::test_support::returning_case;
    use serde_json::json;

    fn result() -> CaseResult {
        CaseResult::new(returning_case("t", json!(null)))
    }

    fn assertion() -> Report {
        Report::Asserting {
            exception: Exception::assertion("nope"),
        }
    }

    fn output() -> Report {
        Report::Output {
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            truncated: 0,
        }
    }

    #[test]
    fn clean_result_passes() {
        let result = result();
        assert!(result.is_passed());
        assert!(!result.is_failed());
        assert_eq!(result.classification(), Classification::Passed);
    }

    #[test]
    fn failing_report_fails() {
        let result = result().with_reports([output(), assertion()]);
        assert!(result.is_failed());
        assert_eq!(result.failure_report(), Some(&assertion()));
        assert_eq!(result.iter_reports().count(), 2);
    }

    #[test]
    fn informal_only_is_passed_and_informal() {
        let result = result().with_reports([output()]);
        assert!(result.is_passed());
        assert!(result.is_informal());
        assert_eq!(result.classification(), Classification::Informal);
    }

    #[test]
    fn reverse_inverts_verdict() {
        let clean = result().with_reverse(true);
        assert!(clean.is_failed());
        let failing = result().with_reverse(true).with_reports([assertion()]);
        assert!(failing.is_passed());
    }

    #[test]
    fn skipped_passes_even_when_reversed() {
        let result = CaseResult::skipped(returning_case("t", json!(1)), "later").with_reverse(true);
        assert!(result.is_passed());
        assert!(!result.is_failed());
        assert_eq!(result.classification(), Classification::Skipped);
    }

    #[test]
    fn conflicted_is_neither_passed_nor_failed() {
        let conflict = ModifierConflict {
            primary: Modifier::garbage_collect(false, false),
            secondary: None,
            reason: "never".to_string(),
        };
        let result = CaseResult::conflicted(returning_case("t", json!(1)), conflict);
        assert!(!result.is_passed());
        assert!(!result.is_failed());
        assert_eq!(result.classification(), Classification::Conflicted);
    }

    #[test]
    fn report_kinds() {
        assert_eq!(
            Report::unexpected(Exception::value_error("x")).kind(),
            ReportKind::UnexpectedException
        );
        let mismatch = Report::Returning {
            expected: json!(1),
            actual: ResultState::Returned(json!(2)),
        };
        assert_eq!(mismatch.kind(), ReportKind::ExpectationMismatch);
        assert!(mismatch.exception().is_none());
        assert!(output().is_informal());
    }

    #[test]
    fn summary_serializes_reports_by_kind() {
        let summary = result().with_reports([assertion()]).summary();
        let value = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(value["classification"], json!("failed"));
        assert_eq!(value["reports"][0]["kind"], json!("asserting"));
        assert!(value.get("skipped").is_none());
    }
}
