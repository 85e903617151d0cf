//! Result recorder and report builder.
//!
//! Outcomes are appended in execution order and never rewritten. The summary and the
//! line-oriented report text are derived from the recorded list when the run finalizes.

use std::fmt::Write as _;

use weft_types::{RunReport, StepResult};

/// How a run reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// Every declared step was processed.
    Completed,
    /// A failure under a stopping policy halted the run.
    Stopped,
    Canceled,
}

/// Append-only list of step outcomes for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRecorder {
    results: Vec<StepResult>,
}

impl ResultRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: StepResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn into_results(self) -> Vec<StepResult> {
        self.results
    }
}

/// One-line summary of a finished run.
///
/// - no failures: `N/T steps passed[, M skipped]`
/// - stopped at the last recorded failure: `failed at step i/T (label): message`
/// - continued past failures: `F of T steps failed`
/// - canceled: `canceled at step X/Y`, X being the step after the last completed result
pub fn summarize(results: &[StepResult], total_steps: usize, end: RunEnd) -> String {
    if end == RunEnd::Canceled {
        let position = (results.len() + 1).min(total_steps.max(1));
        return format!("canceled at step {position}/{total_steps}");
    }

    let failures = results.iter().filter(|result| result.is_failure()).count();
    if failures == 0 {
        let passed = results.iter().filter(|result| result.is_success()).count();
        let skipped = results.iter().filter(|result| result.is_skipped()).count();
        let mut summary = format!("{passed}/{} steps passed", results.len());
        if skipped > 0 {
            let _ = write!(summary, ", {skipped} skipped");
        }
        return summary;
    }

    match results.last() {
        Some(last) if end == RunEnd::Stopped && last.is_failure() => format!(
            "failed at step {}/{} ({}): {}",
            last.step_index + 1,
            total_steps,
            last.display_label(),
            last.message.as_deref().unwrap_or("step failed")
        ),
        _ => format!("{failures} of {} steps failed", results.len()),
    }
}

/// Live status string shown while a step is in flight.
pub fn status_line(step_index: usize, total_steps: usize, label: &str) -> String {
    format!("step {}/{}: {}", step_index + 1, total_steps, label)
}

/// Renders one line per result, ordered by declared step.
pub fn render_report(report: &RunReport) -> String {
    let mut ordered: Vec<&StepResult> = report.results.iter().collect();
    ordered.sort_by_key(|result| result.step_index);

    let mut text = String::new();
    for result in ordered {
        let _ = write!(
            text,
            "[{}] {}/{} {}",
            result.status.as_str(),
            result.step_index + 1,
            report.total_steps,
            result.display_label()
        );
        if !result.status_text.is_empty() {
            let _ = write!(text, " | {}", result.status_text);
        }
        if result.duration_ms > 0 {
            let _ = write!(text, " | {}ms", result.duration_ms);
        }
        if let Some(message) = &result.message {
            let _ = write!(text, " | {message}");
        }
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use weft_types::{Iteration, RunOrigin, RunStatus, StepStatus};

    fn result(step_index: usize, status: StepStatus, message: Option<&str>) -> StepResult {
        StepResult {
            step_index,
            step_label: format!("step-{}", step_index + 1),
            request: None,
            branch: None,
            status,
            status_text: String::new(),
            duration_ms: 0,
            message: message.map(str::to_string),
            response: None,
            iteration: None,
            error: None,
        }
    }

    #[test]
    fn all_passed_reports_counts_and_skips() {
        let results = vec![result(0, StepStatus::Succeeded, None), result(1, StepStatus::Succeeded, None)];
        assert_eq!(summarize(&results, 2, RunEnd::Completed), "2/2 steps passed");

        let with_skip = vec![result(0, StepStatus::Succeeded, None), result(1, StepStatus::Skipped, Some("no @if branch matched"))];
        assert_eq!(summarize(&with_skip, 2, RunEnd::Completed), "1/2 steps passed, 1 skipped");
    }

    #[test]
    fn stopped_failure_names_the_step_with_branch_and_iteration() {
        let mut failed = result(1, StepStatus::Failed, Some("expected status code 200, got 500"));
        failed.step_label = "route".into();
        failed.branch = Some("EuCheckout".into());
        failed.iteration = Some(Iteration { index: 2, total: 5 });
        let results = vec![result(0, StepStatus::Succeeded, None), failed];

        assert_eq!(
            summarize(&results, 3, RunEnd::Stopped),
            "failed at step 2/3 (route → EuCheckout (2/5)): expected status code 200, got 500"
        );
    }

    #[test]
    fn continued_failures_report_only_the_count() {
        let results = vec![
            result(0, StepStatus::Failed, Some("boom")),
            result(1, StepStatus::Succeeded, None),
            result(2, StepStatus::Failed, Some("boom")),
        ];
        assert_eq!(summarize(&results, 3, RunEnd::Completed), "2 of 3 steps failed");
    }

    #[test]
    fn canceled_reports_the_in_flight_step() {
        let results = vec![result(0, StepStatus::Succeeded, None)];
        assert_eq!(summarize(&results, 5, RunEnd::Canceled), "canceled at step 2/5");
        assert_eq!(summarize(&[], 5, RunEnd::Canceled), "canceled at step 1/5");
    }

    #[test]
    fn report_lines_follow_declaration_order() {
        let now = Utc::now();
        let mut second = result(1, StepStatus::Failed, Some("unexpected status code 500"));
        second.status_text = "500 Internal Server Error".into();
        let report = RunReport {
            run_id: 1,
            workflow: "demo".into(),
            origin: RunOrigin::Workflow,
            status: RunStatus::Failed,
            summary: String::new(),
            results: vec![second, result(0, StepStatus::Succeeded, None)],
            total_steps: 2,
            stopped: true,
            canceled_reason: None,
            started_at: now,
            finished_at: now,
        };

        assert_eq!(
            render_report(&report),
            "[PASS] 1/2 step-1\n[FAIL] 2/2 step-2 | 500 Internal Server Error | unexpected status code 500\n"
        );
    }

    #[test]
    fn status_line_is_one_based() {
        assert_eq!(status_line(0, 3, "Login"), "step 1/3: Login");
    }
}
