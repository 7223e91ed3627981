//! Sequential agent workflow with a per-step audit trail.
//!
//! Each stage is one gateway call followed by normalization. A failed call is either replaced
//! by fallback content (the step is then tagged degraded) or, with fallbacks disabled, ends the
//! run with `success: false`. Stages never run concurrently.
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use iep_common::agent::{AgentFile, AgentKind};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::AppError;
use crate::gateway::{AgentCall, AgentGateway, GatewayError};
use crate::intake::Upload;
use crate::model::{
    Document, DocumentStatus, ExtractedData, FeedbackData, Outcome, OutcomeKind, ProcessingStep,
    RedactedData, ScoringData, StepStatus,
};
use crate::normalizer::{self, Analysis, NormalizeOptions, Normalized, ReportSource, Scored};
use crate::prompts::{self, PromptContext};
use crate::sample;

pub const AGENT_ANALYSIS_STEP: &str = "Agent Analysis";
pub const DATA_STRUCTURING_STEP: &str = "Data Structuring";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrchestrationMode {
    /// Intake, redaction, scoring and feedback, one call each.
    #[default]
    FourStage,
    /// One combined call, then local structuring.
    Single,
}

impl OrchestrationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OrchestrationMode::FourStage => "four-stage",
            OrchestrationMode::Single => "single",
        }
    }
}

impl FromStr for OrchestrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "four-stage" | "four_stage" | "fourstage" => Ok(OrchestrationMode::FourStage),
            "single" => Ok(OrchestrationMode::Single),
            other => Err(format!(
                "ORCHESTRATION_MODE must be four-stage or single, got {other:?}"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowOptions {
    pub mode: OrchestrationMode,
    /// Substitute canned records when a stage fails.
    pub fallbacks: bool,
    pub sample_rubric_fallback: bool,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            mode: OrchestrationMode::FourStage,
            fallbacks: true,
            sample_rubric_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkflowInput<'a> {
    pub document_id: &'a str,
    pub file_name: &'a str,
    /// Attached to every agent call when present.
    pub upload: Option<&'a Upload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub success: bool,
    pub document_id: String,
    pub file_name: String,
    pub extracted_data: Option<ExtractedData>,
    pub redacted_data: Option<RedactedData>,
    pub scoring_data: Option<ScoringData>,
    pub feedback_data: Option<FeedbackData>,
    pub processing_steps: Vec<ProcessingStep>,
    /// True when any step used substituted content or failed.
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowResult {
    fn new(input: &WorkflowInput<'_>) -> Self {
        Self {
            success: false,
            document_id: input.document_id.to_string(),
            file_name: input.file_name.to_string(),
            extracted_data: None,
            redacted_data: None,
            scoring_data: None,
            feedback_data: None,
            processing_steps: Vec::new(),
            degraded: false,
            error: None,
        }
    }

    fn finish(mut self, steps: Vec<ProcessingStep>, failure: Option<String>) -> Self {
        self.degraded = steps
            .iter()
            .any(|s| matches!(s.outcome, Some(OutcomeKind::Degraded | OutcomeKind::Failed)));
        self.processing_steps = steps;
        self.success = failure.is_none();
        self.error = failure;
        if self.success {
            info!(
                document_id = %self.document_id,
                degraded = self.degraded,
                "workflow completed"
            );
        } else {
            warn!(
                document_id = %self.document_id,
                error = self.error.as_deref().unwrap_or_default(),
                "workflow failed"
            );
        }
        self
    }

    /// Copy this run's records and steps onto the stored document.
    pub fn apply_to(&self, document: &mut Document) {
        document.status = if self.success {
            DocumentStatus::Completed
        } else {
            DocumentStatus::Error
        };
        document.extracted_data = self.extracted_data.clone();
        document.redacted_data = self.redacted_data.clone();
        document.scoring_data = self.scoring_data.clone();
        document.feedback_data = self.feedback_data.clone();
        document.processing_steps = self.processing_steps.clone();
    }
}

fn begin(step: &mut ProcessingStep) -> Instant {
    step.status = StepStatus::Processing;
    step.timestamp = Utc::now();
    Instant::now()
}

fn end(step: &mut ProcessingStep, started: Instant, ok: bool) {
    step.duration_ms = Some(started.elapsed().as_millis() as u64);
    step.status = if ok {
        StepStatus::Completed
    } else {
        StepStatus::Error
    };
}

/// Record an outcome on its step; `Err` carries the failure reason.
fn settle<T>(step: &mut ProcessingStep, outcome: Outcome<T>) -> Result<T, String> {
    step.outcome = Some(outcome.kind());
    step.reason = outcome.reason().map(str::to_string);
    info!(
        stage = %step.name,
        status = ?step.status,
        outcome = ?outcome.kind(),
        duration_ms = step.duration_ms.unwrap_or_default(),
        "step settled"
    );
    match outcome {
        Outcome::Success(data) | Outcome::Degraded { data, .. } => Ok(data),
        Outcome::Failed { reason } => Err(reason),
    }
}

/// The four records of one run.
struct Records {
    extracted: ExtractedData,
    redacted: RedactedData,
    scoring: ScoringData,
    feedback: FeedbackData,
}

pub struct Orchestrator {
    gateway: Arc<dyn AgentGateway>,
    options: WorkflowOptions,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn AgentGateway>, options: WorkflowOptions) -> Self {
        Self { gateway, options }
    }

    pub fn options(&self) -> WorkflowOptions {
        self.options
    }

    fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            sample_rubric_fallback: self.options.sample_rubric_fallback,
        }
    }

    /// Run the configured workflow. Only a missing document id is an error; stage failures
    /// are reported inside the result.
    pub async fn run(&self, input: WorkflowInput<'_>) -> Result<WorkflowResult, AppError> {
        if input.document_id.trim().is_empty() {
            return Err(AppError::BadRequest("Document ID is required".to_string()));
        }
        info!(
            document_id = %input.document_id,
            mode = self.options.mode.as_str(),
            with_file = input.upload.is_some(),
            "workflow started"
        );

        let file = input
            .upload
            .map(|u| AgentFile::encode(&u.file_name, &u.mime_type, &u.bytes));
        let ctx = PromptContext {
            document_id: input.document_id,
            file_name: input.file_name,
            file_size: input.upload.map(Upload::size),
        };

        let result = match self.options.mode {
            OrchestrationMode::FourStage => self.run_four_stage(&input, &ctx, file.as_ref()).await,
            OrchestrationMode::Single => self.run_single(&input, &ctx, file.as_ref()).await,
        };
        Ok(result)
    }

    async fn invoke_step(
        &self,
        step: &mut ProcessingStep,
        call: AgentCall<'_>,
    ) -> Result<String, GatewayError> {
        let started = begin(step);
        let result = self.gateway.invoke(call).await;
        end(step, started, result.is_ok());
        result.map(|reply| reply.text)
    }

    fn recover<T>(&self, err: &GatewayError, fallback: impl FnOnce(&str) -> T) -> Outcome<T> {
        let reason = err.to_string();
        if self.options.fallbacks {
            Outcome::Degraded {
                data: fallback(&reason),
                reason,
            }
        } else {
            Outcome::Failed { reason }
        }
    }

    fn fallback_scored(&self, reason: &str) -> Normalized<Scored> {
        let sample_rubric = self.options.sample_rubric_fallback;
        Normalized {
            data: Scored {
                scoring: sample::fallback_scoring(reason),
                rubric: if sample_rubric {
                    sample::sample_rubric()
                } else {
                    Vec::new()
                },
                notes: None,
            },
            source: ReportSource::Defaults,
            sample_rubric,
        }
    }

    async fn run_four_stage(
        &self,
        input: &WorkflowInput<'_>,
        ctx: &PromptContext<'_>,
        file: Option<&AgentFile>,
    ) -> WorkflowResult {
        let mut result = WorkflowResult::new(input);
        let mut steps: Vec<ProcessingStep> = AgentKind::ALL
            .iter()
            .map(|kind| ProcessingStep::pending(kind.label()))
            .collect();
        let call = |kind: AgentKind| AgentCall {
            kind,
            document_id: input.document_id,
            message: prompts::stage_prompt(kind, ctx),
            file,
        };

        let outcome = match self.invoke_step(&mut steps[0], call(AgentKind::Intake)).await {
            Ok(text) => Analysis::from_text(&text).extracted().into_outcome(),
            Err(e) => self.recover(&e, sample::fallback_extracted),
        };
        match settle(&mut steps[0], outcome) {
            Ok(data) => result.extracted_data = Some(data),
            Err(reason) => return result.finish(steps, Some(reason)),
        }

        let outcome = match self.invoke_step(&mut steps[1], call(AgentKind::Redaction)).await {
            Ok(text) => Analysis::from_text(&text).redacted().into_outcome(),
            Err(e) => self.recover(&e, sample::fallback_redacted),
        };
        match settle(&mut steps[1], outcome) {
            Ok(data) => result.redacted_data = Some(data),
            Err(reason) => return result.finish(steps, Some(reason)),
        }

        let outcome = match self.invoke_step(&mut steps[2], call(AgentKind::Scoring)).await {
            Ok(text) => Analysis::from_text(&text)
                .scored(self.normalize_options())
                .tagged(),
            Err(e) => self.recover(&e, |reason| self.fallback_scored(reason)),
        };
        let scored = match settle(&mut steps[2], outcome) {
            Ok(scored) => scored,
            Err(reason) => return result.finish(steps, Some(reason)),
        };
        result.scoring_data = Some(scored.data.scoring.clone());

        let outcome = match self.invoke_step(&mut steps[3], call(AgentKind::Feedback)).await {
            Ok(text) => Analysis::from_text(&text).feedback(&scored).into_outcome(),
            Err(e) => self.recover(&e, |reason| feedback_from_score(&scored, reason)),
        };
        match settle(&mut steps[3], outcome) {
            Ok(data) => result.feedback_data = Some(data),
            Err(reason) => return result.finish(steps, Some(reason)),
        }

        result.finish(steps, None)
    }

    async fn run_single(
        &self,
        input: &WorkflowInput<'_>,
        ctx: &PromptContext<'_>,
        file: Option<&AgentFile>,
    ) -> WorkflowResult {
        let mut result = WorkflowResult::new(input);
        let mut steps = vec![
            ProcessingStep::pending(AGENT_ANALYSIS_STEP),
            ProcessingStep::pending(DATA_STRUCTURING_STEP),
        ];
        let call = AgentCall {
            kind: AgentKind::Scoring,
            document_id: input.document_id,
            message: prompts::combined_prompt(ctx),
            file,
        };

        let (records, structuring) = match self.invoke_step(&mut steps[0], call).await {
            Ok(text) => {
                // Analysis itself succeeded; structuring carries any degradation.
                let _ = settle(&mut steps[0], Outcome::Success(()));
                let started = begin(&mut steps[1]);
                let report = normalizer::normalize_report(&text, self.normalize_options());
                let mut reasons: Vec<String> = Vec::new();
                for reason in [
                    report.extracted.degraded_reason(),
                    report.redacted.degraded_reason(),
                    report.scored.degraded_reason(),
                    report.feedback.degraded_reason(),
                ]
                .into_iter()
                .flatten()
                {
                    if !reasons.contains(&reason) {
                        reasons.push(reason);
                    }
                }
                end(&mut steps[1], started, true);
                let records = Records {
                    extracted: report.extracted.data,
                    redacted: report.redacted.data,
                    scoring: report.scored.data.scoring,
                    feedback: report.feedback.data,
                };
                let structuring = if reasons.is_empty() {
                    Outcome::Success(())
                } else {
                    Outcome::Degraded {
                        data: (),
                        reason: reasons.join("; "),
                    }
                };
                (records, structuring)
            }
            Err(e) => {
                let sample_rubric = self.options.sample_rubric_fallback;
                let outcome = self.recover(&e, |reason| Records {
                    extracted: sample::fallback_extracted(reason),
                    redacted: sample::fallback_redacted(reason),
                    scoring: sample::fallback_scoring(reason),
                    feedback: sample::fallback_feedback(reason, sample_rubric),
                });
                let records = match settle(&mut steps[0], outcome) {
                    Ok(records) => records,
                    Err(reason) => return result.finish(steps, Some(reason)),
                };
                let started = begin(&mut steps[1]);
                end(&mut steps[1], started, true);
                let structuring = Outcome::Degraded {
                    data: (),
                    reason: "fallback data substituted".to_string(),
                };
                (records, structuring)
            }
        };
        let _ = settle(&mut steps[1], structuring);

        result.extracted_data = Some(records.extracted);
        result.redacted_data = Some(records.redacted);
        result.scoring_data = Some(records.scoring);
        result.feedback_data = Some(records.feedback);
        result.finish(steps, None)
    }
}

/// Feedback derived from the score alone, for when the feedback agent is unavailable.
fn feedback_from_score(scored: &Normalized<Scored>, reason: &str) -> FeedbackData {
    let mut feedback = Analysis::from_text("").feedback(scored).data;
    feedback.feedback_summary = format!(
        "Feedback could not be generated ({reason}); the recommendation follows the rubric score."
    );
    feedback.raw_response = Some(format!("Feedback failed - using fallback data ({reason})"));
    feedback
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::future::BoxFuture;
    use iep_common::agent::{AgentClientError, AgentReply};
    use serde_json::json;

    use super::*;
    use crate::model::{Compliance, Recommendation};

    /// Replies in order; `None` is a timeout.
    struct ScriptedGateway {
        replies: Mutex<VecDeque<Option<String>>>,
        calls: Mutex<Vec<(AgentKind, bool)>>,
    }

    impl ScriptedGateway {
        fn new(replies: Vec<Option<&str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(AgentKind, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl AgentGateway for ScriptedGateway {
        fn invoke<'a>(
            &'a self,
            call: AgentCall<'a>,
        ) -> BoxFuture<'a, Result<AgentReply, GatewayError>> {
            self.calls.lock().unwrap().push((call.kind, call.file.is_some()));
            let next = self.replies.lock().unwrap().pop_front().flatten();
            Box::pin(async move {
                match next {
                    Some(text) => Ok(AgentReply::from_value(json!({ "response": text }))),
                    None => Err(GatewayError::Agent(AgentClientError::Timeout(
                        Duration::from_secs(60),
                    ))),
                }
            })
        }
    }

    const SCORING_REPLY: &str = r#"{"student_info": {"name": "Jordan Lee"},
        "indicator_evaluations": [
            {"indicator": "1.1", "description": "Invited", "quality_rating": 3, "compliance_rating": "Y", "justification": "ok"},
            {"indicator": "2.1", "description": "Assessments", "quality_rating": 3, "compliance_rating": "Y", "justification": "ok"}
        ],
        "total_quality_score": 6, "overall_compliance": "Compliant", "notes": "Strong plan."}"#;

    fn input<'a>(document_id: &'a str) -> WorkflowInput<'a> {
        WorkflowInput {
            document_id,
            file_name: "plan.pdf",
            upload: None,
        }
    }

    fn orchestrator(gateway: Arc<ScriptedGateway>, options: WorkflowOptions) -> Orchestrator {
        Orchestrator::new(gateway, options)
    }

    #[tokio::test]
    async fn four_stages_run_in_order() {
        let gateway = ScriptedGateway::new(vec![
            Some(r#"{"studentName": "Jordan Lee", "gradeLevel": "11", "schoolName": "Central High", "goals": ["Graduate"]}"#),
            Some(r#"{"redactedContent": "[REDACTED]", "qaReport": "clean", "piiRemoved": true, "complianceStatus": "Compliant"}"#),
            Some(SCORING_REPLY),
            Some("Recommendation: Approve. The plan is complete."),
        ]);
        let result = orchestrator(Arc::clone(&gateway), WorkflowOptions::default())
            .run(input("doc_1_abc"))
            .await
            .unwrap();

        let kinds: Vec<_> = gateway.calls().into_iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, AgentKind::ALL.to_vec());
        assert!(result.success);
        assert!(!result.degraded);
        assert!(result.error.is_none());
        let names: Vec<_> = result.processing_steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["IEP Intake", "Redaction & QA", "Rubric Scoring", "Feedback & Routing"]);
        assert!(result
            .processing_steps
            .iter()
            .all(|s| s.status == StepStatus::Completed && s.outcome == Some(OutcomeKind::Success)));
        assert!(result.processing_steps.iter().all(|s| s.duration_ms.is_some()));

        assert_eq!(result.extracted_data.unwrap().goals, vec!["Graduate"]);
        assert_eq!(result.scoring_data.unwrap().overall_score, 6);
        let feedback = result.feedback_data.unwrap();
        assert_eq!(feedback.recommendation, Recommendation::Approve);
        assert_eq!(feedback.overall_compliance, Compliance::Compliant);
        assert_eq!(feedback.rubric_scores.len(), 2);
    }

    #[tokio::test]
    async fn gateway_failure_substitutes_fallback() {
        let gateway = ScriptedGateway::new(vec![None, None, None, None]);
        let result = orchestrator(gateway, WorkflowOptions::default())
            .run(input("doc_2_abc"))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.degraded);
        let intake = &result.processing_steps[0];
        assert_eq!(intake.status, StepStatus::Error);
        assert_eq!(intake.outcome, Some(OutcomeKind::Degraded));
        assert!(intake.reason.as_deref().unwrap().contains("timeout"));
        let extracted = result.extracted_data.unwrap();
        assert_eq!(extracted.student_name, sample::DEFAULT_STUDENT_NAME);
        assert_eq!(result.feedback_data.unwrap().rubric_totals(), (23, 36));
    }

    #[tokio::test]
    async fn disabled_fallbacks_fail_the_run() {
        let gateway = ScriptedGateway::new(vec![Some("Student: Ana"), None]);
        let options = WorkflowOptions {
            fallbacks: false,
            ..WorkflowOptions::default()
        };
        let result = orchestrator(Arc::clone(&gateway), options)
            .run(input("doc_3_abc"))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(gateway.calls().len(), 2);
        assert_eq!(result.processing_steps[1].outcome, Some(OutcomeKind::Failed));
        assert_eq!(result.processing_steps[2].status, StepStatus::Pending);
        assert!(result.extracted_data.is_some());
        assert!(result.redacted_data.is_none());
    }

    #[tokio::test]
    async fn empty_document_id_is_rejected() {
        let gateway = ScriptedGateway::new(vec![]);
        let err = orchestrator(Arc::clone(&gateway), WorkflowOptions::default())
            .run(input("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(gateway.calls().is_empty());
    }

    struct ThrottledGateway;

    impl AgentGateway for ThrottledGateway {
        fn invoke<'a>(
            &'a self,
            _call: AgentCall<'a>,
        ) -> BoxFuture<'a, Result<AgentReply, GatewayError>> {
            Box::pin(async {
                Err(GatewayError::RateLimited(crate::rate_limit::Throttled {
                    rps: 2,
                    retry_after: Duration::from_millis(1_250),
                }))
            })
        }
    }

    #[tokio::test]
    async fn rate_limited_steps_say_so() {
        let result = Orchestrator::new(Arc::new(ThrottledGateway), WorkflowOptions::default())
            .run(input("doc_5_abc"))
            .await
            .unwrap();

        assert!(result.degraded);
        for step in &result.processing_steps {
            assert_eq!(step.outcome, Some(OutcomeKind::Degraded));
            let reason = step.reason.as_deref().unwrap();
            assert!(reason.starts_with("rate limited:"), "{reason}");
            assert!(reason.contains("1250ms"), "{reason}");
        }
    }

    #[tokio::test]
    async fn single_mode_structures_one_reply() {
        let gateway = ScriptedGateway::new(vec![Some(SCORING_REPLY)]);
        let options = WorkflowOptions {
            mode: OrchestrationMode::Single,
            ..WorkflowOptions::default()
        };
        let upload = Upload {
            file_name: "plan.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            bytes: b"%PDF-1.4".to_vec(),
        };
        let result = orchestrator(Arc::clone(&gateway), options)
            .run(WorkflowInput {
                document_id: "doc_4_abc",
                file_name: "plan.pdf",
                upload: Some(&upload),
            })
            .await
            .unwrap();

        assert_eq!(gateway.calls(), vec![(AgentKind::Scoring, true)]);
        let names: Vec<_> = result.processing_steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![AGENT_ANALYSIS_STEP, DATA_STRUCTURING_STEP]);
        assert!(result.success);
        assert!(!result.degraded);
        assert_eq!(result.extracted_data.unwrap().student_name, "Jordan Lee");
    }

    #[tokio::test]
    async fn defaults_only_reply_is_degraded() {
        let gateway = ScriptedGateway::new(vec![Some("Sorry, I cannot help with that.")]);
        let options = WorkflowOptions {
            mode: OrchestrationMode::Single,
            ..WorkflowOptions::default()
        };
        let result = orchestrator(gateway, options).run(input("doc_5_abc")).await.unwrap();
        assert!(result.success);
        assert!(result.degraded);
        assert_eq!(result.processing_steps[0].outcome, Some(OutcomeKind::Success));
        assert_eq!(result.processing_steps[1].outcome, Some(OutcomeKind::Degraded));
    }

    #[test]
    fn result_applies_to_document() {
        let mut doc = Document::new("doc_6_abc", "plan.pdf", 10);
        let mut result = WorkflowResult::new(&input("doc_6_abc"));
        result.success = true;
        result.extracted_data = Some(sample::fallback_extracted("x"));
        result.processing_steps = vec![ProcessingStep::pending("IEP Intake")];
        result.apply_to(&mut doc);
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert!(doc.extracted_data.is_some());
        assert_eq!(doc.processing_steps.len(), 1);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("four-stage".parse::<OrchestrationMode>(), Ok(OrchestrationMode::FourStage));
        assert_eq!("Single".parse::<OrchestrationMode>(), Ok(OrchestrationMode::Single));
        assert!("parallel".parse::<OrchestrationMode>().is_err());
    }
}
