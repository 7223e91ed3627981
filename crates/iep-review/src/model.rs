use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Error,
}

/// An uploaded IEP and whatever the pipeline has produced for it so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub upload_date: DateTime<Utc>,
    pub status: DocumentStatus,
    /// Hex SHA-256 of the uploaded bytes, when the bytes passed through this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<ExtractedData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_data: Option<RedactedData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_data: Option<ScoringData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_data: Option<FeedbackData>,
    #[serde(default)]
    pub processing_steps: Vec<ProcessingStep>,
}

impl Document {
    pub fn new(id: impl Into<String>, file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            file_size,
            upload_date: Utc::now(),
            status: DocumentStatus::Uploaded,
            content_sha256: None,
            extracted_data: None,
            redacted_data: None,
            scoring_data: None,
            feedback_data: None,
            processing_steps: Vec::new(),
        }
    }
}

/// Student and school fields pulled from the intake response.
///
/// `raw_response` is always the agent text verbatim; every other field is best-effort and
/// may be a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedData {
    pub student_name: String,
    pub grade_level: String,
    pub school_name: String,
    pub iep_date: String,
    pub next_review_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub accommodations: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    pub raw_response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedData {
    pub redacted_content: String,
    pub qa_report: String,
    pub pii_removed: bool,
    pub compliance_status: String,
    pub raw_response: String,
}

/// Overall score plus per-category breakdown. `score <= max_score` is not enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringData {
    pub overall_score: u32,
    pub max_score: u32,
    pub compliance_level: String,
    pub detailed_scores: Vec<DetailedScore>,
    pub raw_response: String,
}

impl ScoringData {
    /// Score as a percentage of the maximum, if there is a maximum.
    pub fn percentage(&self) -> Option<f64> {
        (self.max_score > 0).then(|| f64::from(self.overall_score) * 100.0 / f64::from(self.max_score))
    }

    pub fn is_compliant(&self) -> bool {
        Compliance::from_label(&self.compliance_level) == Compliance::Compliant
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedScore {
    pub category: String,
    pub score: u32,
    pub max_score: u32,
    pub feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Approve,
    Revise,
    Reject,
}

impl Recommendation {
    /// Approve at 80% and above, revise at 60% and above, reject below.
    pub fn from_percentage(percent: f64) -> Self {
        if percent >= 80.0 {
            Recommendation::Approve
        } else if percent >= 60.0 {
            Recommendation::Revise
        } else {
            Recommendation::Reject
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compliance {
    Compliant,
    #[serde(rename = "Non-Compliant", alias = "Non-compliant")]
    NonCompliant,
}

impl Compliance {
    /// Interpret a free-form compliance label or a Y/N rating.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "compliant" | "fully compliant" | "y" | "yes" => Compliance::Compliant,
            _ => Compliance::NonCompliant,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Compliance::Compliant => "Compliant",
            Compliance::NonCompliant => "Non-Compliant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedFeedback {
    pub section: String,
    pub issue: String,
    pub recommendation: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackData {
    pub feedback_summary: String,
    pub detailed_feedback: Vec<DetailedFeedback>,
    pub recommendation: Recommendation,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub overall_compliance: Compliance,
    #[serde(default)]
    pub rubric_scores: Vec<RubricScore>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_revision_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl FeedbackData {
    /// Sum of category totals and maxima across the rubric.
    pub fn rubric_totals(&self) -> (u32, u32) {
        self.rubric_scores.iter().fold((0, 0), |(total, max), score| {
            (
                total.saturating_add(score.total_score),
                max.saturating_add(score.max_score),
            )
        })
    }
}

/// One top-level rubric category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricScore {
    pub id: String,
    pub category: String,
    pub sub_criteria: Vec<SubCriteria>,
    pub total_score: u32,
    pub max_score: u32,
    pub is_compliant: bool,
    pub summary: String,
    pub detailed_summary: String,
}

impl RubricScore {
    /// Build a category whose total, maximum and compliance are derived from its children.
    pub fn from_sub_criteria(
        id: impl Into<String>,
        category: impl Into<String>,
        summary: impl Into<String>,
        detailed_summary: impl Into<String>,
        sub_criteria: Vec<SubCriteria>,
    ) -> Self {
        let mut score = Self {
            id: id.into(),
            category: category.into(),
            sub_criteria,
            total_score: 0,
            max_score: 0,
            is_compliant: false,
            summary: summary.into(),
            detailed_summary: detailed_summary.into(),
        };
        score.recompute();
        score
    }

    /// Re-derive totals and compliance after children change. A category without
    /// children keeps its own values.
    pub fn recompute(&mut self) {
        if self.sub_criteria.is_empty() {
            return;
        }
        self.total_score = self
            .sub_criteria
            .iter()
            .fold(0u32, |acc, c| acc.saturating_add(c.score));
        self.max_score = self
            .sub_criteria
            .iter()
            .fold(0u32, |acc, c| acc.saturating_add(c.max_score));
        self.is_compliant = self.sub_criteria.iter().all(|c| c.is_compliant);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubCriteria {
    pub id: String,
    pub name: String,
    pub score: u32,
    pub max_score: u32,
    pub is_compliant: bool,
    pub summary: String,
    pub detailed_summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

/// Whether a stage produced genuine agent output, substituted content, or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Success,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Degraded { data: T, reason: String },
    Failed { reason: String },
}

impl<T> Outcome<T> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success(_) => OutcomeKind::Success,
            Outcome::Degraded { .. } => OutcomeKind::Degraded,
            Outcome::Failed { .. } => OutcomeKind::Failed,
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Outcome::Success(data) | Outcome::Degraded { data, .. } => Some(data),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Outcome::Success(data) | Outcome::Degraded { data, .. } => Some(data),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Degraded { reason, .. } | Outcome::Failed { reason } => Some(reason),
        }
    }
}

/// One entry of the per-run audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStep {
    pub name: String,
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ProcessingStep {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            timestamp: Utc::now(),
            duration_ms: None,
            outcome: None,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criterion(id: &str, score: u32, compliant: bool) -> SubCriteria {
        SubCriteria {
            id: id.to_string(),
            name: id.to_string(),
            score,
            max_score: 2,
            is_compliant: compliant,
            summary: String::new(),
            detailed_summary: String::new(),
        }
    }

    #[test]
    fn category_totals_saturate() {
        let score = RubricScore::from_sub_criteria(
            "c",
            "Category",
            "",
            "",
            vec![criterion("a", u32::MAX, true), criterion("b", u32::MAX, true)],
        );
        assert_eq!(score.total_score, u32::MAX);
        let feedback = FeedbackData {
            rubric_scores: vec![score.clone(), score],
            ..crate::sample::sample_feedback()
        };
        assert_eq!(feedback.rubric_totals().0, u32::MAX);
    }

    #[test]
    fn category_totals_follow_children() {
        let mut score = RubricScore::from_sub_criteria(
            "c",
            "Category",
            "",
            "",
            vec![criterion("a", 2, true), criterion("b", 1, false)],
        );
        assert_eq!(score.total_score, 3);
        assert_eq!(score.max_score, 4);
        assert!(!score.is_compliant);

        score.sub_criteria[1].score = 2;
        score.sub_criteria[1].is_compliant = true;
        score.recompute();
        assert_eq!(score.total_score, 4);
        assert!(score.is_compliant);
    }

    #[test]
    fn compliance_labels() {
        assert_eq!(Compliance::from_label("Fully Compliant"), Compliance::Compliant);
        assert_eq!(Compliance::from_label(" y "), Compliance::Compliant);
        assert_eq!(Compliance::from_label("Partially Compliant"), Compliance::NonCompliant);
        assert_eq!(Compliance::from_label("Non-Compliant"), Compliance::NonCompliant);
        let json = serde_json::to_string(&Compliance::NonCompliant).unwrap();
        assert_eq!(json, "\"Non-Compliant\"");
        let parsed: Compliance = serde_json::from_str("\"Non-compliant\"").unwrap();
        assert_eq!(parsed, Compliance::NonCompliant);
    }

    #[test]
    fn recommendation_thresholds() {
        assert_eq!(Recommendation::from_percentage(80.0), Recommendation::Approve);
        assert_eq!(Recommendation::from_percentage(75.0), Recommendation::Revise);
        assert_eq!(Recommendation::from_percentage(59.9), Recommendation::Reject);
    }

    #[test]
    fn document_round_trips_through_json() {
        let mut doc = Document::new("doc_1_abc", "iep.pdf", 2048);
        doc.status = DocumentStatus::Completed;
        doc.content_sha256 = Some("ab".repeat(32));
        doc.scoring_data = Some(ScoringData {
            overall_score: 24,
            max_score: 32,
            compliance_level: "Compliant".to_string(),
            detailed_scores: vec![DetailedScore {
                category: "Assessment".to_string(),
                score: 3,
                max_score: 3,
                feedback: "ok".to_string(),
            }],
            raw_response: "Total Quality Score: 24/32".to_string(),
        });
        doc.processing_steps.push(ProcessingStep::pending("IEP Intake"));

        let json = serde_json::to_string(&doc).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["uploadDate"].is_string());
        assert_eq!(value["status"], "completed");

        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
        assert_eq!(back.upload_date, doc.upload_date);
    }

    #[test]
    fn outcome_accessors() {
        let ok: Outcome<u32> = Outcome::Success(1);
        let degraded = Outcome::Degraded {
            data: 2,
            reason: "fallback".to_string(),
        };
        let failed: Outcome<u32> = Outcome::Failed {
            reason: "timeout".to_string(),
        };
        assert_eq!(ok.kind(), OutcomeKind::Success);
        assert_eq!(degraded.data(), Some(&2));
        assert_eq!(degraded.reason(), Some("fallback"));
        assert_eq!(failed.into_data(), None);
    }
}
