//! Turn agent reply text into typed records.
//!
//! Three tiers, in priority order: an embedded JSON object with a known shape, a battery of
//! independent text patterns, and the placeholder defaults in [`crate::sample`]. A structured
//! object always wins over pattern matches. Results carry their provenance so the
//! orchestrator can tag anything built from defaults as degraded.
use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::json_scan;
use crate::model::{
    Compliance, DetailedFeedback, DetailedScore, ExtractedData, FeedbackData, Outcome, Priority,
    Recommendation, RedactedData, RubricScore, ScoringData, SubCriteria,
};
use crate::sample::{self, SCORE_CATEGORIES};

/// Top-level keys that mark a structured review object.
pub const REPORT_KEYS: [&str; 5] = [
    "student_info",
    "indicator_evaluations",
    "total_quality_score",
    "overall_compliance",
    "studentName",
];
const REDACTION_KEYS: [&str; 4] = ["redactedContent", "redacted_content", "qaReport", "qa_report"];

const INDICATOR_MAX: u32 = 3;
/// Quality score ceiling assumed when a structured reply carries neither a max nor indicators.
const STRUCTURED_DEFAULT_MAX: u32 = 32;
const SUMMARY_CHARS: usize = 500;

const INDICATOR_CATEGORIES: [&str; 8] = [
    "Student Participation",
    "Assessment",
    "Postsecondary Goals",
    "Annual Goals",
    "Transition Services",
    "Course of Study",
    "Agency Participation",
    "Internal Consistency",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    /// Substitute the sample rubric when no criteria were recovered.
    pub sample_rubric_fallback: bool,
}

/// Which tier produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSource {
    Structured,
    TextPatterns,
    Defaults,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub data: T,
    pub source: ReportSource,
    pub sample_rubric: bool,
}

impl<T> Normalized<T> {
    fn new(data: T, source: ReportSource) -> Self {
        Self {
            data,
            source,
            sample_rubric: false,
        }
    }

    pub fn degraded_reason(&self) -> Option<String> {
        if self.source == ReportSource::Defaults {
            Some("agent reply had no recognizable fields; defaults applied".to_string())
        } else if self.sample_rubric {
            Some("no rubric criteria in agent reply; sample rubric substituted".to_string())
        } else {
            None
        }
    }

    /// Tag the whole record, keeping its provenance.
    pub fn tagged(self) -> Outcome<Self> {
        match self.degraded_reason() {
            Some(reason) => Outcome::Degraded { data: self, reason },
            None => Outcome::Success(self),
        }
    }

    pub fn into_outcome(self) -> Outcome<T> {
        match self.degraded_reason() {
            Some(reason) => Outcome::Degraded {
                data: self.data,
                reason,
            },
            None => Outcome::Success(self.data),
        }
    }
}

/// Scoring record plus the rubric tree and reviewer notes that came with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub scoring: ScoringData,
    pub rubric: Vec<RubricScore>,
    pub notes: Option<String>,
}

/// All four records normalized from one combined reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub extracted: Normalized<ExtractedData>,
    pub redacted: Normalized<RedactedData>,
    pub scored: Normalized<Scored>,
    pub feedback: Normalized<FeedbackData>,
}

pub fn normalize_report(text: &str, options: NormalizeOptions) -> Report {
    let analysis = Analysis::from_text(text);
    let scored = analysis.scored(options);
    let feedback = analysis.feedback(&scored);
    Report {
        extracted: analysis.extracted(),
        redacted: analysis.redacted(),
        scored,
        feedback,
    }
}

struct Patterns {
    student: Regex,
    grade: Regex,
    school: Regex,
    iep_date: Regex,
    review_date: Regex,
    total_quality: Regex,
    overall_score: Regex,
    compliance_rating: Regex,
    compliance: Regex,
    recommendation: Regex,
    ratio: Regex,
    categories: Vec<Regex>,
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| {
    let label = |name: &str| format!(r"(?i)\b{name}\**\s*:\s*\**\s*([^,\n]+)");
    let number = |name: &str| format!(r"(?i)\b{name}\**\s*:?\s*\**\s*(\d+)");
    Patterns {
        student: Regex::new(&label(r"student(?:\s+name)?")).expect("valid regex"),
        grade: Regex::new(&label(r"grade(?:\s+level)?")).expect("valid regex"),
        school: Regex::new(&label(r"school(?:\s+name)?")).expect("valid regex"),
        iep_date: Regex::new(&label(r"iep\s+date")).expect("valid regex"),
        review_date: Regex::new(&label(r"(?:next\s+)?review\s+date")).expect("valid regex"),
        total_quality: Regex::new(
            r"(?i)total\s+quality\s+score\**\s*:?\s*\**\s*(\d+)\s*/\s*(\d+)",
        )
        .expect("valid regex"),
        overall_score: Regex::new(r"(?i)overall\s*score\**\s*:?\s*\**\s*(\d+)(?:\s*/\s*(\d+))?")
            .expect("valid regex"),
        compliance_rating: Regex::new(
            r"(?i)overall\s+compliance\s+rating\**\s*:?\s*\**\s*([YN])\b",
        )
        .expect("valid regex"),
        compliance: Regex::new(&label(r"compliance(?:\s+level)?")).expect("valid regex"),
        recommendation: Regex::new(
            r"(?i)\b(?:recommendation|recommended\s+action)\**\s*:\s*\**\s*(approve|revise|reject)\b",
        )
        .expect("valid regex"),
        ratio: Regex::new(r"^\s*(\d+)\s*/\s*(\d+)\s*$").expect("valid regex"),
        categories: SCORE_CATEGORIES
            .iter()
            .map(|(name, ..)| Regex::new(&number(&name.replace(' ', r"\s*"))).expect("valid regex"))
            .collect(),
    }
});

fn capture_text(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| clean(m.as_str()))
        .filter(|s| !s.is_empty())
}

fn capture_number(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn compliance_label(compliant: bool) -> String {
    if compliant {
        Compliance::Compliant.label().to_string()
    } else {
        Compliance::NonCompliant.label().to_string()
    }
}

fn clean(raw: &str) -> String {
    raw.trim_matches(|c: char| c.is_whitespace() || c == '*' || c == '"' || c == '`')
        .to_string()
}

/// First 500 characters followed by an ellipsis.
fn summarize(text: &str) -> String {
    let head: String = text.chars().take(SUMMARY_CHARS).collect();
    format!("{head}...")
}

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn list_field(map: &Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn number_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u32)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_yes(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => Compliance::from_label(s) == Compliance::Compliant,
        _ => false,
    }
}

/// One `indicator_evaluations` entry.
struct Indicator {
    id: String,
    description: String,
    quality: u32,
    compliant: bool,
    justification: String,
}

impl Indicator {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let id = string_field(map, &["indicator", "id"])?;
        Some(Self {
            description: string_field(map, &["description", "name"]).unwrap_or_else(|| id.clone()),
            quality: map
                .get("quality_rating")
                .and_then(number_value)
                .map_or(0, |q| q.min(INDICATOR_MAX)),
            compliant: is_yes(map.get("compliance_rating")),
            justification: string_field(map, &["justification"]).unwrap_or_default(),
            id,
        })
    }

    /// Leading number of the dotted id, `"3.2"` is section 3.
    fn section(&self) -> Option<usize> {
        self.id.split('.').next()?.trim().parse().ok()
    }
}

/// Category name for a section number; anything outside 1..=8 is "Other".
pub fn indicator_category(section: Option<usize>) -> &'static str {
    section
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| INDICATOR_CATEGORIES.get(i).copied())
        .unwrap_or("Other")
}

fn rubric_from_indicators(indicators: &[Indicator]) -> Vec<RubricScore> {
    let mut groups: BTreeMap<usize, Vec<&Indicator>> = BTreeMap::new();
    for indicator in indicators {
        let key = indicator
            .section()
            .filter(|n| (1..=INDICATOR_CATEGORIES.len()).contains(n))
            .unwrap_or(usize::MAX);
        groups.entry(key).or_default().push(indicator);
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let category = indicator_category((key != usize::MAX).then_some(key));
            let count = members.len();
            let compliant = members.iter().filter(|i| i.compliant).count();
            let total = members.iter().fold(0u32, |acc, i| acc.saturating_add(i.quality));
            let sub_criteria = members
                .iter()
                .map(|i| SubCriteria {
                    id: i.id.clone(),
                    name: i.description.clone(),
                    score: i.quality,
                    max_score: INDICATOR_MAX,
                    is_compliant: i.compliant,
                    summary: if i.compliant { "Compliant" } else { "Non-compliant" }.to_string(),
                    detailed_summary: i.justification.clone(),
                })
                .collect();
            RubricScore::from_sub_criteria(
                category.to_lowercase().replace(' ', "_"),
                category,
                format!("{compliant}/{count} indicators compliant"),
                format!(
                    "This category includes {count} indicators with an average quality rating of {:.1}/{INDICATOR_MAX}.",
                    f64::from(total) / count as f64
                ),
                sub_criteria,
            )
        })
        .collect()
}

/// One agent reply, scanned once for an embedded structured object.
pub struct Analysis<'a> {
    text: &'a str,
    report: Option<Map<String, Value>>,
}

impl<'a> Analysis<'a> {
    pub fn from_text(text: &'a str) -> Self {
        Self {
            text,
            report: json_scan::find_object_with_keys(text, &REPORT_KEYS),
        }
    }

    pub fn is_structured(&self) -> bool {
        self.report.is_some()
    }

    pub fn extracted(&self) -> Normalized<ExtractedData> {
        let (default_iep_date, default_review_date) = sample::default_review_dates();
        let or_default = |value: Option<String>, default: &str| value.unwrap_or_else(|| default.to_string());

        if let Some(report) = &self.report {
            let empty = Map::new();
            let info = report
                .get("student_info")
                .and_then(Value::as_object)
                .unwrap_or(report);
            let intake = if report.contains_key("student_info") { &empty } else { report };
            let data = ExtractedData {
                student_name: or_default(
                    string_field(info, &["name", "studentName"]),
                    sample::DEFAULT_STUDENT_NAME,
                ),
                grade_level: or_default(
                    string_field(info, &["grade", "grade_level", "gradeLevel"]),
                    sample::DEFAULT_GRADE_LEVEL,
                ),
                school_name: or_default(
                    string_field(info, &["school", "school_name", "schoolName", "school_district"]),
                    sample::DEFAULT_SCHOOL_NAME,
                ),
                iep_date: or_default(
                    string_field(info, &["iep_date", "iepDate", "meeting_date"]),
                    &default_iep_date,
                ),
                next_review_date: or_default(
                    string_field(info, &["review_date", "next_review_date", "nextReviewDate"]),
                    &default_review_date,
                ),
                disability: string_field(info, &["disability"]),
                placement: string_field(info, &["placement"]),
                goals: list_field(intake, "goals"),
                accommodations: list_field(intake, "accommodations"),
                services: list_field(intake, "services"),
                raw_response: self.text.to_string(),
            };
            return Normalized::new(data, ReportSource::Structured);
        }

        let p = &*PATTERNS;
        let student = capture_text(&p.student, self.text);
        let grade = capture_text(&p.grade, self.text);
        let school = capture_text(&p.school, self.text);
        let source = if student.is_some() || grade.is_some() || school.is_some() {
            ReportSource::TextPatterns
        } else {
            ReportSource::Defaults
        };
        let data = ExtractedData {
            student_name: or_default(student, sample::DEFAULT_STUDENT_NAME),
            grade_level: or_default(grade, sample::DEFAULT_GRADE_LEVEL),
            school_name: or_default(school, sample::DEFAULT_SCHOOL_NAME),
            iep_date: or_default(capture_text(&p.iep_date, self.text), &default_iep_date),
            next_review_date: or_default(
                capture_text(&p.review_date, self.text),
                &default_review_date,
            ),
            disability: None,
            placement: None,
            goals: Vec::new(),
            accommodations: Vec::new(),
            services: Vec::new(),
            raw_response: self.text.to_string(),
        };
        Normalized::new(data, source)
    }

    pub fn redacted(&self) -> Normalized<RedactedData> {
        if let Some(map) = json_scan::find_object_with_keys(self.text, &REDACTION_KEYS) {
            let data = RedactedData {
                redacted_content: string_field(&map, &["redactedContent", "redacted_content"])
                    .unwrap_or_default(),
                qa_report: string_field(&map, &["qaReport", "qa_report"]).unwrap_or_default(),
                pii_removed: map
                    .get("piiRemoved")
                    .or_else(|| map.get("pii_removed"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                compliance_status: string_field(&map, &["complianceStatus", "compliance_status"])
                    .unwrap_or_else(|| "Unknown".to_string()),
                raw_response: self.text.to_string(),
            };
            return Normalized::new(data, ReportSource::Structured);
        }

        if self.report.is_some() {
            let data = RedactedData {
                redacted_content:
                    "Document processed and analyzed. Student information redacted for privacy."
                        .to_string(),
                qa_report: "Document processed and analyzed with PII redaction".to_string(),
                pii_removed: true,
                compliance_status: "Compliant".to_string(),
                raw_response: self.text.to_string(),
            };
            return Normalized::new(data, ReportSource::Structured);
        }

        if self.text.trim().is_empty() {
            let data = sample::fallback_redacted("empty agent reply");
            return Normalized::new(data, ReportSource::Defaults);
        }

        let data = RedactedData {
            redacted_content: self.text.to_string(),
            qa_report: "Document processed and analyzed".to_string(),
            pii_removed: true,
            compliance_status: capture_text(&PATTERNS.compliance, self.text)
                .unwrap_or_else(|| "Compliant".to_string()),
            raw_response: self.text.to_string(),
        };
        Normalized::new(data, ReportSource::TextPatterns)
    }

    pub fn scored(&self, options: NormalizeOptions) -> Normalized<Scored> {
        let mut result = match &self.report {
            Some(report) => self.structured_scores(report),
            None => self.pattern_scores(),
        };
        if result.data.rubric.is_empty() && options.sample_rubric_fallback {
            result.data.rubric = sample::sample_rubric();
            result.sample_rubric = true;
        }
        result
    }

    fn structured_scores(&self, report: &Map<String, Value>) -> Normalized<Scored> {
        let indicators: Vec<Indicator> = report
            .get("indicator_evaluations")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Indicator::from_value).collect())
            .unwrap_or_default();
        let rubric = rubric_from_indicators(&indicators);

        let mut overall = None;
        let mut max = report.get("max_quality_score").and_then(number_value);
        match report.get("total_quality_score") {
            Some(Value::String(s)) => {
                if let Some(caps) = PATTERNS.ratio.captures(s) {
                    overall = caps[1].parse().ok();
                    max = max.or_else(|| caps[2].parse().ok());
                } else {
                    overall = s.trim().parse().ok();
                }
            }
            Some(value) => overall = number_value(value),
            None => {}
        }
        let overall = overall.unwrap_or_else(|| {
            if indicators.is_empty() {
                sample::DEFAULT_OVERALL_SCORE
            } else {
                indicators
                    .iter()
                    .fold(0u32, |acc, i| acc.saturating_add(i.quality))
            }
        });
        let max = max.unwrap_or_else(|| {
            if indicators.is_empty() {
                STRUCTURED_DEFAULT_MAX
            } else {
                INDICATOR_MAX.saturating_mul(u32::try_from(indicators.len()).unwrap_or(u32::MAX))
            }
        });

        let compliance_level = match report.get("overall_compliance") {
            Some(Value::String(s)) if s.trim().len() == 1 => {
                Compliance::from_label(s).label().to_string()
            }
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Bool(b)) => compliance_label(*b),
            _ if !indicators.is_empty() => compliance_label(indicators.iter().all(|i| i.compliant)),
            _ => sample::DEFAULT_COMPLIANCE_LEVEL.to_string(),
        };

        let scoring = ScoringData {
            overall_score: overall,
            max_score: max,
            compliance_level,
            detailed_scores: rubric
                .iter()
                .map(|s| DetailedScore {
                    category: s.category.clone(),
                    score: s.total_score,
                    max_score: s.max_score,
                    feedback: s.detailed_summary.clone(),
                })
                .collect(),
            raw_response: self.text.to_string(),
        };
        Normalized::new(
            Scored {
                scoring,
                rubric,
                notes: string_field(report, &["notes"]),
            },
            ReportSource::Structured,
        )
    }

    fn pattern_scores(&self) -> Normalized<Scored> {
        let p = &*PATTERNS;
        let text = self.text;
        let mut matched = false;

        let (overall, max) = if let Some(caps) = p.total_quality.captures(text) {
            matched = true;
            (
                caps[1].parse().unwrap_or(sample::DEFAULT_OVERALL_SCORE),
                caps[2].parse().unwrap_or(sample::DEFAULT_MAX_SCORE),
            )
        } else if let Some(caps) = p.overall_score.captures(text) {
            matched = true;
            (
                caps[1].parse().unwrap_or(sample::DEFAULT_OVERALL_SCORE),
                caps.get(2)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(sample::DEFAULT_MAX_SCORE),
            )
        } else {
            (sample::DEFAULT_OVERALL_SCORE, sample::DEFAULT_MAX_SCORE)
        };

        let compliance_level = if let Some(rating) = capture_text(&p.compliance_rating, text) {
            matched = true;
            Compliance::from_label(&rating).label().to_string()
        } else if let Some(label) = capture_text(&p.compliance, text) {
            matched = true;
            label
        } else {
            sample::DEFAULT_COMPLIANCE_LEVEL.to_string()
        };

        let detailed_scores: Vec<DetailedScore> = SCORE_CATEGORIES
            .iter()
            .zip(&p.categories)
            .map(|((_, category, default, feedback), re)| {
                let found = capture_number(re, text);
                matched |= found.is_some();
                DetailedScore {
                    category: category.to_string(),
                    score: found.unwrap_or(*default),
                    max_score: sample::CATEGORY_MAX_SCORE,
                    feedback: feedback.to_string(),
                }
            })
            .collect();

        let source = if matched {
            ReportSource::TextPatterns
        } else {
            ReportSource::Defaults
        };
        Normalized::new(
            Scored {
                scoring: ScoringData {
                    overall_score: overall,
                    max_score: max,
                    compliance_level,
                    detailed_scores,
                    raw_response: text.to_string(),
                },
                rubric: Vec::new(),
                notes: None,
            },
            source,
        )
    }

    /// Feedback from this reply, anchored on an already normalized score.
    pub fn feedback(&self, scored: &Normalized<Scored>) -> Normalized<FeedbackData> {
        let scoring = &scored.data.scoring;
        let compliance = Compliance::from_label(&scoring.compliance_level);
        let structured = scored.source == ReportSource::Structured || self.report.is_some();
        let percent = scoring.percentage().unwrap_or(0.0);
        let confidence = if scoring.max_score == 0 {
            0.0
        } else {
            (f64::from(scoring.overall_score) / f64::from(scoring.max_score)).min(1.0)
        };

        let recommendation = if scored.source == ReportSource::Structured {
            match compliance {
                Compliance::Compliant => Recommendation::Approve,
                Compliance::NonCompliant => Recommendation::Revise,
            }
        } else {
            capture_text(&PATTERNS.recommendation, self.text)
                .and_then(|r| match r.to_ascii_lowercase().as_str() {
                    "approve" => Some(Recommendation::Approve),
                    "revise" => Some(Recommendation::Revise),
                    "reject" => Some(Recommendation::Reject),
                    _ => None,
                })
                .unwrap_or_else(|| Recommendation::from_percentage(percent))
        };

        let notes = self
            .report
            .as_ref()
            .and_then(|r| string_field(r, &["notes"]))
            .or_else(|| scored.data.notes.clone());
        let feedback_summary = match (&notes, structured) {
            (Some(notes), _) => notes.clone(),
            (None, true) => {
                "Document analysis completed with detailed indicator evaluations.".to_string()
            }
            (None, false) => summarize(self.text),
        };

        let mut detailed_feedback: Vec<DetailedFeedback> = if scored.sample_rubric {
            Vec::new()
        } else {
            scored
                .data
                .rubric
                .iter()
                .flat_map(|category| {
                    category
                        .sub_criteria
                        .iter()
                        .filter(|c| !c.is_compliant)
                        .map(move |c| DetailedFeedback {
                            section: category.category.clone(),
                            issue: format!("{} {} is non-compliant", c.id, c.name),
                            recommendation: if c.detailed_summary.is_empty() {
                                "Address this indicator before resubmitting".to_string()
                            } else {
                                c.detailed_summary.clone()
                            },
                            priority: Priority::High,
                        })
                })
                .collect()
        };
        if detailed_feedback.is_empty() {
            let (issue, priority) = match (structured, compliance) {
                (true, Compliance::Compliant) => {
                    ("Document meets compliance requirements", Priority::Medium)
                }
                (true, Compliance::NonCompliant) => ("Compliance issues identified", Priority::High),
                (false, _) => ("Document requires review", Priority::High),
            };
            detailed_feedback.push(DetailedFeedback {
                section: "Overall Analysis".to_string(),
                issue: issue.to_string(),
                recommendation: notes
                    .clone()
                    .unwrap_or_else(|| "Please review the detailed analysis provided".to_string()),
                priority,
            });
        }

        let (next_steps, revision_time) = if structured {
            (
                vec![
                    "Review the detailed indicator evaluations",
                    "Address any non-compliant indicators",
                    "Resubmit if necessary",
                ],
                if compliance == Compliance::Compliant {
                    "1 hour"
                } else {
                    "2-3 hours"
                },
            )
        } else {
            (
                vec![
                    "Review the detailed analysis",
                    "Address any identified issues",
                    "Resubmit if necessary",
                ],
                "1-2 hours",
            )
        };

        let source = if structured {
            ReportSource::Structured
        } else if self.text.trim().is_empty() {
            ReportSource::Defaults
        } else {
            ReportSource::TextPatterns
        };

        Normalized {
            data: FeedbackData {
                feedback_summary,
                detailed_feedback,
                recommendation,
                confidence,
                overall_compliance: compliance,
                rubric_scores: scored.data.rubric.clone(),
                next_steps: next_steps.into_iter().map(str::to_string).collect(),
                estimated_revision_time: Some(revision_time.to_string()),
                raw_response: Some(self.text.to_string()),
            },
            source,
            sample_rubric: scored.sample_rubric,
        }
    }
}
