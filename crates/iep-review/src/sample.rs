//! Canned content: placeholder values, the demonstration rubric and per-stage fallbacks.
//!
//! Everything here is synthetic. Callers that surface it must tag the result as degraded.
use chrono::{Duration, Utc};

use crate::model::{
    Compliance, DetailedFeedback, DetailedScore, ExtractedData, FeedbackData, Priority,
    Recommendation, RedactedData, RubricScore, ScoringData, SubCriteria,
};

pub const DEFAULT_STUDENT_NAME: &str = "Student Name";
pub const DEFAULT_GRADE_LEVEL: &str = "Grade Level";
pub const DEFAULT_SCHOOL_NAME: &str = "School Name";
pub const DEFAULT_OVERALL_SCORE: u32 = 75;
pub const DEFAULT_MAX_SCORE: u32 = 100;
pub const DEFAULT_COMPLIANCE_LEVEL: &str = "Partially Compliant";
pub const CATEGORY_MAX_SCORE: u32 = 20;

/// Text-tier score categories: label matched in the reply, display name, default score, note.
pub const SCORE_CATEGORIES: [(&str, &str, u32, &str); 6] = [
    ("present levels", "Present Levels of Performance", 16, "Current performance levels documented"),
    ("goals", "Annual Goals", 15, "Goals are measurable and appropriate"),
    ("services", "Services and Supports", 16, "Services are well-documented"),
    ("accommodations", "Accommodations and Modifications", 15, "Accommodations are appropriate"),
    ("transition", "Transition Planning", 16, "Transition planning is present"),
    ("parent participation", "Parent Participation", 15, "Parent participation documented"),
];

/// Today and one year out, as `YYYY-MM-DD`.
pub fn default_review_dates() -> (String, String) {
    let today = Utc::now().date_naive();
    let next = today + Duration::days(365);
    (today.format("%Y-%m-%d").to_string(), next.format("%Y-%m-%d").to_string())
}

pub fn default_detailed_scores() -> Vec<DetailedScore> {
    SCORE_CATEGORIES
        .iter()
        .map(|(_, category, score, feedback)| DetailedScore {
            category: category.to_string(),
            score: *score,
            max_score: CATEGORY_MAX_SCORE,
            feedback: feedback.to_string(),
        })
        .collect()
}

pub fn fallback_extracted(reason: &str) -> ExtractedData {
    let (iep_date, next_review_date) = default_review_dates();
    ExtractedData {
        student_name: DEFAULT_STUDENT_NAME.to_string(),
        grade_level: DEFAULT_GRADE_LEVEL.to_string(),
        school_name: DEFAULT_SCHOOL_NAME.to_string(),
        iep_date,
        next_review_date,
        disability: None,
        placement: None,
        goals: Vec::new(),
        accommodations: Vec::new(),
        services: Vec::new(),
        raw_response: format!("Document processing failed - using fallback data ({reason})"),
    }
}

pub fn fallback_redacted(reason: &str) -> RedactedData {
    RedactedData {
        redacted_content: "Redaction unavailable; the source document was not processed.".to_string(),
        qa_report: "QA could not be completed".to_string(),
        pii_removed: false,
        compliance_status: "Unknown".to_string(),
        raw_response: format!("Redaction failed - using fallback data ({reason})"),
    }
}

pub fn fallback_scoring(reason: &str) -> ScoringData {
    ScoringData {
        overall_score: DEFAULT_OVERALL_SCORE,
        max_score: DEFAULT_MAX_SCORE,
        compliance_level: DEFAULT_COMPLIANCE_LEVEL.to_string(),
        detailed_scores: default_detailed_scores(),
        raw_response: format!("Scoring failed - using fallback data ({reason})"),
    }
}

/// The sample feedback, optionally without its rubric tree.
pub fn fallback_feedback(reason: &str, include_rubric: bool) -> FeedbackData {
    let mut feedback = sample_feedback();
    if !include_rubric {
        feedback.rubric_scores.clear();
    }
    feedback.raw_response = Some(format!("Feedback failed - using fallback data ({reason})"));
    feedback
}

fn leaf(
    id: &str,
    name: &str,
    score: u32,
    is_compliant: bool,
    summary: &str,
    detailed_summary: &str,
) -> SubCriteria {
    SubCriteria {
        id: id.to_string(),
        name: name.to_string(),
        score,
        max_score: 2,
        is_compliant,
        summary: summary.to_string(),
        detailed_summary: detailed_summary.to_string(),
    }
}

/// Fixed eight-category demonstration rubric (18 leaves, 23/36).
pub fn sample_rubric() -> Vec<RubricScore> {
    vec![
        RubricScore::from_sub_criteria(
            "student-participation",
            "1. Student Participation and Preferences",
            "Student participation documented but missing some required elements",
            "The IEP shows evidence of student invitation to the meeting and basic documentation of preferences, but lacks comprehensive assessment methods and age of majority notification.",
            vec![
                leaf(
                    "student-invitation",
                    "1.1 Evidence of Student Invitation to IEP Meeting",
                    2,
                    true,
                    "Student was clearly invited with specific date and attended the meeting",
                    "Documentation shows student was invited on [date] and attended the IEP meeting. Meeting notes include student input and participation throughout the discussion.",
                ),
                leaf(
                    "student-preferences",
                    "1.2 Student Preferences and Interests Documentation",
                    1,
                    false,
                    "Basic documentation exists but lacks comprehensive assessment methods",
                    "Student preferences are mentioned in the IEP but only through limited assessment methods. No direct quotes from student or comprehensive evaluation across multiple domains.",
                ),
                leaf(
                    "age-majority",
                    "1.3 Age of Majority",
                    0,
                    false,
                    "No evidence of age of majority notification",
                    "Missing documentation that student and parent were informed of transfer of rights. Required notification before 17th birthday not found in IEP documentation.",
                ),
            ],
        ),
        RubricScore::from_sub_criteria(
            "transition-assessments",
            "2. Age-Appropriate Transition Assessments",
            "Comprehensive transition assessments used with clear integration",
            "Multiple age-appropriate assessments were conducted across vocational, academic, and independent living domains. Results are clearly summarized and directly connected to postsecondary goals.",
            vec![
                leaf(
                    "assessment-variety",
                    "2.1 Variety of Assessments Used",
                    2,
                    true,
                    "Multiple assessments used across different domains",
                    "Three formal assessments and two informal measures were used, covering vocational interests, academic skills, and independent living capabilities.",
                ),
                leaf(
                    "assessment-integration",
                    "2.2 Assessment Results Integration",
                    2,
                    true,
                    "Assessment results clearly summarized and connected to goals",
                    "Assessment results include specific data points and show direct alignment with identified postsecondary goals in education, employment, and independent living.",
                ),
            ],
        ),
        RubricScore::from_sub_criteria(
            "postsecondary-goals",
            "3. Measurable Postsecondary Goals",
            "Education and employment goals present but independent living goal missing",
            "Clear, measurable postsecondary goals exist for education and employment, but no independent living goal is present despite student needs indicating this would be appropriate.",
            vec![
                leaf(
                    "education-goal",
                    "3.1 Education/Training Goal",
                    2,
                    true,
                    "Specific, measurable education goal aligned with assessments",
                    "Goal states: \"After graduation, the student will enroll in community college to pursue a certificate in automotive technology.\" Goal is specific, time-bound, and based on assessment results.",
                ),
                leaf(
                    "employment-goal",
                    "3.2 Employment Goal",
                    2,
                    true,
                    "Clear employment goal with specific field identified",
                    "Goal states: \"After graduation, the student will obtain employment as an automotive technician.\" Goal is specific, measurable, and directly related to education goal.",
                ),
                leaf(
                    "independent-living-goal",
                    "3.3 Independent Living Goal (when appropriate)",
                    0,
                    false,
                    "Independent living goal missing despite clear need",
                    "Student has significant support needs in daily living skills but no independent living goal is included in the transition plan. This appears to be an oversight given the student's assessment results.",
                ),
            ],
        ),
        RubricScore::from_sub_criteria(
            "annual-iep-goals",
            "4. Annual IEP Transition Goals",
            "Goals align with postsecondary goals but lack full measurability",
            "Annual IEP goals support postsecondary goals but some lack complete condition, behavior, and criteria components required for full measurability.",
            vec![
                leaf(
                    "goal-alignment",
                    "4.1 Alignment with Postsecondary Goals",
                    2,
                    true,
                    "Multiple annual goals support each postsecondary goal",
                    "Three annual IEP goals directly support the education goal and two support the employment goal. Clear connection between annual goals and postsecondary outcomes is evident.",
                ),
                leaf(
                    "goal-measurability",
                    "4.2 Measurability of Annual Goals",
                    1,
                    false,
                    "Most goals measurable but some lack complete criteria",
                    "Two of three annual goals include complete condition, behavior, and criteria. One goal lacks specific criteria for measurement, making it difficult to determine progress.",
                ),
            ],
        ),
        RubricScore::from_sub_criteria(
            "transition-services",
            "5. Transition Services",
            "Comprehensive transition services across multiple domains",
            "Multiple transition services identified for each postsecondary goal, spanning instruction, community experiences, and employment preparation with clear timelines and responsible parties.",
            vec![
                leaf(
                    "service-comprehensiveness",
                    "5.1 Comprehensive Transition Services",
                    2,
                    true,
                    "Multiple services identified with specific details",
                    "Four transition services identified for education goal and three for employment goal, each with specific activities, timeframes, and responsible parties clearly documented.",
                ),
                leaf(
                    "service-variety",
                    "5.2 Service Variety and Relevance",
                    2,
                    true,
                    "Services span multiple domains and are highly relevant",
                    "Services cover instruction (academic support), community experiences (job shadowing), employment (work-based learning), and daily living skills (independent living training).",
                ),
            ],
        ),
        RubricScore::from_sub_criteria(
            "courses-study",
            "6. Courses of Study",
            "Basic course plan exists but lacks multi-year detail",
            "General course areas identified but specific multi-year course planning is missing. Course selection shows some alignment with postsecondary goals but could be more comprehensive.",
            vec![
                leaf(
                    "multi-year-planning",
                    "6.1 Multi-Year Course Planning",
                    1,
                    false,
                    "Basic plan exists but lacks specific course details",
                    "General course areas identified (math, English, vocational courses) but specific courses by name for each remaining year are not detailed in the plan.",
                ),
                leaf(
                    "graduation-alignment",
                    "6.2 Graduation Pathway Alignment",
                    1,
                    false,
                    "Some alignment but connection to goals could be stronger",
                    "Course of study generally aligns with graduation requirements but explicit connection to postsecondary goals could be more clearly documented.",
                ),
            ],
        ),
        RubricScore::from_sub_criteria(
            "agency-participation",
            "7. Agency Participation",
            "No evidence of agency participation documentation",
            "Missing documentation of agency invitations and participation. No evidence of required consent or agency contributions to the transition plan.",
            vec![
                leaf(
                    "agency-invitation",
                    "7.1 Agency Invitation Documentation",
                    0,
                    false,
                    "No documentation of agency invitations found",
                    "No Prior Written Notice, meeting notes, or signed consent forms found documenting invitation to relevant outside agencies (VR, DDS, etc.).",
                ),
                leaf(
                    "agency-contributions",
                    "7.2 Agency Participation and Contributions",
                    0,
                    false,
                    "No evidence of agency participation or contributions",
                    "No documentation of agency participation in the IEP meeting or specific contributions to the transition plan development.",
                ),
            ],
        ),
        RubricScore::from_sub_criteria(
            "overall-quality",
            "8. Overall Transition Plan Quality",
            "Plan shows good individualization but has some inconsistencies",
            "Transition plan is well-individualized to the student with specific details throughout, but some inconsistencies exist between components that affect overall flow.",
            vec![
                leaf(
                    "internal-consistency",
                    "8.1 Internal Consistency",
                    1,
                    false,
                    "Most components consistent but some inconsistencies noted",
                    "Most components of the transition plan are consistent, but there are some minor inconsistencies between assessment results and goal statements that affect logical flow.",
                ),
                leaf(
                    "individualization",
                    "8.2 Individualization and Specificity",
                    2,
                    true,
                    "Highly individualized plan with specific details",
                    "Transition plan is highly individualized to the student with specific details throughout that clearly reflect unique needs, preferences, and circumstances.",
                ),
            ],
        ),
    ]
}

/// Feedback built around the sample rubric.
pub fn sample_feedback() -> FeedbackData {
    let rubric_scores = sample_rubric();
    let total: u32 = rubric_scores.iter().map(|s| s.total_score).sum();
    let max: u32 = rubric_scores.iter().map(|s| s.max_score).sum();
    let compliant = rubric_scores.iter().all(|s| s.is_compliant);
    let percent = if max == 0 {
        0.0
    } else {
        (f64::from(total) * 100.0 / f64::from(max)).round()
    };

    FeedbackData {
        feedback_summary: format!(
            "This IEP transition plan received a score of {total}/{max} ({percent}%). The plan shows strengths in student participation, transition assessments, and postsecondary goal development, but has significant gaps in agency participation and course planning that need to be addressed for full compliance."
        ),
        detailed_feedback: vec![
            DetailedFeedback {
                section: "Student Participation".to_string(),
                issue: "Missing age of majority notification documentation".to_string(),
                recommendation: "Ensure both student and parent are informed of transfer of rights before the student's 17th birthday, with proper documentation including dates and signatures.".to_string(),
                priority: Priority::High,
            },
            DetailedFeedback {
                section: "Postsecondary Goals".to_string(),
                issue: "Independent living goal missing despite student needs".to_string(),
                recommendation: "Add a specific, measurable independent living goal based on assessment results showing need for daily living skills support.".to_string(),
                priority: Priority::High,
            },
            DetailedFeedback {
                section: "Agency Participation".to_string(),
                issue: "No evidence of agency invitation or participation".to_string(),
                recommendation: "Invite relevant outside agencies (VR, DDS, etc.) to the IEP meeting and document their participation and contributions to the transition plan.".to_string(),
                priority: Priority::High,
            },
        ],
        recommendation: if compliant {
            Recommendation::Approve
        } else {
            Recommendation::Revise
        },
        confidence: 0.85,
        overall_compliance: if compliant {
            Compliance::Compliant
        } else {
            Compliance::NonCompliant
        },
        rubric_scores,
        next_steps: vec![
            "Address age of majority notification requirements".to_string(),
            "Add independent living goal based on assessment results".to_string(),
            "Invite and document agency participation".to_string(),
            "Develop detailed multi-year course plan".to_string(),
            "Ensure all annual goals have complete measurability criteria".to_string(),
        ],
        estimated_revision_time: Some("2-3 hours".to_string()),
        raw_response: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rubric_totals_stay_in_sync() {
        let rubric = sample_rubric();
        assert_eq!(rubric.len(), 8);
        let leaves: usize = rubric.iter().map(|s| s.sub_criteria.len()).sum();
        assert_eq!(leaves, 18);
        let total: u32 = rubric.iter().map(|s| s.total_score).sum();
        let max: u32 = rubric.iter().map(|s| s.max_score).sum();
        assert_eq!(total, 23);
        assert_eq!(max, 36);
    }

    #[test]
    fn sample_categories_match_children() {
        for category in sample_rubric() {
            let sum: u32 = category.sub_criteria.iter().map(|c| c.score).sum();
            let all = category.sub_criteria.iter().all(|c| c.is_compliant);
            assert_eq!(category.total_score, sum, "{}", category.id);
            assert_eq!(category.is_compliant, all, "{}", category.id);
        }
        let compliant: Vec<_> = sample_rubric()
            .into_iter()
            .filter(|c| c.is_compliant)
            .map(|c| c.id)
            .collect();
        assert_eq!(compliant, vec!["transition-assessments", "transition-services"]);
    }

    #[test]
    fn sample_feedback_reflects_rubric() {
        let feedback = sample_feedback();
        assert!(feedback.feedback_summary.contains("23/36 (64%)"));
        assert_eq!(feedback.recommendation, Recommendation::Revise);
        assert_eq!(feedback.overall_compliance, Compliance::NonCompliant);
        assert_eq!(feedback.rubric_totals(), (23, 36));
        assert_eq!(feedback.detailed_feedback.len(), 3);
    }

    #[test]
    fn fallbacks_carry_the_reason() {
        assert!(fallback_extracted("timeout").raw_response.contains("timeout"));
        assert_eq!(fallback_extracted("x").student_name, DEFAULT_STUDENT_NAME);
        assert_eq!(fallback_scoring("x").detailed_scores.len(), 6);
        assert!(fallback_feedback("x", false).rubric_scores.is_empty());
        assert_eq!(fallback_feedback("x", true).rubric_scores.len(), 8);
    }
}
