//! Messages sent to each agent.
use iep_common::agent::AgentKind;

/// Context shared by every prompt of one run.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub document_id: &'a str,
    pub file_name: &'a str,
    /// Set when the PDF travels with the call.
    pub file_size: Option<u64>,
}

impl PromptContext<'_> {
    fn header(&self) -> String {
        let mut header = format!("Document ID: {}\nFile Name: {}", self.document_id, self.file_name);
        if let Some(size) = self.file_size {
            header.push_str(&format!("\nFile Size: {size} bytes"));
        }
        header
    }
}

const SCORING_SCHEMA: &str = r#"Respond with a single JSON object:
{
  "student_info": {"name": "...", "grade": "...", "school": "...", "review_date": "YYYY-MM-DD"},
  "indicator_evaluations": [
    {"indicator": "1.1", "description": "...", "quality_rating": 0-3, "compliance_rating": "Y" or "N", "justification": "..."}
  ],
  "total_quality_score": <sum of quality ratings>,
  "overall_compliance": "Compliant" or "Non-Compliant",
  "notes": "..."
}
Number indicators by rubric section: 1 Student Participation, 2 Assessment, 3 Postsecondary Goals, 4 Annual Goals, 5 Transition Services, 6 Course of Study, 7 Agency Participation, 8 Internal Consistency."#;

/// Prompt for one stage of the four-stage workflow.
pub fn stage_prompt(kind: AgentKind, ctx: &PromptContext<'_>) -> String {
    let body = match kind {
        AgentKind::Intake => "Extract and normalize the key fields of this IEP document: student information, goals, accommodations, services and placement details. Respond with a JSON object with the fields studentName, gradeLevel, schoolName, iepDate, nextReviewDate, disability, placement, goals, accommodations, services.".to_string(),
        AgentKind::Redaction => "Redact personally identifiable information (names, addresses, dates of birth, ID numbers) from this IEP document and check that it follows the expected structure. Respond with a JSON object with the fields redactedContent, qaReport, piiRemoved, complianceStatus.".to_string(),
        AgentKind::Scoring => format!(
            "Apply the federal and state transition rubric to this IEP document and score every indicator.\n\n{SCORING_SCHEMA}"
        ),
        AgentKind::Feedback => "Review this IEP document and its rubric results. Generate detailed revision guidance and state the recommended action as \"Recommendation: Approve\", \"Recommendation: Revise\" or \"Recommendation: Reject\".".to_string(),
    };
    format!("{body}\n\n{}", ctx.header())
}

/// Prompt for the single combined analysis call.
pub fn combined_prompt(ctx: &PromptContext<'_>) -> String {
    format!(
        "Please analyze this IEP document and provide comprehensive feedback including:\n\n\
1. Student Information Extraction\n\
2. Present Levels of Performance Analysis\n\
3. Annual Goals Assessment\n\
4. Services and Supports Review\n\
5. Accommodations and Modifications Evaluation\n\
6. Transition Planning Analysis\n\
7. Parent Participation Assessment\n\
8. Overall Compliance Scoring\n\n\
{}\n\n\
Please provide detailed analysis and scoring for each section.\n\n{SCORING_SCHEMA}",
        ctx.header()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_carry_document_context() {
        let ctx = PromptContext {
            document_id: "doc_1_abc",
            file_name: "plan.pdf",
            file_size: Some(42),
        };
        for kind in AgentKind::ALL {
            let prompt = stage_prompt(kind, &ctx);
            assert!(prompt.contains("Document ID: doc_1_abc"), "{kind}");
            assert!(prompt.contains("File Size: 42 bytes"), "{kind}");
        }
        assert!(stage_prompt(AgentKind::Scoring, &ctx).contains("indicator_evaluations"));
        let combined = combined_prompt(&PromptContext { file_size: None, ..ctx });
        assert!(combined.contains("File Name: plan.pdf"));
        assert!(!combined.contains("File Size"));
    }
}
