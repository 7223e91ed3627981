use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Document, DocumentStatus};

const RECENT_ACTIVITY: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_documents: usize,
    pub processed_documents: usize,
    /// Rounded mean score percentage over documents that have been scored.
    pub average_score: u32,
    /// Rounded percentage of all documents whose scoring is compliant.
    pub compliance_rate: u32,
    pub recent_activity: Vec<RecentActivity>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub id: String,
    pub document_name: String,
    pub action: &'static str,
    pub timestamp: DateTime<Utc>,
    pub status: DocumentStatus,
}

pub fn action_text(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Uploaded => "Document uploaded",
        DocumentStatus::Processing => "Processing in progress",
        DocumentStatus::Completed => "Processing completed",
        DocumentStatus::Error => "Processing failed",
    }
}

/// Stats over `documents`, which must be ordered newest first.
pub fn dashboard_stats(documents: &[Document]) -> DashboardStats {
    let total = documents.len();
    let processed = documents
        .iter()
        .filter(|d| d.status == DocumentStatus::Completed)
        .count();

    let percentages: Vec<f64> = documents
        .iter()
        .filter_map(|d| d.scoring_data.as_ref()?.percentage())
        .collect();
    let average_score = if percentages.is_empty() {
        0
    } else {
        (percentages.iter().sum::<f64>() / percentages.len() as f64).round() as u32
    };

    let compliant = documents
        .iter()
        .filter(|d| d.scoring_data.as_ref().is_some_and(|s| s.is_compliant()))
        .count();
    let compliance_rate = if total == 0 {
        0
    } else {
        (compliant as f64 * 100.0 / total as f64).round() as u32
    };

    DashboardStats {
        total_documents: total,
        processed_documents: processed,
        average_score,
        compliance_rate,
        recent_activity: documents
            .iter()
            .take(RECENT_ACTIVITY)
            .map(|d| RecentActivity {
                id: d.id.clone(),
                document_name: d.file_name.clone(),
                action: action_text(d.status),
                timestamp: d.upload_date,
                status: d.status,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScoringData;

    fn scored(id: &str, score: u32, max: u32, compliance: &str) -> Document {
        let mut doc = Document::new(id, format!("{id}.pdf"), 1);
        doc.status = DocumentStatus::Completed;
        doc.scoring_data = Some(ScoringData {
            overall_score: score,
            max_score: max,
            compliance_level: compliance.to_string(),
            detailed_scores: Vec::new(),
            raw_response: String::new(),
        });
        doc
    }

    #[test]
    fn empty_store() {
        let stats = dashboard_stats(&[]);
        assert_eq!(stats.total_documents, 0);
        assert_eq!(stats.average_score, 0);
        assert_eq!(stats.compliance_rate, 0);
        assert!(stats.recent_activity.is_empty());
    }

    #[test]
    fn averages_percentages_and_counts_compliance() {
        let docs = vec![
            scored("a", 24, 32, "Compliant"),
            scored("b", 50, 100, "Partially Compliant"),
            Document::new("c", "c.pdf", 1),
        ];
        let stats = dashboard_stats(&docs);
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.processed_documents, 2);
        // (75 + 50) / 2
        assert_eq!(stats.average_score, 63);
        // 1 of 3
        assert_eq!(stats.compliance_rate, 33);
        assert_eq!(stats.recent_activity[2].action, "Document uploaded");
    }

    #[test]
    fn recent_activity_keeps_five() {
        let docs: Vec<_> = (0..7).map(|i| Document::new(format!("d{i}"), "x.pdf", 1)).collect();
        let stats = dashboard_stats(&docs);
        assert_eq!(stats.recent_activity.len(), 5);
        assert_eq!(stats.recent_activity[0].id, "d0");
    }
}
