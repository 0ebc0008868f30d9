//! Narrative generation scenario
//!
//! Optional path: when enabled, the presentation builder hands the model a
//! compact payload summary and asks for a conclusion plus insights. The
//! deterministic narrative remains the default and the fallback.

use serde::{Deserialize, Serialize};

use crate::models::DataPayload;

pub const SYSTEM_PROMPT: &str = r#"You write short dashboard narrative for business users.
Match the language of the question (Spanish or English).

Return ONLY a JSON object:
{
  "conclusion": "<one sentence that directly answers the question>",
  "summary": "<two or three sentences summarizing the data>",
  "insights": ["<short insight>", ...],
  "recommendation": "<one actionable suggestion>"
}

Rules:
- Only state numbers that appear in the data summary. Never invent figures.
- Keep every field short; insights are single sentences, at most four."#;

#[derive(Debug, Clone, Serialize)]
pub struct NarrativeRequest<'a> {
    pub question: &'a str,
    pub payload_summary: String,
}

impl<'a> NarrativeRequest<'a> {
    pub fn new(question: &'a str, payload: &DataPayload) -> Self {
        Self { question, payload_summary: summarize_payload(payload) }
    }

    pub fn user_prompt(&self) -> String {
        format!("Question: {}\n\nData summary:\n{}", self.question, self.payload_summary)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeResponse {
    pub conclusion: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub recommendation: String,
}

/// Compact, text-only payload rendering for the prompt. Full row data never
/// goes to the model, only aggregates.
fn summarize_payload(payload: &DataPayload) -> String {
    let mut out = String::new();

    if !payload.kpis.is_empty() {
        out.push_str("KPIs:\n");
        for (name, value) in &payload.kpis {
            out.push_str(&format!("  {name} = {value:.2}\n"));
        }
    }

    for series in &payload.time_series {
        if let (Some(first), Some(last)) = (series.points.first(), series.points.last()) {
            out.push_str(&format!(
                "Series {}: {} points, {} → {} (from {:.2} to {:.2})\n",
                series.series_name,
                series.points.len(),
                first.date,
                last.date,
                first.value,
                last.value
            ));
        }
    }

    for ranking in &payload.top_items {
        out.push_str(&format!("Ranking {} (by {}):\n", ranking.ranking_name, ranking.metric));
        for item in ranking.items.iter().take(3) {
            out.push_str(&format!("  #{} {} = {:.2}\n", item.rank, item.title, item.value));
        }
    }

    for table in &payload.tables {
        out.push_str(&format!("Table {}: {} rows\n", table.name, table.rows.len()));
    }

    if let Some(cmp) = &payload.comparison {
        out.push_str("Comparison (current vs previous):\n");
        for (metric, pct) in &cmp.delta_percents {
            out.push_str(&format!("  {metric}: {pct:+.1}%\n"));
        }
    }

    if out.is_empty() {
        out.push_str("No data available.\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::models::PayloadFragment;

    #[test]
    fn summary_includes_kpis_and_rankings() {
        let mut payload = DataPayload::default();
        payload.absorb(
            "kpi.sales_summary",
            PayloadFragment::Kpis {
                values: BTreeMap::from([("total_sales".to_string(), 1234.5)]),
            },
        );
        let req = NarrativeRequest::new("como van las ventas", &payload);
        assert!(req.payload_summary.contains("total_sales"));
        assert!(req.user_prompt().contains("como van las ventas"));
    }

    #[test]
    fn response_tolerates_missing_optional_fields() {
        let json = r#"{"conclusion":"Sales are up."}"#;
        let parsed: NarrativeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.conclusion, "Sales are up.");
        assert!(parsed.insights.is_empty());
    }
}
