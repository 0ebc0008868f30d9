//! Catalog query selection scenario
//!
//! The model may only pick ids from the catalog listing embedded in the
//! prompt; the data agent validates every id and every parameter against
//! the catalog before anything executes. This is the whole safety stance:
//! the LLM chooses from a finite menu, it never writes SQL.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::services::catalog::QueryCatalog;

pub const MAX_SELECTED_QUERIES: usize = 3;

pub const SYSTEM_PROMPT: &str = r#"You select queries from a fixed catalog to answer a business question.

Return ONLY a JSON object:
{
  "query_ids": ["<id from the catalog>", ...],
  "params": { "<param name>": "<value>", ... }
}

Rules:
- Use only ids that appear in the catalog listing. Never invent ids.
- Select at most 3 ids, the fewest that answer the question.
- "params" is optional; dates use YYYY-MM-DD. Omit params you do not need.
- Prefer a comparison query when the question compares two periods."#;

#[derive(Debug, Clone, Serialize)]
pub struct SelectionRequest<'a> {
    pub question: &'a str,
    pub date_from: &'a str,
    pub date_to: &'a str,
}

impl SelectionRequest<'_> {
    pub fn user_prompt(&self, catalog: &QueryCatalog) -> String {
        let mut listing = String::new();
        for entry in catalog.list() {
            listing.push_str("- ");
            listing.push_str(entry.id);
            listing.push_str(": ");
            listing.push_str(entry.description);
            listing.push('\n');
        }
        format!(
            "Catalog:\n{listing}\nDefault date range: {} to {}\n\nQuestion: {}",
            self.date_from, self.date_to, self.question
        )
    }
}

/// Structured selection reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionResponse {
    pub query_ids: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl SelectionResponse {
    /// Reject replies that name unknown ids or exceed the selection cap.
    /// Parameter-level validation happens later, per entry, in the executor.
    pub fn validate(&self, catalog: &QueryCatalog) -> Result<(), String> {
        if self.query_ids.is_empty() {
            return Err("query_ids is empty".to_string());
        }
        if self.query_ids.len() > MAX_SELECTED_QUERIES {
            return Err(format!(
                "{} query ids selected, the cap is {}",
                self.query_ids.len(),
                MAX_SELECTED_QUERIES
            ));
        }
        for id in &self.query_ids {
            if catalog.lookup(id).is_none() {
                return Err(format!("unknown query id: {}", id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_known_ids_within_cap() {
        let catalog = QueryCatalog::builtin().unwrap();
        let resp = SelectionResponse {
            query_ids: vec!["kpi_sales_summary".into(), "ts_sales_by_day".into()],
            params: BTreeMap::new(),
        };
        assert!(resp.validate(&catalog).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_id() {
        let catalog = QueryCatalog::builtin().unwrap();
        let resp = SelectionResponse {
            query_ids: vec!["select_star_from_users".into()],
            params: BTreeMap::new(),
        };
        assert!(resp.validate(&catalog).unwrap_err().contains("unknown query id"));
    }

    #[test]
    fn validate_rejects_oversized_selection() {
        let catalog = QueryCatalog::builtin().unwrap();
        let resp = SelectionResponse {
            query_ids: vec![
                "kpi_sales_summary".into(),
                "ts_sales_by_day".into(),
                "top_products_by_revenue".into(),
                "sales_by_channel".into(),
            ],
            params: BTreeMap::new(),
        };
        assert!(resp.validate(&catalog).is_err());
    }

    #[test]
    fn prompt_lists_every_catalog_entry() {
        let catalog = QueryCatalog::builtin().unwrap();
        let req = SelectionRequest {
            question: "como van las ventas",
            date_from: "2025-11-01",
            date_to: "2025-11-30",
        };
        let prompt = req.user_prompt(&catalog);
        for entry in catalog.list() {
            assert!(prompt.contains(entry.id));
        }
    }
}
