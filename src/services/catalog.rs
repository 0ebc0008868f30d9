//! Query catalog
//!
//! The catalog is the only source of SQL the engine can execute. Every entry
//! pairs a parameterized template with a parameter schema and an output
//! shape; the LLM selector may only pick ids from this registry, never
//! compose SQL. Loaded once at startup, read-only afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Parameter value type accepted by a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Date,
}

/// One declared parameter of a catalog entry. Binding order follows the
/// declaration order (`?1`, `?2`, ... in the template).
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<&'static str>,
    pub allowed_values: Option<&'static [&'static str]>,
    /// Sensitive parameter values are never logged.
    pub sensitive: bool,
}

impl ParamSpec {
    pub const fn date(name: &'static str) -> Self {
        Self {
            name,
            param_type: ParamType::Date,
            required: true,
            default: None,
            allowed_values: None,
            sensitive: false,
        }
    }

    pub const fn integer_with_default(name: &'static str, default: &'static str) -> Self {
        Self {
            name,
            param_type: ParamType::Integer,
            required: false,
            default: Some(default),
            allowed_values: None,
            sensitive: false,
        }
    }
}

/// Shape of an entry's marshaled result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Kpi,
    TimeSeries,
    TopItems,
    Table,
    Comparison,
}

/// Immutable catalog entry.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub id: &'static str,
    /// Shown to the LLM selector; keep it short and concrete.
    pub description: &'static str,
    pub sql: &'static str,
    pub params: Vec<ParamSpec>,
    pub output_kind: OutputKind,
    /// Canonical ref under which results land in the data payload.
    pub output_ref: &'static str,
}

impl CatalogEntry {
    /// Name the payload fragment carries (the ref without its family
    /// prefix): `ts.sales_by_day` → `sales_by_day`.
    pub fn fragment_name(&self) -> &'static str {
        self.output_ref.split_once('.').map(|(_, n)| n).unwrap_or(self.output_ref)
    }
}

/// Read-only registry of allowed queries.
#[derive(Debug)]
pub struct QueryCatalog {
    entries: Vec<CatalogEntry>,
    by_id: HashMap<&'static str, usize>,
}

impl QueryCatalog {
    /// Build the built-in catalog. Duplicate ids or output refs are a
    /// startup failure, not a runtime condition.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_entries(builtin_entries())
    }

    fn from_entries(entries: Vec<CatalogEntry>) -> anyhow::Result<Self> {
        let mut by_id = HashMap::with_capacity(entries.len());
        let mut seen_refs: HashMap<&str, &str> = HashMap::with_capacity(entries.len());

        for (idx, entry) in entries.iter().enumerate() {
            if by_id.insert(entry.id, idx).is_some() {
                anyhow::bail!("duplicate catalog id: {}", entry.id);
            }
            if let Some(other) = seen_refs.insert(entry.output_ref, entry.id) {
                anyhow::bail!(
                    "duplicate catalog output ref {} ({} and {})",
                    entry.output_ref,
                    other,
                    entry.id
                );
            }
            for p in &entry.params {
                if p.required && p.default.is_none() && !is_injected_param(p.name) {
                    anyhow::bail!(
                        "catalog entry {}: required param {} has no default and is not injected",
                        entry.id,
                        p.name
                    );
                }
                if let (Some(default), Some(allowed)) = (p.default, p.allowed_values)
                    && !allowed.contains(&default)
                {
                    anyhow::bail!(
                        "catalog entry {}: default {} for {} is not an allowed value",
                        entry.id,
                        default,
                        p.name
                    );
                }
            }
        }

        Ok(Self { entries, by_id })
    }

    pub fn lookup(&self, id: &str) -> Option<&CatalogEntry> {
        self.by_id.get(id).map(|idx| &self.entries[*idx])
    }

    pub fn list(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// id → description map for `/api/queries` and for selector prompts.
    pub fn descriptions(&self) -> std::collections::BTreeMap<&'static str, &'static str> {
        self.entries.iter().map(|e| (e.id, e.description)).collect()
    }
}

/// Date-range params the engine injects from the request, so entries may
/// declare them required without a default.
fn is_injected_param(name: &str) -> bool {
    matches!(name, "date_from" | "date_to" | "prev_date_from" | "prev_date_to")
}

fn builtin_entries() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry {
            id: "kpi_sales_summary",
            description: "Sales KPIs for a date range: total revenue, order count, \
                          average order value, units sold.",
            sql: "SELECT SUM(total_amount) AS total_sales, \
                         COUNT(*)          AS total_orders, \
                         AVG(total_amount) AS avg_order_value, \
                         SUM(units)        AS total_units \
                  FROM orders \
                  WHERE order_date BETWEEN ?1 AND ?2",
            params: vec![ParamSpec::date("date_from"), ParamSpec::date("date_to")],
            output_kind: OutputKind::Kpi,
            output_ref: "kpi.sales_summary",
        },
        CatalogEntry {
            id: "ts_sales_by_day",
            description: "Daily revenue time series for a date range.",
            sql: "SELECT order_date AS date, SUM(total_amount) AS value \
                  FROM orders \
                  WHERE order_date BETWEEN ?1 AND ?2 \
                  GROUP BY order_date \
                  ORDER BY order_date",
            params: vec![ParamSpec::date("date_from"), ParamSpec::date("date_to")],
            output_kind: OutputKind::TimeSeries,
            output_ref: "ts.sales_by_day",
        },
        CatalogEntry {
            id: "top_products_by_revenue",
            description: "Products ranked by revenue in a date range.",
            sql: "SELECT CAST(p.id AS TEXT) AS id, p.name AS title, \
                         SUM(l.revenue) AS value, SUM(l.quantity) AS units \
                  FROM order_lines l \
                  JOIN products p ON p.id = l.product_id \
                  JOIN orders o ON o.id = l.order_id \
                  WHERE o.order_date BETWEEN ?1 AND ?2 \
                  GROUP BY p.id, p.name \
                  ORDER BY value DESC \
                  LIMIT ?3",
            params: vec![
                ParamSpec::date("date_from"),
                ParamSpec::date("date_to"),
                ParamSpec::integer_with_default("limit", "5"),
            ],
            output_kind: OutputKind::TopItems,
            output_ref: "top.products_by_revenue",
        },
        CatalogEntry {
            id: "top_products_by_units",
            description: "Products ranked by units sold in a date range.",
            sql: "SELECT CAST(p.id AS TEXT) AS id, p.name AS title, \
                         CAST(SUM(l.quantity) AS REAL) AS value \
                  FROM order_lines l \
                  JOIN products p ON p.id = l.product_id \
                  JOIN orders o ON o.id = l.order_id \
                  WHERE o.order_date BETWEEN ?1 AND ?2 \
                  GROUP BY p.id, p.name \
                  ORDER BY value DESC \
                  LIMIT ?3",
            params: vec![
                ParamSpec::date("date_from"),
                ParamSpec::date("date_to"),
                ParamSpec::integer_with_default("limit", "5"),
            ],
            output_kind: OutputKind::TopItems,
            output_ref: "top.products_by_units",
        },
        CatalogEntry {
            id: "kpi_inventory_summary",
            description: "Inventory KPIs: stock on hand, tracked products, \
                          items at or below their reorder point.",
            sql: "SELECT CAST(SUM(stock_on_hand) AS REAL) AS total_stock, \
                         COUNT(*) AS tracked_products, \
                         SUM(CASE WHEN stock_on_hand <= reorder_point THEN 1 ELSE 0 END) \
                             AS low_stock_items \
                  FROM inventory",
            params: vec![],
            output_kind: OutputKind::Kpi,
            output_ref: "kpi.inventory_summary",
        },
        CatalogEntry {
            id: "stock_reorder_analysis",
            description: "Products near or below their reorder point, with the \
                          remaining stock buffer.",
            sql: "SELECT p.name AS product, i.stock_on_hand, i.reorder_point, \
                         i.stock_on_hand - i.reorder_point AS buffer \
                  FROM inventory i \
                  JOIN products p ON p.id = i.product_id \
                  WHERE i.stock_on_hand <= i.reorder_point * 2 \
                  ORDER BY buffer ASC",
            params: vec![],
            output_kind: OutputKind::Table,
            output_ref: "table.stock_reorder",
        },
        CatalogEntry {
            id: "kpi_conversations_summary",
            description: "Customer conversation KPIs for a date range: volume, \
                          escalations, escalation rate, resolution rate.",
            sql: "SELECT COUNT(*) AS total_conversations, \
                         SUM(escalated) AS escalated_conversations, \
                         100.0 * SUM(escalated) / MAX(COUNT(*), 1) AS escalation_rate, \
                         100.0 * SUM(resolved) / MAX(COUNT(*), 1) AS resolution_rate \
                  FROM conversations \
                  WHERE date(started_at) BETWEEN ?1 AND ?2",
            params: vec![ParamSpec::date("date_from"), ParamSpec::date("date_to")],
            output_kind: OutputKind::Kpi,
            output_ref: "kpi.conversations_summary",
        },
        CatalogEntry {
            id: "ts_conversations_by_day",
            description: "Daily conversation volume time series for a date range.",
            sql: "SELECT date(started_at) AS date, CAST(COUNT(*) AS REAL) AS value \
                  FROM conversations \
                  WHERE date(started_at) BETWEEN ?1 AND ?2 \
                  GROUP BY date(started_at) \
                  ORDER BY date(started_at)",
            params: vec![ParamSpec::date("date_from"), ParamSpec::date("date_to")],
            output_kind: OutputKind::TimeSeries,
            output_ref: "ts.conversations_by_day",
        },
        CatalogEntry {
            id: "sales_by_channel",
            description: "Revenue and order count per sales channel in a date range.",
            sql: "SELECT channel, SUM(total_amount) AS revenue, COUNT(*) AS orders \
                  FROM orders \
                  WHERE order_date BETWEEN ?1 AND ?2 \
                  GROUP BY channel \
                  ORDER BY revenue DESC",
            params: vec![ParamSpec::date("date_from"), ParamSpec::date("date_to")],
            output_kind: OutputKind::Table,
            output_ref: "table.sales_by_channel",
        },
        CatalogEntry {
            id: "comparison_sales_periods",
            description: "Sales KPIs for the current period versus the previous \
                          period of the same length.",
            sql: "SELECT 'current' AS period, \
                         SUM(total_amount) AS total_sales, \
                         COUNT(*) AS total_orders, \
                         AVG(total_amount) AS avg_order_value \
                  FROM orders WHERE order_date BETWEEN ?1 AND ?2 \
                  UNION ALL \
                  SELECT 'previous' AS period, \
                         SUM(total_amount), COUNT(*), AVG(total_amount) \
                  FROM orders WHERE order_date BETWEEN ?3 AND ?4",
            params: vec![
                ParamSpec::date("date_from"),
                ParamSpec::date("date_to"),
                ParamSpec::date("prev_date_from"),
                ParamSpec::date("prev_date_to"),
            ],
            output_kind: OutputKind::Comparison,
            output_ref: "comparison.sales_periods",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_loads_without_duplicates() {
        let catalog = QueryCatalog::builtin().expect("builtin catalog must validate");
        assert!(catalog.len() >= 8);
        assert!(catalog.lookup("kpi_sales_summary").is_some());
        assert!(catalog.lookup("nope").is_none());
    }

    #[test]
    fn duplicate_id_is_fatal() {
        let mut entries = builtin_entries();
        let dup = entries[0].clone();
        entries.push(CatalogEntry { output_ref: "kpi.other", ..dup });
        let err = QueryCatalog::from_entries(entries).unwrap_err();
        assert!(err.to_string().contains("duplicate catalog id"));
    }

    #[test]
    fn duplicate_output_ref_is_fatal() {
        let mut entries = builtin_entries();
        let dup = entries[0].clone();
        entries.push(CatalogEntry { id: "kpi_sales_summary_v2", ..dup });
        let err = QueryCatalog::from_entries(entries).unwrap_err();
        assert!(err.to_string().contains("duplicate catalog output ref"));
    }

    #[test]
    fn fragment_name_strips_family_prefix() {
        let catalog = QueryCatalog::builtin().unwrap();
        let entry = catalog.lookup("ts_sales_by_day").unwrap();
        assert_eq!(entry.fragment_name(), "sales_by_day");
    }

    #[test]
    fn descriptions_cover_every_entry() {
        let catalog = QueryCatalog::builtin().unwrap();
        assert_eq!(catalog.descriptions().len(), catalog.len());
    }
}
