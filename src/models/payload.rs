//! Data payload assembled by the data agent
//!
//! Query results are marshaled into typed fragments (one per catalog output
//! kind) and folded under their catalog output refs. The dashboard binds to
//! slices of this payload via those refs; `available_refs` records which
//! refs actually received data so the binding can be checked.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One point of a time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Ordered series of dated values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TimeSeries {
    pub series_name: String,
    pub points: Vec<SeriesPoint>,
}

/// One entry of a ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RankedItem {
    pub rank: u32,
    pub id: String,
    pub title: String,
    pub value: f64,
    /// Any extra columns the ranking query produced.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Ranked list (top products, top channels, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TopItems {
    pub ranking_name: String,
    /// Name of the metric the ranking is ordered by.
    pub metric: String,
    pub items: Vec<RankedItem>,
}

/// Raw tabular result, one JSON object per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DataTable {
    pub name: String,
    pub rows: Vec<BTreeMap<String, serde_json::Value>>,
}

/// KPI set for one side of a period comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PeriodKpis {
    pub label: String,
    pub kpis: BTreeMap<String, f64>,
}

/// Current-vs-previous period comparison with per-metric deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Comparison {
    pub current_period: PeriodKpis,
    pub previous_period: PeriodKpis,
    /// current − previous, per comparable metric.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deltas: BTreeMap<String, f64>,
    /// 100 × (current − previous) / previous; 0 when previous is 0.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub delta_percents: BTreeMap<String, f64>,
}

impl Comparison {
    /// Fill `deltas` / `delta_percents` from the metrics both periods share.
    pub fn compute_deltas(&mut self) {
        self.deltas.clear();
        self.delta_percents.clear();
        for (metric, current) in &self.current_period.kpis {
            let Some(previous) = self.previous_period.kpis.get(metric) else {
                continue;
            };
            let delta = current - previous;
            let pct = if *previous == 0.0 { 0.0 } else { 100.0 * delta / previous };
            self.deltas.insert(metric.clone(), delta);
            self.delta_percents.insert(metric.clone(), pct);
        }
    }
}

/// One marshaled query result, shaped by the catalog entry's output kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadFragment {
    Kpis { values: BTreeMap<String, f64> },
    TimeSeries { series: TimeSeries },
    TopItems { ranking: TopItems },
    Table { table: DataTable },
    Comparison { comparison: Comparison },
    /// The query ran but produced no usable rows. Not an error.
    Empty,
}

impl PayloadFragment {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Everything the selected queries produced, addressed by output ref.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DataPayload {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kpis: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_series: Vec<TimeSeries>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_items: Vec<TopItems>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<DataTable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
    /// Output refs that received at least one non-empty result.
    #[serde(default)]
    pub available_refs: Vec<String>,
}

impl DataPayload {
    pub fn has_ref(&self, r: &str) -> bool {
        self.available_refs.iter().any(|a| a == r)
    }

    pub fn is_empty(&self) -> bool {
        self.available_refs.is_empty()
    }

    /// Fold one query's fragment under its catalog output ref.
    ///
    /// Empty fragments are dropped and do not register the ref.
    pub fn absorb(&mut self, output_ref: &str, fragment: PayloadFragment) {
        match fragment {
            PayloadFragment::Kpis { values } => {
                if values.is_empty() {
                    return;
                }
                self.kpis.extend(values);
            },
            PayloadFragment::TimeSeries { series } => {
                if series.points.is_empty() {
                    return;
                }
                self.time_series.push(series);
            },
            PayloadFragment::TopItems { ranking } => {
                if ranking.items.is_empty() {
                    return;
                }
                self.top_items.push(ranking);
            },
            PayloadFragment::Table { table } => {
                if table.rows.is_empty() {
                    return;
                }
                self.tables.push(table);
            },
            PayloadFragment::Comparison { mut comparison } => {
                comparison.compute_deltas();
                self.comparison = Some(comparison);
            },
            PayloadFragment::Empty => return,
        }
        if !self.has_ref(output_ref) {
            self.available_refs.push(output_ref.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(label: &str, kpis: &[(&str, f64)]) -> PeriodKpis {
        PeriodKpis {
            label: label.to_string(),
            kpis: kpis.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn comparison_deltas_cover_shared_metrics_only() {
        let mut cmp = Comparison {
            current_period: period("current", &[("total_sales", 1200.0), ("orders", 30.0)]),
            previous_period: period("previous", &[("total_sales", 1000.0)]),
            deltas: BTreeMap::new(),
            delta_percents: BTreeMap::new(),
        };
        cmp.compute_deltas();

        assert_eq!(cmp.deltas.get("total_sales"), Some(&200.0));
        assert_eq!(cmp.delta_percents.get("total_sales"), Some(&20.0));
        assert!(!cmp.deltas.contains_key("orders"));
    }

    #[test]
    fn comparison_delta_percent_is_zero_when_previous_is_zero() {
        let mut cmp = Comparison {
            current_period: period("current", &[("total_sales", 500.0)]),
            previous_period: period("previous", &[("total_sales", 0.0)]),
            deltas: BTreeMap::new(),
            delta_percents: BTreeMap::new(),
        };
        cmp.compute_deltas();

        assert_eq!(cmp.deltas.get("total_sales"), Some(&500.0));
        assert_eq!(cmp.delta_percents.get("total_sales"), Some(&0.0));
    }

    #[test]
    fn absorb_skips_empty_fragments() {
        let mut payload = DataPayload::default();
        payload.absorb("kpi.sales_summary", PayloadFragment::Empty);
        payload.absorb(
            "ts.sales_by_day",
            PayloadFragment::TimeSeries {
                series: TimeSeries { series_name: "sales_by_day".into(), points: vec![] },
            },
        );
        assert!(payload.is_empty());

        payload.absorb(
            "kpi.sales_summary",
            PayloadFragment::Kpis { values: [("total_sales".to_string(), 10.0)].into() },
        );
        assert_eq!(payload.available_refs, vec!["kpi.sales_summary"]);
        assert_eq!(payload.kpis.get("total_sales"), Some(&10.0));
    }

    #[test]
    fn payload_round_trips_through_json() {
        let mut payload = DataPayload::default();
        payload.absorb(
            "top.products_by_revenue",
            PayloadFragment::TopItems {
                ranking: TopItems {
                    ranking_name: "products_by_revenue".into(),
                    metric: "revenue".into(),
                    items: vec![RankedItem {
                        rank: 1,
                        id: "7".into(),
                        title: "Gift card".into(),
                        value: 420.5,
                        extra: BTreeMap::new(),
                    }],
                },
            },
        );

        let json = serde_json::to_string(&payload).unwrap();
        let back: DataPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
