//! Dashboard specification emitted by the presentation builder
//!
//! The spec is a view description, not data: KPI cards, charts and tables
//! bind to payload slices through `value_ref` / `dataset_ref`. Every ref
//! emitted here must exist in the payload's `available_refs` — the client
//! initializes its layout from this spec before the payload arrives.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Display format of a KPI card value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValueFormat {
    Currency,
    Number,
    Percent,
}

/// KPI card bound to one metric of a KPI fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct KpiCard {
    pub label: String,
    /// Payload ref of the KPI fragment the card reads from.
    pub value_ref: String,
    /// Metric key inside that fragment.
    pub metric: String,
    pub format: ValueFormat,
    /// Ref of a comparison fragment supplying the delta badge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Axis hints for a chart slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AxisHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChartSpec {
    pub title: String,
    pub dataset_ref: String,
    #[serde(default, skip_serializing_if = "axis_hints_empty")]
    pub axis: AxisHints,
}

fn axis_hints_empty(a: &AxisHints) -> bool {
    a.x_label.is_none() && a.y_label.is_none()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TableSpec {
    pub title: String,
    pub dataset_ref: String,
    pub columns: Vec<String>,
    pub max_rows: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ComparisonSpec {
    pub title: String,
    pub dataset_ref: String,
    pub current_label: String,
    pub previous_label: String,
    pub metrics: Vec<String>,
}

/// One chart-area slot. The serialized `type` tag is part of the wire
/// contract with existing clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChartSlot {
    Line(ChartSpec),
    Area(ChartSpec),
    Bar(ChartSpec),
    Pie(ChartSpec),
    Table(TableSpec),
    ComparisonBar(ComparisonSpec),
    ComparisonKpi(ComparisonSpec),
}

impl ChartSlot {
    pub fn dataset_ref(&self) -> &str {
        match self {
            Self::Line(c) | Self::Area(c) | Self::Bar(c) | Self::Pie(c) => &c.dataset_ref,
            Self::Table(t) => &t.dataset_ref,
            Self::ComparisonBar(c) | Self::ComparisonKpi(c) => &c.dataset_ref,
        }
    }
}

/// Kind of a narrative entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeKind {
    Headline,
    Summary,
    Insight,
    Callout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NarrativeEntry {
    pub kind: NarrativeKind,
    pub text: String,
}

impl NarrativeEntry {
    pub fn new(kind: NarrativeKind, text: impl Into<String>) -> Self {
        Self { kind, text: text.into() }
    }
}

/// Date range plus arbitrary filters the dashboard was built under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FilterSlot {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, String>,
}

/// Fixed-shape slot container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DashboardSlots {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<KpiCard>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<ChartSlot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub narrative: Vec<NarrativeEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterSlot>,
}

/// Complete dashboard description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DashboardSpec {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// One-sentence answer to the question. Always present on a built spec.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub slots: DashboardSlots,
}

impl DashboardSpec {
    /// Every payload ref this spec binds to, for integrity checks.
    pub fn referenced_refs(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = Vec::new();
        for card in &self.slots.series {
            refs.push(&card.value_ref);
            if let Some(d) = &card.delta_ref {
                refs.push(d);
            }
        }
        for chart in &self.slots.charts {
            refs.push(chart.dataset_ref());
        }
        refs
    }
}
