//! Presentation builder
//!
//! Turns a data payload into a dashboard specification: KPI cards, charts,
//! tables, filters, and narrative. Structure is always deterministic. The
//! narrative is rule-based by default ("smart narrative"); an LLM path can
//! be enabled by config and falls back to the rules on failure.
//!
//! Every ref the spec binds must exist in the payload's `available_refs`;
//! a violation is a programmer error and fails the build.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::models::{
    AxisHints, ChartSlot, ChartSpec, ComparisonSpec, ConversationState, DashboardSlots,
    DashboardSpec, DataPayload, Domain, FilterSlot, KpiCard, NarrativeEntry, NarrativeKind,
    RoutingDecision, TableSpec, ValueFormat,
};
use crate::services::llm::{LlmClient, NARRATIVE_PROMPT, NarrativeRequest, NarrativeResponse};

/// Fixed KPI card priority; metrics not listed follow in payload order.
const KPI_PRIORITY: &[&str] = &["total_sales", "total_orders", "avg_order_value", "total_units"];

const MAX_KPI_CARDS: usize = 4;
const MAX_NARRATIVE_ENTRIES: usize = 5;
const TABLE_MAX_ROWS: u32 = 20;

/// Trend thresholds, in percent change across the series.
const TREND_BULLISH_PCT: f64 = 10.0;
const TREND_BEARISH_PCT: f64 = -10.0;
const TREND_STEEP_DROP_PCT: f64 = -25.0;
/// A single ranking item above this share of the total is an outlier.
const OUTLIER_SHARE: f64 = 0.4;
/// Escalation-rate callout threshold, percent.
const ESCALATION_CALLOUT_PCT: f64 = 25.0;

#[derive(Debug, thiserror::Error)]
pub enum PresentError {
    #[error("dashboard references a ref missing from the payload: {0}")]
    RefIntegrity(String),

    #[error("cancelled")]
    Cancelled,
}

pub struct PresentationBuilder {
    llm: Option<Arc<LlmClient>>,
    use_llm_narrative: bool,
}

impl PresentationBuilder {
    pub fn new(llm: Option<Arc<LlmClient>>, use_llm_narrative: bool) -> Self {
        Self { llm, use_llm_narrative }
    }

    /// Build the full dashboard. `reduced` drops everything but KPI cards
    /// and narrative; the orchestrator uses it for the presentation retry.
    pub async fn build(
        &self,
        state: &ConversationState,
        payload: &DataPayload,
        reduced: bool,
        cancel: &CancellationToken,
    ) -> Result<DashboardSpec, PresentError> {
        let decision = state.routing_decision.as_ref();
        let domain = decision.map(|d| d.domain).unwrap_or(Domain::Unknown);

        let mut slots = DashboardSlots {
            series: build_kpi_cards(payload),
            charts: if reduced { Vec::new() } else { build_charts(payload) },
            narrative: Vec::new(),
            filters: vec![build_filter_slot(state, decision)],
        };

        let mut narrative = smart_narrative(&state.question, payload);
        let mut conclusion = narrative.conclusion.clone();

        if self.use_llm_narrative && !reduced {
            if let Some(llm) = &self.llm {
                match self.llm_narrative(llm, &state.question, payload, cancel).await {
                    Ok(response) => {
                        conclusion = response.conclusion.clone();
                        narrative = llm_entries(response);
                    },
                    Err(crate::services::llm::LlmError::Cancelled) => {
                        return Err(PresentError::Cancelled);
                    },
                    Err(e) => {
                        tracing::warn!(
                            "LLM narrative failed ({}), keeping the rule-based narrative",
                            e
                        );
                    },
                }
            }
        }

        slots.narrative = narrative.entries;

        let spec = DashboardSpec {
            title: dashboard_title(domain),
            subtitle: Some(format!("{} – {}", state.date_from, state.date_to)),
            conclusion: Some(conclusion),
            slots,
        };

        verify_ref_integrity(&spec, payload)?;
        Ok(spec)
    }

    /// One-sentence answer for data-only responses, shared with the
    /// dashboard conclusion rules.
    pub fn conclusion_for(&self, question: &str, payload: &DataPayload) -> String {
        smart_narrative(question, payload).conclusion
    }

    async fn llm_narrative(
        &self,
        llm: &LlmClient,
        question: &str,
        payload: &DataPayload,
        cancel: &CancellationToken,
    ) -> Result<NarrativeResponse, crate::services::llm::LlmError> {
        let request = NarrativeRequest::new(question, payload);
        llm.complete_structured(NARRATIVE_PROMPT, &request.user_prompt(), cancel)
            .await
    }
}

fn verify_ref_integrity(spec: &DashboardSpec, payload: &DataPayload) -> Result<(), PresentError> {
    for r in spec.referenced_refs() {
        if !payload.has_ref(r) {
            debug_assert!(false, "dashboard bound to missing ref {r}");
            return Err(PresentError::RefIntegrity(r.to_string()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Structure
// ---------------------------------------------------------------------------

fn dashboard_title(domain: Domain) -> String {
    match domain {
        Domain::Sales => "Panel de ventas".to_string(),
        Domain::Inventory => "Panel de inventario".to_string(),
        Domain::Conversations => "Panel de conversaciones".to_string(),
        Domain::Unknown => "Panel de analítica".to_string(),
    }
}

fn build_filter_slot(state: &ConversationState, decision: Option<&RoutingDecision>) -> FilterSlot {
    let mut filters = std::collections::BTreeMap::new();
    if let Some(d) = decision
        && d.domain != Domain::Unknown
    {
        filters.insert("domain".to_string(), d.domain.as_str().to_string());
    }
    FilterSlot { date_from: state.date_from, date_to: state.date_to, filters }
}

/// The ref a KPI fragment landed under. KPI metrics are merged into one map,
/// so the card binds the first available KPI-family ref.
fn kpi_family_ref(payload: &DataPayload) -> Option<&str> {
    payload
        .available_refs
        .iter()
        .map(String::as_str)
        .find(|r| r.starts_with("kpi."))
}

fn build_kpi_cards(payload: &DataPayload) -> Vec<KpiCard> {
    let Some(value_ref) = kpi_family_ref(payload) else {
        return Vec::new();
    };
    let delta_ref = payload
        .comparison
        .as_ref()
        .and_then(|_| {
            payload
                .available_refs
                .iter()
                .find(|r| r.starts_with("comparison."))
        })
        .cloned();

    let mut ordered: Vec<&String> = Vec::new();
    for name in KPI_PRIORITY {
        if let Some((key, _)) = payload.kpis.get_key_value(*name) {
            ordered.push(key);
        }
    }
    for key in payload.kpis.keys() {
        if !ordered.iter().any(|k| *k == key) {
            ordered.push(key);
        }
    }

    ordered
        .into_iter()
        .take(MAX_KPI_CARDS)
        .map(|metric| KpiCard {
            label: metric_label(metric),
            value_ref: value_ref.to_string(),
            metric: metric.clone(),
            format: metric_format(metric),
            delta_ref: delta_ref.clone(),
            icon: metric_icon(metric),
        })
        .collect()
}

fn metric_label(metric: &str) -> String {
    match metric {
        "total_sales" => "Ventas totales".to_string(),
        "total_orders" => "Pedidos".to_string(),
        "avg_order_value" => "Ticket promedio".to_string(),
        "total_units" => "Unidades".to_string(),
        "total_stock" => "Stock total".to_string(),
        "low_stock_items" => "Productos con poco stock".to_string(),
        "tracked_products" => "Productos en inventario".to_string(),
        "total_conversations" => "Conversaciones".to_string(),
        "escalated_conversations" => "Escaladas".to_string(),
        "escalation_rate" => "Tasa de escalado".to_string(),
        "resolution_rate" => "Tasa de resolución".to_string(),
        other => other.replace('_', " "),
    }
}

fn metric_format(metric: &str) -> ValueFormat {
    if metric.contains("rate") || metric.ends_with("_pct") {
        ValueFormat::Percent
    } else if metric.contains("sales") || metric.contains("value") || metric.contains("revenue") {
        ValueFormat::Currency
    } else {
        ValueFormat::Number
    }
}

fn metric_icon(metric: &str) -> Option<String> {
    let icon = match metric {
        "total_sales" | "avg_order_value" => "currency",
        "total_orders" => "cart",
        "total_units" | "total_stock" => "box",
        "low_stock_items" => "alert",
        "total_conversations" | "escalated_conversations" => "chat",
        _ => return None,
    };
    Some(icon.to_string())
}

/// At least two charts whenever the refs allow it: one from the time-series
/// family, one from the top-items family; a single-family payload gets two
/// renderings of that family. Comparison and tables come after.
fn build_charts(payload: &DataPayload) -> Vec<ChartSlot> {
    let mut charts = Vec::new();

    let ts_refs: Vec<String> = payload
        .available_refs
        .iter()
        .filter(|r| r.starts_with("ts."))
        .cloned()
        .collect();
    let top_refs: Vec<String> = payload
        .available_refs
        .iter()
        .filter(|r| r.starts_with("top."))
        .cloned()
        .collect();

    for (i, r) in ts_refs.iter().enumerate() {
        let spec = ChartSpec {
            title: chart_title_for_ref(r),
            dataset_ref: r.clone(),
            axis: AxisHints { x_label: Some("fecha".to_string()), y_label: None },
        };
        // Alternate line/area so a two-series payload reads as two charts.
        charts.push(if i % 2 == 0 { ChartSlot::Line(spec) } else { ChartSlot::Area(spec) });
    }

    for r in &top_refs {
        charts.push(ChartSlot::Bar(ChartSpec {
            title: chart_title_for_ref(r),
            dataset_ref: r.clone(),
            axis: AxisHints::default(),
        }));
    }

    // Single-family payloads still get two charts from that family.
    if charts.len() == 1 {
        match charts[0].clone() {
            ChartSlot::Line(spec) => {
                charts.push(ChartSlot::Area(ChartSpec {
                    title: format!("{} (área)", spec.title),
                    ..spec
                }));
            },
            ChartSlot::Bar(spec) => {
                charts.push(ChartSlot::Pie(ChartSpec {
                    title: format!("{} (distribución)", spec.title),
                    ..spec
                }));
            },
            _ => {},
        }
    }

    if let Some(cmp) = &payload.comparison
        && let Some(cmp_ref) = payload
            .available_refs
            .iter()
            .find(|r| r.starts_with("comparison."))
    {
        charts.push(ChartSlot::ComparisonBar(ComparisonSpec {
            title: "Comparación de periodos".to_string(),
            dataset_ref: cmp_ref.clone(),
            current_label: cmp.current_period.label.clone(),
            previous_label: cmp.previous_period.label.clone(),
            metrics: cmp.deltas.keys().cloned().collect(),
        }));
    }

    for table in &payload.tables {
        let table_ref = format!("table.{}", table.name);
        if !payload.has_ref(&table_ref) {
            continue;
        }
        let columns = table
            .rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        charts.push(ChartSlot::Table(TableSpec {
            title: chart_title_for_ref(&table_ref),
            dataset_ref: table_ref,
            columns,
            max_rows: TABLE_MAX_ROWS,
        }));
    }

    charts
}

fn chart_title_for_ref(r: &str) -> String {
    match r {
        "ts.sales_by_day" => "Ventas por día".to_string(),
        "ts.conversations_by_day" => "Conversaciones por día".to_string(),
        "top.products_by_revenue" => "Top productos por ingresos".to_string(),
        "top.products_by_units" => "Top productos por unidades".to_string(),
        "table.stock_reorder" => "Productos por reponer".to_string(),
        "table.sales_by_channel" => "Ventas por canal".to_string(),
        other => other
            .split_once('.')
            .map(|(_, name)| name.replace('_', " "))
            .unwrap_or_else(|| other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Smart narrative (deterministic)
// ---------------------------------------------------------------------------

struct Narrative {
    entries: Vec<NarrativeEntry>,
    conclusion: String,
}

/// Rule-based narrative: a headline, insights for trends / top performers /
/// outliers, and callouts for threshold crossings. 2–5 entries.
fn smart_narrative(question: &str, payload: &DataPayload) -> Narrative {
    let mut entries = Vec::new();

    let headline = headline_text(payload);
    entries.push(NarrativeEntry::new(NarrativeKind::Headline, headline.clone()));

    // Trend direction per time series.
    let mut steep_drop: Option<(String, f64)> = None;
    for series in &payload.time_series {
        if let Some(pct) = trend_percent(series) {
            if pct <= TREND_STEEP_DROP_PCT {
                steep_drop = Some((series.series_name.clone(), pct));
            }
            let text = if pct >= TREND_BULLISH_PCT {
                format!("Tendencia alcista en {}: {:+.1}% en el periodo.", series.series_name, pct)
            } else if pct <= TREND_BEARISH_PCT {
                format!("Tendencia bajista en {}: {:+.1}% en el periodo.", series.series_name, pct)
            } else {
                continue;
            };
            entries.push(NarrativeEntry::new(NarrativeKind::Insight, text));
        }
    }

    // Top performer and outlier per ranking.
    for ranking in &payload.top_items {
        if let Some(first) = ranking.items.first() {
            entries.push(NarrativeEntry::new(
                NarrativeKind::Insight,
                format!(
                    "{} lidera {} con {:.2}.",
                    first.title,
                    chart_title_for_ref(&format!("top.{}", ranking.ranking_name)).to_lowercase(),
                    first.value
                ),
            ));
        }
        let total: f64 = ranking.items.iter().map(|i| i.value).sum();
        if total > 0.0
            && let Some(outlier) = ranking
                .items
                .iter()
                .find(|i| i.value / total > OUTLIER_SHARE)
        {
            entries.push(NarrativeEntry::new(
                NarrativeKind::Insight,
                format!(
                    "{} concentra el {:.0}% del total de {}.",
                    outlier.title,
                    100.0 * outlier.value / total,
                    ranking.metric
                ),
            ));
        }
    }

    // Threshold callouts.
    if let Some(low) = payload.kpis.get("low_stock_items")
        && *low > 0.0
    {
        entries.push(NarrativeEntry::new(
            NarrativeKind::Callout,
            format!("{:.0} productos están en o por debajo de su punto de reposición.", low),
        ));
    }
    if let Some(rate) = payload.kpis.get("escalation_rate")
        && *rate > ESCALATION_CALLOUT_PCT
    {
        entries.push(NarrativeEntry::new(
            NarrativeKind::Callout,
            format!("La tasa de escalado ({:.1}%) supera el umbral configurado.", rate),
        ));
    }
    if let Some((name, pct)) = steep_drop {
        entries.push(NarrativeEntry::new(
            NarrativeKind::Callout,
            format!("Caída pronunciada en {}: {:+.1}%.", name, pct),
        ));
    }

    // Keep 2..=5 entries: pad with a summary, then trim the overflow.
    if entries.len() < 2 {
        entries.push(NarrativeEntry::new(
            NarrativeKind::Summary,
            format!("Se analizaron {} fuentes de datos para responder la consulta.", payload.available_refs.len()),
        ));
    }
    entries.truncate(MAX_NARRATIVE_ENTRIES);

    let conclusion = conclusion_text(question, payload, &headline);
    Narrative { entries, conclusion }
}

fn headline_text(payload: &DataPayload) -> String {
    let mut principal: Option<(&str, f64)> = None;
    for name in KPI_PRIORITY {
        if let Some(v) = payload.kpis.get(*name) {
            principal = Some((name, *v));
            break;
        }
    }
    if principal.is_none() {
        principal = payload.kpis.iter().next().map(|(k, v)| (k.as_str(), *v));
    }

    match principal {
        Some((metric, value)) => match metric_format(metric) {
            ValueFormat::Currency => {
                format!("{}: ${:.2} en el periodo analizado.", metric_label(metric), value)
            },
            ValueFormat::Percent => {
                format!("{}: {:.1}% en el periodo analizado.", metric_label(metric), value)
            },
            ValueFormat::Number => {
                format!("{}: {:.0} en el periodo analizado.", metric_label(metric), value)
            },
        },
        None => "No se encontraron métricas para el periodo analizado.".to_string(),
    }
}

fn conclusion_text(question: &str, payload: &DataPayload, headline: &str) -> String {
    if payload.is_empty() {
        return format!("No hay datos disponibles para \"{}\".", question.trim());
    }
    if let Some(cmp) = &payload.comparison
        && let Some((metric, pct)) = cmp.delta_percents.iter().next()
    {
        let direction = if *pct >= 0.0 { "creció" } else { "cayó" };
        return format!(
            "{} {} {:.1}% respecto al periodo anterior.",
            metric_label(metric),
            direction,
            pct.abs()
        );
    }
    headline.to_string()
}

/// Percent change from the first to the last point of a series.
fn trend_percent(series: &crate::models::TimeSeries) -> Option<f64> {
    let first = series.points.first()?.value;
    let last = series.points.last()?.value;
    if first == 0.0 {
        return None;
    }
    Some(100.0 * (last - first) / first)
}

fn llm_entries(response: NarrativeResponse) -> Narrative {
    let mut entries = vec![NarrativeEntry::new(NarrativeKind::Headline, response.conclusion.clone())];
    if !response.summary.is_empty() {
        entries.push(NarrativeEntry::new(NarrativeKind::Summary, response.summary));
    }
    for insight in response.insights {
        entries.push(NarrativeEntry::new(NarrativeKind::Insight, insight));
    }
    if !response.recommendation.is_empty() {
        entries.push(NarrativeEntry::new(NarrativeKind::Callout, response.recommendation));
    }
    entries.truncate(MAX_NARRATIVE_ENTRIES);
    Narrative { entries, conclusion: response.conclusion }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;

    use super::*;
    use crate::models::{PayloadFragment, RankedItem, RouteKind, SeriesPoint, TimeSeries, TopItems};

    fn test_state(domain: Domain) -> ConversationState {
        let mut state = ConversationState::new(
            "como van las ventas",
            NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 30).unwrap(),
            "t-1",
            "trace-1",
            3,
        );
        state.routing_decision = Some(RoutingDecision {
            kind: RouteKind::Dashboard,
            domain,
            confidence: 0.9,
            rationale: "test".into(),
            direct_answer: None,
        });
        state
    }

    fn sales_payload() -> DataPayload {
        let mut payload = DataPayload::default();
        payload.absorb(
            "kpi.sales_summary",
            PayloadFragment::Kpis {
                values: BTreeMap::from([
                    ("total_sales".to_string(), 1500.0),
                    ("total_orders".to_string(), 30.0),
                    ("avg_order_value".to_string(), 50.0),
                    ("total_units".to_string(), 90.0),
                    ("extra_metric".to_string(), 1.0),
                ]),
            },
        );
        payload.absorb(
            "ts.sales_by_day",
            PayloadFragment::TimeSeries {
                series: TimeSeries {
                    series_name: "sales_by_day".into(),
                    points: vec![
                        SeriesPoint {
                            date: NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
                            value: 100.0,
                            label: None,
                        },
                        SeriesPoint {
                            date: NaiveDate::from_ymd_opt(2025, 11, 30).unwrap(),
                            value: 150.0,
                            label: None,
                        },
                    ],
                },
            },
        );
        payload.absorb(
            "top.products_by_revenue",
            PayloadFragment::TopItems {
                ranking: TopItems {
                    ranking_name: "products_by_revenue".into(),
                    metric: "value".into(),
                    items: vec![
                        RankedItem {
                            rank: 1,
                            id: "1".into(),
                            title: "Gift card".into(),
                            value: 900.0,
                            extra: BTreeMap::new(),
                        },
                        RankedItem {
                            rank: 2,
                            id: "2".into(),
                            title: "Mug".into(),
                            value: 600.0,
                            extra: BTreeMap::new(),
                        },
                    ],
                },
            },
        );
        payload
    }

    #[tokio::test]
    async fn dashboard_has_kpi_cards_and_two_chart_families() {
        let builder = PresentationBuilder::new(None, false);
        let payload = sales_payload();
        let spec = builder
            .build(&test_state(Domain::Sales), &payload, false, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!spec.slots.series.is_empty());
        assert!(spec.slots.series.len() <= MAX_KPI_CARDS);
        // Priority order holds.
        assert_eq!(spec.slots.series[0].metric, "total_sales");
        assert!(spec.slots.charts.len() >= 2);
        assert!(spec
            .slots
            .charts
            .iter()
            .any(|c| matches!(c, ChartSlot::Line(_) | ChartSlot::Area(_))));
        assert!(spec.slots.charts.iter().any(|c| matches!(c, ChartSlot::Bar(_))));
        assert!(spec.conclusion.is_some());
    }

    #[tokio::test]
    async fn every_emitted_ref_is_available_in_the_payload() {
        let builder = PresentationBuilder::new(None, false);
        let payload = sales_payload();
        let spec = builder
            .build(&test_state(Domain::Sales), &payload, false, &CancellationToken::new())
            .await
            .unwrap();

        for r in spec.referenced_refs() {
            assert!(payload.has_ref(r), "missing ref: {r}");
        }
    }

    #[tokio::test]
    async fn single_family_payload_still_gets_two_charts() {
        let builder = PresentationBuilder::new(None, false);
        let mut payload = DataPayload::default();
        payload.absorb(
            "ts.sales_by_day",
            PayloadFragment::TimeSeries {
                series: TimeSeries {
                    series_name: "sales_by_day".into(),
                    points: vec![
                        SeriesPoint {
                            date: NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
                            value: 10.0,
                            label: None,
                        },
                        SeriesPoint {
                            date: NaiveDate::from_ymd_opt(2025, 11, 2).unwrap(),
                            value: 12.0,
                            label: None,
                        },
                    ],
                },
            },
        );

        let spec = builder
            .build(&test_state(Domain::Sales), &payload, false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(spec.slots.charts.len(), 2);
    }

    #[tokio::test]
    async fn comparison_payload_adds_comparison_bar() {
        let builder = PresentationBuilder::new(None, false);
        let mut payload = sales_payload();
        payload.absorb(
            "comparison.sales_periods",
            PayloadFragment::Comparison {
                comparison: crate::models::Comparison {
                    current_period: crate::models::PeriodKpis {
                        label: "current".into(),
                        kpis: BTreeMap::from([("total_sales".to_string(), 1500.0)]),
                    },
                    previous_period: crate::models::PeriodKpis {
                        label: "previous".into(),
                        kpis: BTreeMap::from([("total_sales".to_string(), 1000.0)]),
                    },
                    deltas: BTreeMap::new(),
                    delta_percents: BTreeMap::new(),
                },
            },
        );

        let spec = builder
            .build(&test_state(Domain::Sales), &payload, false, &CancellationToken::new())
            .await
            .unwrap();
        assert!(spec
            .slots
            .charts
            .iter()
            .any(|c| matches!(c, ChartSlot::ComparisonBar(_))));
        // Cards pick up the delta ref.
        assert!(spec.slots.series.iter().all(|card| card.delta_ref.is_some()));
    }

    #[tokio::test]
    async fn narrative_flags_trend_top_performer_and_outlier() {
        let builder = PresentationBuilder::new(None, false);
        let payload = sales_payload();
        let spec = builder
            .build(&test_state(Domain::Sales), &payload, false, &CancellationToken::new())
            .await
            .unwrap();

        let narrative = &spec.slots.narrative;
        assert!(narrative.len() >= 2 && narrative.len() <= MAX_NARRATIVE_ENTRIES);
        assert!(matches!(narrative[0].kind, NarrativeKind::Headline));
        // +50% trend → bullish insight; Gift card (900 of 1500) → outlier.
        assert!(narrative
            .iter()
            .any(|e| matches!(e.kind, NarrativeKind::Insight) && e.text.contains("alcista")));
        assert!(narrative
            .iter()
            .any(|e| matches!(e.kind, NarrativeKind::Insight) && e.text.contains("Gift card")));
    }

    #[tokio::test]
    async fn low_stock_produces_a_callout() {
        let builder = PresentationBuilder::new(None, false);
        let mut payload = DataPayload::default();
        payload.absorb(
            "kpi.inventory_summary",
            PayloadFragment::Kpis {
                values: BTreeMap::from([
                    ("total_stock".to_string(), 240.0),
                    ("low_stock_items".to_string(), 3.0),
                ]),
            },
        );

        let spec = builder
            .build(&test_state(Domain::Inventory), &payload, false, &CancellationToken::new())
            .await
            .unwrap();
        assert!(spec
            .slots
            .narrative
            .iter()
            .any(|e| matches!(e.kind, NarrativeKind::Callout) && e.text.contains("reposición")));
    }

    #[tokio::test]
    async fn reduced_build_keeps_cards_and_narrative_only() {
        let builder = PresentationBuilder::new(None, false);
        let payload = sales_payload();
        let spec = builder
            .build(&test_state(Domain::Sales), &payload, true, &CancellationToken::new())
            .await
            .unwrap();
        assert!(spec.slots.charts.is_empty());
        assert!(!spec.slots.series.is_empty());
        assert!(!spec.slots.narrative.is_empty());
    }

    #[test]
    fn conclusion_for_empty_payload_names_the_question() {
        let builder = PresentationBuilder::new(None, false);
        let conclusion = builder.conclusion_for("como van las ventas", &DataPayload::default());
        assert!(conclusion.contains("como van las ventas"));
    }
}
