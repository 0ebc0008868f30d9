//! Data agent
//!
//! Selects a bounded set of catalog queries for a routed question, executes
//! them through the cache with bounded concurrency, and folds the results
//! into the data payload. Selection is deterministic when the question names
//! a domain clearly; the LLM selector is an optional fallback for the
//! ambiguous remainder and may only pick catalog ids.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::models::{
    AgentStep, ConversationState, DataPayload, Domain, PayloadFragment, RoutingDecision,
    StepStatus,
};
use crate::services::catalog::QueryCatalog;
use crate::services::classifier;
use crate::services::emitter::StreamEmitter;
use crate::services::executor::{ExecError, QueryExecutor};
use crate::services::llm::{
    LlmClient, MAX_SELECTED_QUERIES, SELECT_QUERIES_PROMPT, SelectionRequest, SelectionResponse,
};
use crate::services::result_cache::ResultCache;
use crate::utils::text::{contains_any, fold_for_matching};

/// Deterministic domain → query-id map. Order of ids inside a list is the
/// execution priority; the domain order mirrors the classifier's
/// substring-sensitive matching order.
const DOMAIN_QUERIES: &[(Domain, &[&str])] = &[
    (Domain::Inventory, &["kpi_inventory_summary", "stock_reorder_analysis", "top_products_by_units"]),
    (Domain::Conversations, &["kpi_conversations_summary", "ts_conversations_by_day"]),
    (Domain::Sales, &["kpi_sales_summary", "ts_sales_by_day", "top_products_by_revenue"]),
];

const COMPARE_KEYWORDS: &[&str] =
    &["compara", "comparame", "compare", " vs ", "versus", "anterior", "previous", "pasado"];

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("no business data available: every selected query failed or came back empty")]
    DataUnavailable,

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
struct SelectedQuery {
    id: String,
    params: BTreeMap<String, String>,
}

/// Outcome of one executed query, joined back in selection order.
struct QueryOutcome {
    id: String,
    output_ref: &'static str,
    result: Result<(PayloadFragment, bool), ExecError>,
}

pub struct DataAgent {
    catalog: Arc<QueryCatalog>,
    executor: Arc<QueryExecutor>,
    cache: Arc<ResultCache>,
    llm: Option<Arc<LlmClient>>,
    use_llm_selection: bool,
    query_concurrency: usize,
}

impl DataAgent {
    pub fn new(
        catalog: Arc<QueryCatalog>,
        executor: Arc<QueryExecutor>,
        cache: Arc<ResultCache>,
        llm: Option<Arc<LlmClient>>,
        use_llm_selection: bool,
        query_concurrency: usize,
    ) -> Self {
        Self {
            catalog,
            executor,
            cache,
            llm,
            use_llm_selection,
            query_concurrency: query_concurrency.clamp(1, MAX_SELECTED_QUERIES),
        }
    }

    /// Fetch the payload for a routed question. Partial success is success;
    /// the stage fails only when nothing usable came back.
    pub async fn fetch(
        &self,
        state: &mut ConversationState,
        emitter: &StreamEmitter,
        cancel: &CancellationToken,
    ) -> Result<DataPayload, AgentError> {
        let selected = self.select_queries(state, emitter, cancel).await?;

        let step = AgentStep::new("fetch_data", StepStatus::Progress)
            .with_message(format!("executing {} queries", selected.len()))
            .with_detail(serde_json::json!({
                "query_ids": selected.iter().map(|q| q.id.as_str()).collect::<Vec<_>>(),
            }));
        state.record_step(step.clone());
        emitter.agent_step(&step).await.map_err(|_| AgentError::Cancelled)?;

        let outcomes = self.execute_selected(&selected, cancel).await;

        let mut payload = DataPayload::default();
        let mut failed_ids = Vec::new();

        for outcome in &outcomes {
            match &outcome.result {
                Ok((fragment, cached)) => {
                    let empty = fragment.is_empty();
                    payload.absorb(outcome.output_ref, fragment.clone());
                    let step = AgentStep::new("query", StepStatus::Done)
                        .with_message(outcome.id.clone())
                        .with_detail(serde_json::json!({
                            "cached": cached,
                            "empty": empty,
                        }));
                    state.record_step(step.clone());
                    emitter.agent_step(&step).await.map_err(|_| AgentError::Cancelled)?;
                },
                Err(ExecError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) => {
                    failed_ids.push(outcome.id.clone());
                    let step = AgentStep::new("query", StepStatus::Error)
                        .with_message(outcome.id.clone())
                        .with_detail(serde_json::json!({ "error": e.to_string() }));
                    state.record_step(step.clone());
                    emitter.agent_step(&step).await.map_err(|_| AgentError::Cancelled)?;
                },
            }
        }

        state.failed_query_ids = failed_ids;

        if payload.is_empty() {
            return Err(AgentError::DataUnavailable);
        }
        Ok(payload)
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    async fn select_queries(
        &self,
        state: &mut ConversationState,
        emitter: &StreamEmitter,
        cancel: &CancellationToken,
    ) -> Result<Vec<SelectedQuery>, AgentError> {
        let folded = fold_for_matching(&state.question);
        let decision = state.routing_decision.clone();

        let deterministic = self.deterministic_selection(&folded, decision.as_ref(), state);

        let selected = match deterministic {
            Some(selection) => selection,
            None => match self.llm_selection(state, cancel).await {
                Some(selection) => selection,
                None => {
                    // Heuristic fallback keyed on the routing decision's
                    // domain (best guess when unknown).
                    let domain = decision
                        .as_ref()
                        .map(|d| d.domain)
                        .filter(|d| *d != Domain::Unknown)
                        .unwrap_or(Domain::Sales);
                    self.selection_for_domain(domain, &folded, state)
                },
            },
        };

        let selected: Vec<SelectedQuery> = selected
            .into_iter()
            .filter(|q| !state.excluded_query_ids.contains(&q.id))
            .take(MAX_SELECTED_QUERIES)
            .collect();

        if selected.is_empty() {
            let step = AgentStep::new("fetch_data", StepStatus::Error)
                .with_message("no queries left to execute after exclusions");
            state.record_step(step.clone());
            emitter.agent_step(&step).await.map_err(|_| AgentError::Cancelled)?;
            return Err(AgentError::DataUnavailable);
        }

        Ok(selected)
    }

    /// Deterministic path: clear domain keywords and no ambiguous
    /// back-references.
    fn deterministic_selection(
        &self,
        folded: &str,
        decision: Option<&RoutingDecision>,
        state: &ConversationState,
    ) -> Option<Vec<SelectedQuery>> {
        if classifier::has_back_reference(folded) {
            return None;
        }
        let domain = classifier::detect_domain(folded)
            .or_else(|| decision.map(|d| d.domain).filter(|d| *d != Domain::Unknown));

        match (domain, wants_comparison(folded)) {
            (Some(domain), _) => Some(self.selection_for_domain(domain, folded, state)),
            // A comparison request is specific enough even without a domain
            // keyword; it defaults to the sales comparison set.
            (None, true) => Some(self.selection_for_domain(Domain::Sales, folded, state)),
            (None, false) => None,
        }
    }

    fn selection_for_domain(
        &self,
        domain: Domain,
        folded: &str,
        state: &ConversationState,
    ) -> Vec<SelectedQuery> {
        let ids = DOMAIN_QUERIES
            .iter()
            .find(|(d, _)| *d == domain)
            .map(|(_, ids)| *ids)
            .unwrap_or(&["kpi_sales_summary", "ts_sales_by_day", "top_products_by_revenue"]);

        let mut selected: Vec<SelectedQuery> = Vec::with_capacity(MAX_SELECTED_QUERIES);

        if wants_comparison(folded) && domain == Domain::Sales {
            selected.push(SelectedQuery {
                id: "comparison_sales_periods".to_string(),
                params: comparison_params(state),
            });
        }

        for id in ids {
            if selected.len() >= MAX_SELECTED_QUERIES {
                break;
            }
            if selected.iter().any(|q| q.id == *id) {
                continue;
            }
            selected.push(SelectedQuery { id: (*id).to_string(), params: base_params(state) });
        }

        selected
    }

    /// LLM selection for the ambiguous remainder. JSON-shape repair lives in
    /// the client; a semantically invalid reply (unknown id, oversized set)
    /// gets one re-ask with the validation error, then the caller falls back
    /// to the heuristic map.
    async fn llm_selection(
        &self,
        state: &mut ConversationState,
        cancel: &CancellationToken,
    ) -> Option<Vec<SelectedQuery>> {
        if !self.use_llm_selection {
            return None;
        }
        let llm = self.llm.as_ref()?;

        let date_from = state.date_from.to_string();
        let date_to = state.date_to.to_string();
        let request = SelectionRequest {
            question: &state.question,
            date_from: &date_from,
            date_to: &date_to,
        };
        let prompt = request.user_prompt(&self.catalog);

        let mut response: SelectionResponse = match llm
            .complete_structured(SELECT_QUERIES_PROMPT, &prompt, cancel)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("LLM query selection failed ({}), using heuristic map", e);
                state.record_step(
                    AgentStep::new("select_queries", StepStatus::Error)
                        .with_message("LLM selection failed; heuristic fallback"),
                );
                return None;
            },
        };

        if let Err(validation) = response.validate(&self.catalog) {
            tracing::warn!("LLM selection rejected ({}), asking once more", validation);
            let retry_prompt = format!(
                "{prompt}\n\nYour previous selection was rejected: {validation}\n\
                 Pick only ids from the catalog, at most {MAX_SELECTED_QUERIES}."
            );
            response = match llm
                .complete_structured(SELECT_QUERIES_PROMPT, &retry_prompt, cancel)
                .await
            {
                Ok(r) => r,
                Err(_) => return None,
            };
            if response.validate(&self.catalog).is_err() {
                state.record_step(
                    AgentStep::new("select_queries", StepStatus::Error)
                        .with_message("LLM selection invalid twice; heuristic fallback"),
                );
                return None;
            }
        }

        let mut params = base_params(state);
        if response
            .query_ids
            .iter()
            .any(|id| id == "comparison_sales_periods")
        {
            params = comparison_params(state);
        }
        // Model-provided params win over the injected defaults; each entry
        // re-validates them at canonicalization time.
        params.extend(response.params);

        Some(
            response
                .query_ids
                .into_iter()
                .map(|id| SelectedQuery { id, params: params.clone() })
                .collect(),
        )
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    async fn execute_selected(
        &self,
        selected: &[SelectedQuery],
        cancel: &CancellationToken,
    ) -> Vec<QueryOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.query_concurrency));
        let mut join_set = JoinSet::new();

        for (idx, query) in selected.iter().cloned().enumerate() {
            let catalog = Arc::clone(&self.catalog);
            let executor = Arc::clone(&self.executor);
            let cache = Arc::clone(&self.cache);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();

            join_set.spawn(async move {
                // Never fails: the semaphore is not closed while tasks run.
                let _permit = semaphore.acquire_owned().await.ok();

                let Some(entry) = catalog.lookup(&query.id) else {
                    return (
                        idx,
                        QueryOutcome {
                            id: query.id.clone(),
                            output_ref: "",
                            result: Err(ExecError::UnknownQuery(query.id)),
                        },
                    );
                };

                let canonical = match QueryExecutor::canonicalize(entry, &query.params) {
                    Ok(c) => c,
                    Err(e) => {
                        return (
                            idx,
                            QueryOutcome {
                                id: query.id,
                                output_ref: entry.output_ref,
                                result: Err(e),
                            },
                        );
                    },
                };

                let key = canonical.cache_key(entry.id);
                let result = cache
                    .get_or_fetch(&key, || async {
                        executor
                            .execute_entry(entry, &canonical, &cancel)
                            .await
                            .map(|outcome| outcome.fragment)
                    })
                    .await;

                (idx, QueryOutcome { id: query.id, output_ref: entry.output_ref, result })
            });
        }

        let mut indexed: Vec<Option<QueryOutcome>> = Vec::new();
        indexed.resize_with(selected.len(), || None);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, outcome)) => indexed[idx] = Some(outcome),
                Err(e) => tracing::error!("query task panicked: {}", e),
            }
        }
        indexed.into_iter().flatten().collect()
    }
}

fn wants_comparison(folded: &str) -> bool {
    contains_any(folded, COMPARE_KEYWORDS)
}

fn base_params(state: &ConversationState) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("date_from".to_string(), state.date_from.to_string()),
        ("date_to".to_string(), state.date_to.to_string()),
    ])
}

/// The previous period is the window of the same length ending the day
/// before `date_from`.
fn comparison_params(state: &ConversationState) -> BTreeMap<String, String> {
    let span_days = (state.date_to - state.date_from).num_days().max(0);
    let prev_to = state.date_from - ChronoDuration::days(1);
    let prev_from = prev_to - ChronoDuration::days(span_days);

    let mut params = base_params(state);
    params.insert("prev_date_from".to_string(), prev_from.to_string());
    params.insert("prev_date_to".to_string(), prev_to.to_string());
    params
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn test_state(question: &str) -> ConversationState {
        ConversationState::new(
            question,
            NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 30).unwrap(),
            "t-1",
            "trace-1",
            3,
        )
    }

    fn agent_without_llm(pool: sqlx::SqlitePool) -> DataAgent {
        DataAgent::new(
            Arc::new(QueryCatalog::builtin().unwrap()),
            Arc::new(QueryExecutor::new(pool, 30)),
            Arc::new(ResultCache::new(900)),
            None,
            false,
            3,
        )
    }

    async fn seeded_pool() -> sqlx::SqlitePool {
        // One connection: every pool connection of a :memory: database is
        // its own empty database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::create_business_schema(&pool).await.unwrap();
        sqlx::query(
            "INSERT INTO orders (order_date, channel, total_amount, units) VALUES \
             ('2025-11-03', 'web', 120.0, 2), \
             ('2025-11-10', 'web', 80.0, 1), \
             ('2025-10-05', 'store', 60.0, 1)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO products (id, name, category) VALUES (1, 'Gift card', 'misc')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO order_lines (order_id, product_id, quantity, revenue) VALUES \
             (1, 1, 2, 120.0), (2, 1, 1, 80.0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn sales_question_selects_the_sales_set_deterministically() {
        let pool = seeded_pool().await;
        let agent = agent_without_llm(pool);
        let mut state = test_state("como van las ventas");
        let (emitter, _rx) = StreamEmitter::channel("msg");

        let selected = agent
            .select_queries(&mut state, &emitter, &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<&str> = selected.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["kpi_sales_summary", "ts_sales_by_day", "top_products_by_revenue"]);
    }

    #[tokio::test]
    async fn inventory_question_selects_inventory_not_sales() {
        let pool = seeded_pool().await;
        let agent = agent_without_llm(pool);
        let mut state = test_state("como esta el inventario");
        let (emitter, _rx) = StreamEmitter::channel("msg");

        let selected = agent
            .select_queries(&mut state, &emitter, &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<&str> = selected.iter().map(|q| q.id.as_str()).collect();
        assert!(ids.contains(&"kpi_inventory_summary"));
        assert!(ids.contains(&"stock_reorder_analysis"));
        assert!(!ids.contains(&"kpi_sales_summary"));
    }

    #[tokio::test]
    async fn comparison_question_includes_the_comparison_query() {
        let pool = seeded_pool().await;
        let agent = agent_without_llm(pool);
        let mut state = test_state("comparame noviembre vs octubre de ventas");
        let (emitter, _rx) = StreamEmitter::channel("msg");

        let selected = agent
            .select_queries(&mut state, &emitter, &CancellationToken::new())
            .await
            .unwrap();
        assert!(selected.iter().any(|q| q.id == "comparison_sales_periods"));
        assert!(selected.len() <= MAX_SELECTED_QUERIES);

        let cmp = selected
            .iter()
            .find(|q| q.id == "comparison_sales_periods")
            .unwrap();
        assert_eq!(cmp.params.get("prev_date_to").map(String::as_str), Some("2025-10-31"));
        assert_eq!(cmp.params.get("prev_date_from").map(String::as_str), Some("2025-10-02"));
    }

    #[tokio::test]
    async fn selection_never_exceeds_the_cap() {
        let pool = seeded_pool().await;
        let agent = agent_without_llm(pool);
        let mut state =
            test_state("comparame las ventas y pedidos e ingresos de productos vs el mes anterior");
        let (emitter, _rx) = StreamEmitter::channel("msg");

        let selected = agent
            .select_queries(&mut state, &emitter, &CancellationToken::new())
            .await
            .unwrap();
        assert!(selected.len() <= MAX_SELECTED_QUERIES);
    }

    #[tokio::test]
    async fn fetch_assembles_payload_with_available_refs() {
        let pool = seeded_pool().await;
        let agent = agent_without_llm(pool);
        let mut state = test_state("como van las ventas");
        state.routing_decision = Some(RoutingDecision {
            kind: crate::models::RouteKind::Dashboard,
            domain: Domain::Sales,
            confidence: 0.9,
            rationale: "test".into(),
            direct_answer: None,
        });
        let (emitter, mut rx) = StreamEmitter::channel("msg");
        // Keep the channel drained so the emitter never blocks.
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let payload = agent
            .fetch(&mut state, &emitter, &CancellationToken::new())
            .await
            .unwrap();
        drop(emitter);
        let _ = drain.await;

        assert!(payload.has_ref("kpi.sales_summary"));
        assert!(payload.has_ref("ts.sales_by_day"));
        assert!(payload.has_ref("top.products_by_revenue"));
        assert_eq!(payload.kpis.get("total_sales"), Some(&200.0));
        assert!(state.agent_steps.iter().any(|s| s.step == "query"));
    }

    #[tokio::test]
    async fn excluded_ids_are_skipped_on_retry() {
        let pool = seeded_pool().await;
        let agent = agent_without_llm(pool);
        let mut state = test_state("como van las ventas");
        state.excluded_query_ids = vec!["ts_sales_by_day".to_string()];
        let (emitter, _rx) = StreamEmitter::channel("msg");

        let selected = agent
            .select_queries(&mut state, &emitter, &CancellationToken::new())
            .await
            .unwrap();
        assert!(selected.iter().all(|q| q.id != "ts_sales_by_day"));
    }

    #[tokio::test]
    async fn empty_database_yields_data_unavailable() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::create_business_schema(&pool).await.unwrap();
        let agent = agent_without_llm(pool);
        let mut state = test_state("como van las ventas");
        let (emitter, mut rx) = StreamEmitter::channel("msg");
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let err = agent
            .fetch(&mut state, &emitter, &CancellationToken::new())
            .await
            .unwrap_err();
        drop(emitter);
        let _ = drain.await;
        assert!(matches!(err, AgentError::DataUnavailable));
    }
}
