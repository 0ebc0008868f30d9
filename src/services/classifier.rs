//! Intent classifier
//!
//! Two-stage classification. Stage 1 is deterministic keyword matching over
//! a lowercased, accent-folded copy of the question; it is the fast, correct
//! path for the large majority of inputs and always runs first. Stage 2 is
//! an optional LLM fallback for questions the vocabularies cannot place.
//!
//! Domain matching is order-sensitive: a domain whose keyword contains
//! another domain's keyword as a substring must be tested first
//! ("inventario" contains "venta", so inventory is tested before sales).

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::models::{Domain, RouteKind, RoutingDecision};
use crate::services::llm::{CLASSIFY_PROMPT, ClassifyRequest, LlmClient};
use crate::utils::text::{contains_any, fold_for_matching};

/// Questions shorter than this with a back-reference and no chat context
/// are treated as ambiguous.
const AMBIGUOUS_MAX_CHARS: usize = 25;

/// Greeting / small-talk patterns with their canned replies.
const CONVERSATIONAL_REPLIES: &[(&[&str], &str)] = &[
    (
        &["hola", "hello", "hi ", "buenos dias", "buenas tardes", "buenas noches", "hey "],
        "¡Hola! Soy tu asistente de analítica. Pregúntame por ventas, inventario o \
         conversaciones, por ejemplo: \"¿cómo van las ventas este mes?\"",
    ),
    (
        &["gracias", "thank you", "thanks", "genial", "perfecto"],
        "¡De nada! ¿Quieres revisar algo más de tus datos?",
    ),
    (
        &["que puedes hacer", "what can you do", "ayuda", "help", "como funcionas"],
        "Puedo responder preguntas sobre ventas, inventario y conversaciones de clientes, \
         y armar un panel con gráficos y conclusiones. Prueba: \"muéstrame las ventas de \
         noviembre\".",
    ),
    (&["adios", "bye", "hasta luego", "nos vemos"], "¡Hasta luego! Aquí estaré cuando necesites más datos."),
];

/// Quantitative / noun terms that signal the user wants data.
const DATA_KEYWORDS: &[&str] = &[
    "cuanto", "cuanta", "cuantos", "cuantas", "how many", "how much", "total", "cantidad",
    "pedido", "orders", "venta", "sales", "stock", "inventario", "inventory", "ingreso",
    "revenue", "cliente", "customer", "promedio", "average", "conversacion", "conversation",
    "producto", "product", "unidades", "units", "facturacion",
];

/// Visualization terms that signal the user wants a dashboard.
const DASHBOARD_KEYWORDS: &[&str] = &[
    "muestrame", "muestra", "show me", "grafico", "grafica", "chart", "graph", "tendencia",
    "trend", "como va", "como van", "como esta", "como estan", "how is", "how are", "compara",
    "comparame", "compare", " vs ", "versus", "dashboard", "panel", "evolucion", "evolution",
    "resumen", "overview",
];

/// Domain vocabularies in matching order. Inventory comes first: its tokens
/// contain sales tokens as substrings ("inVENTArio"), and conversations
/// before sales for the same reason in derived forms.
const DOMAIN_KEYWORDS: &[(Domain, &[&str])] = &[
    (
        Domain::Inventory,
        &["inventario", "inventory", "stock", "almacen", "warehouse", "existencias", "reposicion", "reorder"],
    ),
    (
        Domain::Conversations,
        &["conversacion", "conversaciones", "conversation", "chats", "mensaje", "message", "escalado", "escalacion", "escalation", "atencion al cliente"],
    ),
    (
        Domain::Sales,
        &["venta", "ventas", "sales", "pedido", "pedidos", "orders", "ingreso", "revenue", "facturacion", "producto", "productos"],
    ),
];

static BACK_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(ese|eso|esa|este|esto|aquello|mismo|misma|that|this|it|same)\b|y el |y la |and the ")
        .expect("back-reference pattern must compile")
});

/// Outcome of the deterministic stage, before synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KeywordSignals {
    needs_data: bool,
    needs_dashboard: bool,
    domain: Option<Domain>,
}

pub struct IntentClassifier {
    llm: Option<Arc<LlmClient>>,
    clarify_on_ambiguity: bool,
}

impl IntentClassifier {
    pub fn new(llm: Option<Arc<LlmClient>>, clarify_on_ambiguity: bool) -> Self {
        Self { llm, clarify_on_ambiguity }
    }

    /// Classify a question. Never fails: when both stages come up empty the
    /// decision is a clarification (or a low-confidence best guess when the
    /// previous turn already asked for one).
    pub async fn classify(
        &self,
        question: &str,
        chat_context: &str,
        prev_turn_was_clarification: bool,
        cancel: &CancellationToken,
    ) -> RoutingDecision {
        let folded = fold_for_matching(question);

        // 1. Conversational patterns end the pipeline right here.
        if let Some(reply) = conversational_reply(&folded) {
            return RoutingDecision {
                kind: RouteKind::Conversational,
                domain: Domain::Unknown,
                confidence: 0.95,
                rationale: "greeting/small-talk pattern".to_string(),
                direct_answer: Some(reply.to_string()),
            };
        }

        // 2. Short question + back-reference + no context = ambiguous.
        if self.clarify_on_ambiguity
            && !prev_turn_was_clarification
            && is_ambiguous(&folded, chat_context)
        {
            return clarification_decision("short back-reference without conversation context");
        }

        // 3/4. Keyword vocabularies.
        let signals = keyword_signals(&folded);
        if signals.needs_data || signals.needs_dashboard {
            return synthesize(signals, "keyword match");
        }

        // Stage 2: LLM fallback, then synthesis of whatever it returned.
        if let Some(llm) = &self.llm {
            match self.classify_with_llm(llm, question, chat_context, cancel).await {
                Ok(decision) => return decision,
                Err(e) => {
                    tracing::warn!("LLM classification failed ({}), using default decision", e);
                    return RoutingDecision {
                        kind: RouteKind::DataOnly,
                        domain: Domain::Unknown,
                        confidence: 0.2,
                        rationale: "LLM fallback failed twice; defaulting to data_only".to_string(),
                        direct_answer: None,
                    };
                },
            }
        }

        if prev_turn_was_clarification {
            // Already asked once; proceed with the best guess.
            return RoutingDecision {
                kind: RouteKind::DataOnly,
                domain: Domain::Sales,
                confidence: 0.3,
                rationale: "no keyword signal after a clarification turn; best guess".to_string(),
                direct_answer: None,
            };
        }

        clarification_decision("no data or dashboard signal in the question")
    }

    async fn classify_with_llm(
        &self,
        llm: &LlmClient,
        question: &str,
        chat_context: &str,
        cancel: &CancellationToken,
    ) -> Result<RoutingDecision, crate::services::llm::LlmError> {
        let request = ClassifyRequest { question, chat_context };
        let response: crate::services::llm::ClassifyResponse = llm
            .complete_structured(CLASSIFY_PROMPT, &request.user_prompt(), cancel)
            .await?;

        Ok(RoutingDecision {
            kind: response.kind,
            domain: response.domain,
            confidence: response.confidence.clamp(0.0, 1.0),
            rationale: if response.rationale.is_empty() {
                "LLM classification".to_string()
            } else {
                response.rationale
            },
            direct_answer: None,
        })
    }
}

fn conversational_reply(folded: &str) -> Option<&'static str> {
    // Pad so word-boundary-ish prefixes like "hi " match at the end too.
    let padded = format!("{} ", folded.trim());
    CONVERSATIONAL_REPLIES
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| padded.contains(p)))
        .map(|(_, reply)| *reply)
}

fn is_ambiguous(folded: &str, chat_context: &str) -> bool {
    folded.chars().count() < AMBIGUOUS_MAX_CHARS
        && BACK_REFERENCE.is_match(folded)
        && chat_context.trim().is_empty()
}

fn keyword_signals(folded: &str) -> KeywordSignals {
    KeywordSignals {
        needs_data: contains_any(folded, DATA_KEYWORDS),
        needs_dashboard: contains_any(folded, DASHBOARD_KEYWORDS),
        domain: detect_domain(folded),
    }
}

/// True when the folded question leans on a pronoun or back-reference.
pub(crate) fn has_back_reference(folded: &str) -> bool {
    BACK_REFERENCE.is_match(folded)
}

/// First matching domain in declaration order. Order matters: see the
/// module docs for the substring rule.
pub(crate) fn detect_domain(folded: &str) -> Option<Domain> {
    DOMAIN_KEYWORDS
        .iter()
        .find(|(_, keywords)| contains_any(folded, keywords))
        .map(|(domain, _)| *domain)
}

fn synthesize(signals: KeywordSignals, rationale: &str) -> RoutingDecision {
    let kind = if signals.needs_dashboard { RouteKind::Dashboard } else { RouteKind::DataOnly };
    let domain = signals.domain.unwrap_or(Domain::Unknown);
    let confidence = match (signals.domain.is_some(), signals.needs_dashboard) {
        (true, _) => 0.9,
        (false, true) => 0.6,
        (false, false) => 0.5,
    };
    RoutingDecision {
        kind,
        domain,
        confidence,
        rationale: format!("{} ({}/{})", rationale, kind.as_str(), domain.as_str()),
        direct_answer: None,
    }
}

fn clarification_decision(why: &str) -> RoutingDecision {
    RoutingDecision {
        kind: RouteKind::Clarification,
        domain: Domain::Unknown,
        confidence: 0.4,
        rationale: why.to_string(),
        direct_answer: Some(
            "¿Puedes darme más detalle? Por ejemplo: \"¿cómo van las ventas de este mes?\" \
             o \"¿qué productos tienen poco stock?\""
                .to_string(),
        ),
    }
}
