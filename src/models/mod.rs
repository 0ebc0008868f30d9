pub mod dashboard;
pub mod events;
pub mod payload;
pub mod requests;
pub mod routing;
pub mod state;

pub use dashboard::{
    AxisHints, ChartSlot, ChartSpec, ComparisonSpec, DashboardSlots, DashboardSpec, FilterSlot,
    KpiCard, NarrativeEntry, NarrativeKind, TableSpec, ValueFormat,
};
pub use events::{FinishReason, StreamEvent, TraceData};
pub use payload::{
    Comparison, DataPayload, DataTable, PayloadFragment, PeriodKpis, RankedItem, SeriesPoint,
    TimeSeries, TopItems,
};
pub use requests::{ChatStreamRequest, HealthResponse, InsightsRunResponse};
pub use routing::{Domain, RouteKind, RoutingDecision};
pub use state::{AgentStep, ConversationState, StepStatus};
