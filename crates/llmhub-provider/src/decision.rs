use crate::circuit::CircuitState;

/// Why a provider entered (or left) the decision chain of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    Selected,
    Sticky,
    Failed,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Selected => "selected",
            DecisionReason::Sticky => "sticky",
            DecisionReason::Failed => "failed",
        }
    }
}

/// One step in the per-request diagnostic trail of providers tried.
#[derive(Debug, Clone)]
pub struct DecisionEntry {
    pub provider_id: i64,
    pub provider_name: String,
    pub reason: DecisionReason,
    pub circuit: CircuitState,
    pub attempt: u32,
    pub error: Option<String>,
}
