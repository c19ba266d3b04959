//! What a graph run reports: one status per component, counters per edge,
//! memory statistics and the aggregated result code.

use serde::Serialize;

use rivulet_components::{EdgeCounts, ResultCode};
use rivulet_mem::MemStats;

/// Terminal state of one component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub id: String,
    pub kind: String,
    pub phase: u32,
    pub code: ResultCode,
    pub message: Option<String>,
    pub elapsed_ms: u64,
}

impl ComponentStatus {
    pub(crate) fn not_run(id: &str, kind: &str, phase: u32) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            phase,
            code: ResultCode::NotRun,
            message: None,
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeReport {
    pub id: u64,
    /// `component:port`
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub counts: EdgeCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphResult {
    pub run_id: String,
    pub code: ResultCode,
    pub components: Vec<ComponentStatus>,
    pub edges: Vec<EdgeReport>,
    pub memory: MemStats,
    pub elapsed_ms: u64,
}

impl GraphResult {
    /// The worst code of all components; `Ok` for an empty graph.
    pub(crate) fn aggregate(components: &[ComponentStatus]) -> ResultCode {
        components
            .iter()
            .map(|c| c.code)
            .max_by_key(|c| c.severity())
            .unwrap_or(ResultCode::Ok)
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    pub fn component(&self, id: &str) -> Option<&ComponentStatus> {
        self.components.iter().find(|c| c.id == id)
    }

    pub fn edge(&self, from: &str, to: &str) -> Option<&EdgeReport> {
        self.edges.iter().find(|e| e.from == from && e.to == to)
    }

    /// First component that ended with the graph's code, if it is a failure.
    pub fn failure(&self) -> Option<&ComponentStatus> {
        if self.is_ok() {
            return None;
        }
        self.components.iter().find(|c| c.code == self.code)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(id: &str, code: ResultCode) -> ComponentStatus {
        ComponentStatus {
            code,
            ..ComponentStatus::not_run(id, "TRASH", 0)
        }
    }

    #[test]
    fn worst_code_wins() {
        let all_ok = [status("a", ResultCode::Ok), status("b", ResultCode::Ok)];
        assert_eq!(GraphResult::aggregate(&all_ok), ResultCode::Ok);

        let mixed = [
            status("a", ResultCode::Stopped),
            status("b", ResultCode::FatalError),
            status("c", ResultCode::Error),
        ];
        assert_eq!(GraphResult::aggregate(&mixed), ResultCode::FatalError);
        assert_eq!(GraphResult::aggregate(&[]), ResultCode::Ok);
    }
}
