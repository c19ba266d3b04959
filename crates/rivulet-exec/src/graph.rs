//! Graph: owns components and edges, initialises them, runs them phase by
//! phase on their own threads and folds their outcomes into a `GraphResult`.

use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rivulet_core::config::EngineConfig;
use rivulet_core::id::EdgeId;
use rivulet_core::schema::RecordMetadata;

use rivulet_components::{
    edge, CancellationToken, Component, EdgeEnv, EdgeStats, GraphContext,
    InitContext, Ports, ResultCode, RunContext,
};

use crate::error::{GraphError, Result};
use crate::metrics::{ComponentStatus, EdgeReport, GraphResult};

struct Node {
    id: String,
    phase: u32,
    component: Box<dyn Component>,
    /// Edge index per port slot.
    inputs: Vec<Option<usize>>,
    outputs: Vec<Option<usize>>,
}

struct EdgeDef {
    id: EdgeId,
    from: (usize, usize),
    to: (usize, usize),
    metadata: Arc<RecordMetadata>,
}

pub struct Graph {
    context: Arc<GraphContext>,
    cancel: CancellationToken,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<EdgeDef>,
}

impl Graph {
    pub fn new(context: GraphContext) -> Self {
        Self {
            context: Arc::new(context),
            cancel: CancellationToken::new(),
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
        }
    }

    /// Build a context over the storage `config.spill_dir` selects.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        let storage = rivulet_io::build_storage(&config);
        Ok(Self::new(GraphContext::new(config, storage)?))
    }

    pub fn context(&self) -> &Arc<GraphContext> {
        &self.context
    }

    /// Cancelling this token stops the running graph; every component
    /// reports `STOPPED` at its next checkpoint or port wait.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a component to phase 0.
    pub fn add(&mut self, id: &str, component: impl Component + 'static) -> Result<()> {
        self.add_boxed(id, 0, Box::new(component))
    }

    pub fn add_in_phase(
        &mut self,
        id: &str,
        phase: u32,
        component: impl Component + 'static,
    ) -> Result<()> {
        self.add_boxed(id, phase, Box::new(component))
    }

    pub fn add_boxed(&mut self, id: &str, phase: u32, component: Box<dyn Component>) -> Result<()> {
        if self.index.contains_key(id) {
            return Err(GraphError::DuplicateId(id.to_string()));
        }
        self.index.insert(id.to_string(), self.nodes.len());
        self.nodes.push(Node {
            id: id.to_string(),
            phase,
            component,
            inputs: Vec::new(),
            outputs: Vec::new(),
        });
        Ok(())
    }

    /// Connect output port `from.1` of `from.0` to input port `to.1` of
    /// `to.0`. Each port takes at most one edge, and an edge may not lead
    /// back into an earlier phase.
    pub fn connect(
        &mut self,
        from: (&str, usize),
        to: (&str, usize),
        metadata: Arc<RecordMetadata>,
    ) -> Result<EdgeId> {
        let edge_err = |reason: String| GraphError::Edge {
            from: format!("{}:{}", from.0, from.1),
            to: format!("{}:{}", to.0, to.1),
            reason,
        };
        let src = self.node_index(from.0)?;
        let dst = self.node_index(to.0)?;
        if src == dst {
            return Err(edge_err("a component cannot feed itself".into()));
        }
        if self.nodes[src].phase > self.nodes[dst].phase {
            return Err(edge_err(format!(
                "phase {} cannot feed phase {}",
                self.nodes[src].phase, self.nodes[dst].phase
            )));
        }
        if matches!(self.nodes[src].outputs.get(from.1), Some(Some(_))) {
            return Err(edge_err(format!("output port {} is already connected", from.1)));
        }
        if matches!(self.nodes[dst].inputs.get(to.1), Some(Some(_))) {
            return Err(edge_err(format!("input port {} is already connected", to.1)));
        }

        let slot = self.edges.len();
        let id = EdgeId::new(slot as u64);
        set_slot(&mut self.nodes[src].outputs, from.1, slot);
        set_slot(&mut self.nodes[dst].inputs, to.1, slot);
        self.edges.push(EdgeDef {
            id,
            from: (src, from.1),
            to: (dst, to.1),
            metadata,
        });
        Ok(id)
    }

    fn node_index(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::UnknownComponent(id.to_string()))
    }

    /// Initialise every component, then run the phases in ascending order.
    ///
    /// Returns `Err` only when the graph cannot start (an `init` failure).
    /// Run-time failures are reported through the result's codes.
    pub fn run(mut self) -> Result<GraphResult> {
        let started = Instant::now();
        self.init()?;

        let config = self.context.config();
        let env = EdgeEnv {
            cancel: self.cancel.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            max_record_size: config.max_record_size,
        };
        let capacity = config.edge_capacity;
        let close_on_fatal = config.close_ports_on_fatal;

        let mut ports: Vec<Option<Ports>> = self.nodes.iter().map(|_| Some(Ports::new())).collect();
        let mut out_stats: Vec<Vec<Arc<EdgeStats>>> = vec![Vec::new(); self.nodes.len()];
        let mut stats = Vec::with_capacity(self.edges.len());
        for def in &self.edges {
            let (src, dst) = (def.from.0, def.to.0);
            // Cross-phase edges buffer everything so the earlier phase can finish.
            let bounded = (self.nodes[src].phase == self.nodes[dst].phase).then_some(capacity);
            let (out, inp, st) = edge(def.id, Arc::clone(&def.metadata), bounded, &env);
            if let Some(p) = ports[src].as_mut() {
                p.attach_output(def.from.1, out);
            }
            if let Some(p) = ports[dst].as_mut() {
                p.attach_input(def.to.1, inp);
            }
            out_stats[src].push(Arc::clone(&st));
            stats.push(st);
        }

        let phases: BTreeSet<u32> = self.nodes.iter().map(|n| n.phase).collect();
        let mut statuses: Vec<Option<ComponentStatus>> = self.nodes.iter().map(|_| None).collect();
        tracing::info!(
            run_id = %self.context.run_id(),
            components = self.nodes.len(),
            edges = self.edges.len(),
            phases = phases.len(),
            "graph starting"
        );

        for phase in phases {
            let finished = self.run_phase(phase, &mut ports, &out_stats, close_on_fatal);
            let phase_ok = finished.iter().all(|(_, s)| s.code.is_ok());
            for (i, status) in finished {
                statuses[i] = Some(status);
            }
            if !phase_ok {
                tracing::warn!(phase, "phase failed, later phases are not run");
                break;
            }
        }

        let components: Vec<ComponentStatus> = self
            .nodes
            .iter()
            .zip(statuses)
            .map(|(node, status)| {
                status.unwrap_or_else(|| {
                    ComponentStatus::not_run(&node.id, node.component.type_tag(), node.phase)
                })
            })
            .collect();
        let edges = self
            .edges
            .iter()
            .zip(&stats)
            .map(|(def, st)| EdgeReport {
                id: def.id.get(),
                from: format!("{}:{}", self.nodes[def.from.0].id, def.from.1),
                to: format!("{}:{}", self.nodes[def.to.0].id, def.to.1),
                counts: st.snapshot(),
            })
            .collect();

        let code = GraphResult::aggregate(&components);
        let result = GraphResult {
            run_id: self.context.run_id().to_string(),
            code,
            components,
            edges,
            memory: self.context.mem_stats(),
            elapsed_ms: elapsed_ms(started),
        };
        match code {
            ResultCode::Ok => tracing::info!(elapsed_ms = result.elapsed_ms, "graph finished"),
            other => tracing::warn!(code = %other, elapsed_ms = result.elapsed_ms, "graph finished"),
        }
        Ok(result)
    }

    /// Initialise every component against its wired ports without running
    /// anything. `run` does this itself.
    pub fn init(&mut self) -> Result<()> {
        let Self {
            context,
            nodes,
            edges,
            ..
        } = self;
        let metas = |slots: &[Option<usize>]| -> Vec<Option<Arc<RecordMetadata>>> {
            slots
                .iter()
                .map(|slot| slot.map(|e| Arc::clone(&edges[e].metadata)))
                .collect()
        };
        for node in nodes.iter_mut() {
            let inputs = metas(&node.inputs);
            let outputs = metas(&node.outputs);
            let kind = node.component.type_tag();
            let ctx = InitContext {
                id: &node.id,
                graph: context.as_ref(),
                inputs: &inputs,
                outputs: &outputs,
            };
            node.component
                .init(&ctx)
                .map_err(|source| GraphError::Component {
                    id: node.id.clone(),
                    kind: kind.to_string(),
                    source,
                })?;
            tracing::debug!(id = %node.id, kind, "component initialised");
        }
        Ok(())
    }

    /// Run every component of `phase` on its own thread and wait for all of
    /// them.
    fn run_phase(
        &mut self,
        phase: u32,
        ports: &mut [Option<Ports>],
        out_stats: &[Vec<Arc<EdgeStats>>],
        close_on_fatal: bool,
    ) -> Vec<(usize, ComponentStatus)> {
        let context = &self.context;
        let cancel = &self.cancel;
        tracing::debug!(phase, "phase starting");

        thread::scope(|s| {
            let mut handles = Vec::new();
            for (i, node) in self.nodes.iter_mut().enumerate() {
                if node.phase != phase {
                    continue;
                }
                let node_ports = ports[i].take().unwrap_or_default();
                let ctx = RunContext {
                    id: node.id.clone(),
                    graph: Arc::clone(context),
                    cancel: cancel.clone(),
                };
                let id = node.id.clone();
                let kind = node.component.type_tag();
                let written = &out_stats[i];
                let spawned = thread::Builder::new()
                    .name(id.clone())
                    .spawn_scoped(s, move || run_node(node, node_ports, ctx, written, close_on_fatal));
                match spawned {
                    Ok(handle) => handles.push((i, id, kind, Some(handle))),
                    Err(e) => {
                        tracing::error!(id = %id, error = %e, "failed to spawn component thread");
                        cancel.cancel();
                        handles.push((i, id, kind, None));
                    }
                }
            }

            handles
                .into_iter()
                .map(|(i, id, kind, handle)| {
                    let status = match handle.map(|h| h.join()) {
                        Some(Ok(status)) => status,
                        Some(Err(_)) | None => {
                            cancel.cancel();
                            ComponentStatus {
                                code: ResultCode::FatalError,
                                message: Some("component thread did not complete".into()),
                                ..ComponentStatus::not_run(&id, kind, phase)
                            }
                        }
                    };
                    (i, status)
                })
                .collect()
        })
    }
}

fn set_slot(slots: &mut Vec<Option<usize>>, index: usize, edge: usize) {
    if slots.len() <= index {
        slots.resize(index + 1, None);
    }
    slots[index] = Some(edge);
}

/// Body of a component thread: run, apply the EOF policy, log the outcome.
fn run_node(
    node: &mut Node,
    mut ports: Ports,
    ctx: RunContext,
    written: &[Arc<EdgeStats>],
    close_on_fatal: bool,
) -> ComponentStatus {
    let kind = node.component.type_tag();
    let span = tracing::info_span!("component", id = %node.id, kind);
    let _enter = span.enter();
    let started = Instant::now();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| node.component.run(&mut ports, &ctx)));
    let (code, message) = match outcome {
        Ok(Ok(())) => (ResultCode::Ok, None),
        Ok(Err(e)) => (e.result_code(), Some(e.to_string())),
        Err(payload) => (
            ResultCode::FatalError,
            Some(format!("panicked: {}", panic_message(payload.as_ref()))),
        ),
    };

    // Every termination path but FATAL ends its outputs; EOF sends ignore the
    // cancelled token, so a stopped graph still drains end to end.
    let send_eof = match code {
        ResultCode::Ok | ResultCode::Error | ResultCode::Stopped => true,
        ResultCode::FatalError => close_on_fatal,
        ResultCode::NotRun => false,
    };
    if send_eof {
        if let Err(e) = ports.broadcast_eof() {
            tracing::debug!(error = %e, "EOF not delivered");
        }
    }
    if code == ResultCode::FatalError {
        // Downstream waits on ports that never see EOF; cancelling wakes them.
        ctx.cancel.cancel();
    }
    drop(ports);

    let elapsed_ms = elapsed_ms(started);
    let records: Vec<u64> = written.iter().map(|s| s.snapshot().records).collect();
    let msg = message.as_deref().unwrap_or("");
    match code {
        ResultCode::Ok => tracing::info!(%code, elapsed_ms, ?records, "component finished"),
        ResultCode::Error | ResultCode::Stopped | ResultCode::NotRun => {
            tracing::warn!(%code, message = msg, elapsed_ms, ?records, "component finished")
        }
        ResultCode::FatalError => {
            tracing::error!(%code, message = msg, elapsed_ms, ?records, "component failed")
        }
    }

    ComponentStatus {
        id: node.id.clone(),
        kind: kind.to_string(),
        phase: node.phase,
        code,
        message,
        elapsed_ms,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_components::{Collect, CollectHandle, Trash};
    use rivulet_core::schema::{DataType, FieldMetadata};

    fn meta() -> Arc<RecordMetadata> {
        Arc::new(RecordMetadata::new(
            "m",
            vec![FieldMetadata::new("id", DataType::Long)],
        ))
    }

    fn graph() -> Graph {
        let storage = Arc::new(rivulet_io::MemoryStorage::new());
        Graph::new(GraphContext::new(EngineConfig::default(), storage).expect("context"))
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut g = graph();
        g.add("t", Trash).expect("add");
        assert!(matches!(g.add("t", Trash), Err(GraphError::DuplicateId(_))));
    }

    #[test]
    fn edges_cannot_go_back_a_phase() {
        let mut g = graph();
        g.add_in_phase("late", 1, Collect::new(CollectHandle::new())).expect("add");
        g.add("early", Trash).expect("add");
        let err = g.connect(("late", 0), ("early", 0), meta()).expect_err("backwards edge");
        assert!(matches!(err, GraphError::Edge { .. }));
    }

    #[test]
    fn a_port_takes_one_edge() {
        let mut g = graph();
        g.add("a", Collect::new(CollectHandle::new())).expect("add");
        g.add("b", Trash).expect("add");
        g.add("c", Trash).expect("add");
        assert!(g.connect(("a", 0), ("b", 0), meta()).is_ok());
        assert!(g.connect(("a", 0), ("c", 0), meta()).is_err());
        assert!(matches!(
            g.connect(("nope", 0), ("c", 0), meta()),
            Err(GraphError::UnknownComponent(_))
        ));
    }

    #[test]
    fn init_failure_names_the_component() {
        let mut g = graph();
        g.add("sink", Trash).expect("add");
        match g.run() {
            Err(GraphError::Component { id, kind, .. }) => {
                assert_eq!(id, "sink");
                assert_eq!(kind, "TRASH");
            }
            other => panic!("expected init failure, got {other:?}"),
        }
    }
}
