use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::error::Result;

use super::graph::BaseGraph;
use super::registry::{RacewayRecord, RacewayRegistry, RacewaySegment, Utilization};
use super::solver::solve;
use super::trace::BatchTrace;
use super::types::{
    CableRecord, Exclusion, ExclusionReason, RouteResult, RouteSegment, RoutingConfig, SegmentKind,
};

/// Cooperative cancellation flag, polled between cables.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Idle,
    Running,
    Cancelled,
    Done,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlottedRoute {
    pub cable_id: String,
    pub route_segments: Vec<RouteSegment>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<RouteResult>,
    pub all_routes: Vec<PlottedRoute>,
    pub utilization: IndexMap<String, Utilization>,
    pub final_trays: Vec<RacewaySegment>,
    /// Seconds spent routing, excluding time spent cancelled.
    pub wall_time: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressMessage {
    Progress { completed: usize, total: usize },
    Cancelled { completed: usize, total: usize },
    Done(BatchReport),
    Error { message: String },
}

/// Routes an ordered list of cables against one shared, mutating registry.
///
/// Cables are served first come, first served: each accepted route consumes
/// raceway fill before the next cable's graph is built.
pub struct BatchRouter {
    config: RoutingConfig,
    registry: RacewayRegistry,
    base: BaseGraph,
    cables: Vec<CableRecord>,
    results: Vec<Option<RouteResult>>,
    all_routes: Vec<PlottedRoute>,
    cursor: usize,
    state: BatchState,
    token: CancellationToken,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    paused: Duration,
    trace: Option<BatchTrace>,
}

impl BatchRouter {
    pub fn new(config: RoutingConfig) -> Self {
        BatchRouter::with_token(config, CancellationToken::new())
    }

    pub fn with_token(config: RoutingConfig, token: CancellationToken) -> Self {
        let registry = RacewayRegistry::new();
        BatchRouter {
            base: BaseGraph::build(&registry, &config),
            config,
            registry,
            cables: Vec::new(),
            results: Vec::new(),
            all_routes: Vec::new(),
            cursor: 0,
            state: BatchState::Idle,
            token,
            started_at: None,
            paused_at: None,
            paused: Duration::ZERO,
            trace: None,
        }
    }

    /// Resets all state and prepares a new batch. Any previous batch is
    /// discarded, even when the new one is rejected.
    pub fn start(&mut self, registry: RacewayRegistry, cables: Vec<CableRecord>) -> Result<()> {
        self.discard();
        self.config.validate()?;
        for cable in &cables {
            cable.validate()?;
        }

        self.base = BaseGraph::build(&registry, &self.config);
        self.registry = registry;
        self.results = vec![None; cables.len()];
        self.cables = cables;
        self.token.reset();
        self.started_at = Some(Instant::now());
        self.trace = self.config.trace_path.clone().map(BatchTrace::new);
        self.state = BatchState::Running;

        info!(
            cables = self.cables.len(),
            raceways = self.registry.len(),
            "routing batch started"
        );
        Ok(())
    }

    /// Like [`BatchRouter::start`], normalizing raw schedule rows first.
    pub fn start_from_records(&mut self, raceways: Vec<RacewayRecord>, cables: Vec<CableRecord>) -> Result<()> {
        self.discard();
        let registry = RacewayRegistry::from_records(raceways, &self.config)?;
        self.start(registry, cables)
    }

    /// Routes cables until the batch is done or cancellation is observed.
    ///
    /// Cancellation is only checked between cables, never while one is solved.
    pub fn run<F: FnMut(ProgressMessage)>(&mut self, mut on_progress: F) -> BatchState {
        if self.state != BatchState::Running {
            warn!(state = ?self.state, "batch is not running");
            return self.state;
        }

        let total = self.cables.len();
        let span = info_span!("batch", total);
        let _enter = span.enter();

        while self.cursor < total {
            if self.token.is_cancelled() {
                self.paused_at = Some(Instant::now());
                self.state = BatchState::Cancelled;
                info!(completed = self.cursor, total, "routing batch cancelled");
                on_progress(ProgressMessage::Cancelled {
                    completed: self.cursor,
                    total,
                });
                return self.state;
            }

            self.process_cable(self.cursor);
            self.cursor += 1;
            on_progress(ProgressMessage::Progress {
                completed: self.cursor,
                total,
            });
        }

        self.state = BatchState::Done;
        let report = self.report();
        info!(
            routed = report.all_routes.len(),
            failed = total - report.all_routes.len(),
            wall_time = report.wall_time,
            "routing batch done"
        );
        if let Some(trace) = &self.trace {
            if let Err(error) = trace.write(&self.registry, report.wall_time) {
                warn!(%error, "failed to write routing trace");
            }
        }
        on_progress(ProgressMessage::Done(report));
        self.state
    }

    /// Continues a cancelled batch from the cable it stopped at.
    pub fn resume<F: FnMut(ProgressMessage)>(&mut self, on_progress: F) -> BatchState {
        if self.state != BatchState::Cancelled {
            warn!(state = ?self.state, "only a cancelled batch can be resumed");
            return self.state;
        }
        if let Some(paused_at) = self.paused_at.take() {
            self.paused += paused_at.elapsed();
        }
        self.token.reset();
        self.state = BatchState::Running;
        info!(cursor = self.cursor, "routing batch resumed");
        self.run(on_progress)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn registry(&self) -> &RacewayRegistry {
        &self.registry
    }

    /// Results so far, `None` for cables not processed yet.
    pub fn results(&self) -> &[Option<RouteResult>] {
        &self.results
    }

    pub fn wall_time(&self) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let mut paused = self.paused;
        if let Some(paused_at) = self.paused_at {
            paused += paused_at.elapsed();
        }
        started_at.elapsed().saturating_sub(paused)
    }

    pub fn report(&self) -> BatchReport {
        BatchReport {
            results: self.results.iter().flatten().cloned().collect(),
            all_routes: self.all_routes.clone(),
            utilization: self.registry.utilization(),
            final_trays: self.registry.segments().cloned().collect(),
            wall_time: self.wall_time().as_secs_f64(),
        }
    }

    /// Drops the current batch and returns to `Idle`.
    fn discard(&mut self) {
        self.registry = RacewayRegistry::new();
        self.base = BaseGraph::build(&self.registry, &self.config);
        self.cables = Vec::new();
        self.results = Vec::new();
        self.all_routes = Vec::new();
        self.cursor = 0;
        self.started_at = None;
        self.paused_at = None;
        self.paused = Duration::ZERO;
        self.trace = None;
        self.state = BatchState::Idle;
    }

    fn process_cable(&mut self, index: usize) {
        let cable = &self.cables[index];
        let area = cable.area();

        let (result, graph_size) = match cable.locked_route() {
            Some(stored) => (
                apply_locked_route(&mut self.registry, &self.config, cable, stored, area),
                None,
            ),
            None => {
                let solved = solve(&self.base, &self.registry, cable, &self.config);
                if solved.result.success {
                    self.registry.update_fill(&solved.result.tray_segments, area);
                    self.registry
                        .record_shared_field_segments(&solved.result.route_segments);
                }
                (solved.result, Some((solved.graph_nodes, solved.graph_edges)))
            }
        };

        debug!(
            cable = %cable.id,
            success = result.success,
            total_length = result.total_length,
            field_routed_length = result.field_routed_length,
            "cable processed"
        );

        if let Some(trace) = &mut self.trace {
            trace.record_cable(index, cable, graph_size, &result);
        }
        if result.success {
            self.all_routes.push(PlottedRoute {
                cable_id: cable.id.clone(),
                route_segments: result.route_segments.clone(),
            });
        }
        self.results[index] = Some(result);
    }
}

/// Accepts a locked cable's stored route as-is and books its fill.
fn apply_locked_route(
    registry: &mut RacewayRegistry,
    config: &RoutingConfig,
    cable: &CableRecord,
    stored: &[RouteSegment],
    area: f64,
) -> RouteResult {
    let cost = stored
        .iter()
        .map(|segment| match segment.kind {
            SegmentKind::Tray => segment.length,
            SegmentKind::Field => segment.length * config.field_penalty,
        })
        .sum();
    let mut result = RouteResult::from_segments(cable.id.clone(), stored.to_vec(), cost, Vec::new());

    registry.update_fill(&result.tray_segments, area);
    registry.record_shared_field_segments(stored);

    for raceway_id in &result.tray_segments {
        let Some(segment) = registry.get(raceway_id) else {
            continue;
        };
        if segment.current_fill > segment.max_fill {
            warn!(
                cable = %cable.id,
                raceway = %raceway_id,
                current_fill = segment.current_fill,
                max_fill = segment.max_fill,
                "locked route overfills raceway"
            );
            result.exclusions.push(Exclusion {
                raceway_id: raceway_id.clone(),
                reason: ExclusionReason::OverCapacity,
            });
        }
    }
    result
}
