mod batch;
mod dijkstra;
mod graph;
mod registry;
mod segments;
mod solver;
mod trace;
mod types;
mod worker;

pub use batch::{BatchReport, BatchRouter, BatchState, CancellationToken, PlottedRoute, ProgressMessage};
pub use dijkstra::{shortest_path, ShortestPath};
pub use graph::{BaseGraph, CableGraph, EdgeKind, NodeKind, RouteEdge, RouteNode};
pub use registry::{
    DuctbankUtilization, RacewayKind, RacewayRecord, RacewayRegistry, RacewaySegment, Utilization,
};
pub use segments::{consolidate_segments, materialize_path};
pub use solver::{route_cable, route_with_base};
pub use types::{
    CableRecord, Exclusion, ExclusionReason, RouteResult, RouteSegment, RoutingConfig, SegmentKind, NO_PATH_ERROR,
    TRACE_ENV,
};
pub use worker::BatchWorker;
