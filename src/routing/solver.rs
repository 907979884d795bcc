use tracing::{debug, instrument};

use super::dijkstra::shortest_path;
use super::graph::BaseGraph;
use super::registry::RacewayRegistry;
use super::segments::{consolidate_segments, materialize_path};
use super::types::{CableRecord, RouteResult, RoutingConfig};

/// A solved cable together with the size of the graph it was solved on.
pub(crate) struct Solved {
    pub result: RouteResult,
    pub graph_nodes: usize,
    pub graph_edges: usize,
}

pub(crate) fn solve(
    base: &BaseGraph,
    registry: &RacewayRegistry,
    cable: &CableRecord,
    config: &RoutingConfig,
) -> Solved {
    let cable_graph = base.cable_graph(registry, cable, config);
    let graph_nodes = cable_graph.graph.node_count();
    let graph_edges = cable_graph.graph.edge_count();

    let result = match shortest_path(&cable_graph.graph, cable_graph.start, cable_graph.end) {
        Some(path) => {
            let segments = materialize_path(&cable_graph, &path.nodes, &path.edges, registry);
            let segments = consolidate_segments(segments);
            debug!(cost = path.cost, hops = path.edges.len(), "path found");
            RouteResult::from_segments(cable.id.clone(), segments, path.cost, cable_graph.exclusions)
        }
        None => {
            debug!(excluded = cable_graph.exclusions.len(), "no path found");
            RouteResult::failure(cable.id.clone(), cable_graph.exclusions)
        }
    };

    Solved {
        result,
        graph_nodes,
        graph_edges,
    }
}

/// Routes one cable on a base graph shared across a batch.
#[instrument(level = "debug", skip_all, fields(cable = %cable.id))]
pub fn route_with_base(
    base: &BaseGraph,
    registry: &RacewayRegistry,
    cable: &CableRecord,
    config: &RoutingConfig,
) -> RouteResult {
    solve(base, registry, cable, config).result
}

/// Routes one cable against the registry as it stands. Nothing is mutated.
pub fn route_cable(registry: &RacewayRegistry, cable: &CableRecord, config: &RoutingConfig) -> RouteResult {
    let base = BaseGraph::build(registry, config);
    route_with_base(&base, registry, cable, config)
}
