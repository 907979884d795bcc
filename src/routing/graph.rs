use std::collections::HashSet;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;
use tracing::debug;

use crate::geometry::{project_onto_segment, Point3, COINCIDENT_TOLERANCE};

use super::registry::RacewayRegistry;
use super::segments::axis_aligned_moves;
use super::types::{CableRecord, Exclusion, ExclusionReason, RoutingConfig};

/// Weight of the edge stitching two coincident points together.
pub const COINCIDENT_WEIGHT: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    End,
    RacewayEndpoint,
    Projection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Raceway,
    RacewayConnector,
    Field,
    /// Field edge from a cable endpoint onto a nearby raceway.
    Proximity,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteNode {
    pub id: String,
    pub kind: NodeKind,
    pub point: Point3,
    /// Raceway (registry index) the node lies on.
    pub raceway: Option<usize>,
    /// For intersection projections, the raceway whose endpoint was projected.
    pub anchor: Option<usize>,
    /// Position along `raceway`, 0.0 at its start.
    pub t: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RouteEdge {
    pub kind: EdgeKind,
    pub weight: f64,
    /// Raceway (registry index) the edge belongs to.
    pub raceway: Option<usize>,
}

impl RouteEdge {
    fn raceway(weight: f64, raceway: usize) -> Self {
        RouteEdge {
            kind: EdgeKind::Raceway,
            weight,
            raceway: Some(raceway),
        }
    }

    /// Field edge between two free points, collapsing to a connector when they coincide.
    fn between(from: &Point3, to: &Point3, field_penalty: f64) -> Self {
        if from.is_coincident(to) {
            RouteEdge {
                kind: EdgeKind::RacewayConnector,
                weight: COINCIDENT_WEIGHT,
                raceway: None,
            }
        } else {
            RouteEdge {
                kind: EdgeKind::Field,
                weight: from.manhattan_distance(to) * field_penalty,
                raceway: None,
            }
        }
    }
}

struct RacewayEnvelope {
    index: usize,
    min: Point3,
    max: Point3,
}

impl RTreeObject for RacewayEnvelope {
    type Envelope = AABB<Point3>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

fn around(point: &Point3, radius: f64) -> AABB<Point3> {
    let offset = Point3::new(radius, radius, radius);
    AABB::from_corners(*point - offset, *point + offset)
}

/// Graph over all raceways of a batch, independent of any cable.
///
/// Built once per batch; cable graphs are derived from it without mutating it.
pub struct BaseGraph {
    nodes: Vec<RouteNode>,
    edges: Vec<(usize, usize, RouteEdge)>,
    field_edges: Vec<(usize, usize, RouteEdge)>,
    /// Base projection nodes per raceway.
    projections: Vec<Vec<usize>>,
    endpoints: Vec<[usize; 2]>,
    tree: RTree<RacewayEnvelope>,
    field_penalty: f64,
}

impl BaseGraph {
    pub fn build(registry: &RacewayRegistry, config: &RoutingConfig) -> Self {
        let mut nodes = Vec::with_capacity(registry.len() * 2);
        let mut edges = Vec::new();
        let mut endpoints = Vec::with_capacity(registry.len());
        let mut envelopes = Vec::with_capacity(registry.len());

        for (index, segment) in registry.segments().enumerate() {
            let start = nodes.len();
            for (suffix, point, t) in [("start", segment.start, 0.0), ("end", segment.end, 1.0)] {
                nodes.push(RouteNode {
                    id: format!("{}:{}", segment.id, suffix),
                    kind: NodeKind::RacewayEndpoint,
                    point,
                    raceway: Some(index),
                    anchor: None,
                    t,
                });
            }
            endpoints.push([start, start + 1]);
            edges.push((start, start + 1, RouteEdge::raceway(segment.length(), index)));

            let lower = Point3::new(
                segment.start.x.min(segment.end.x),
                segment.start.y.min(segment.end.y),
                segment.start.z.min(segment.end.z),
            );
            let upper = Point3::new(
                segment.start.x.max(segment.end.x),
                segment.start.y.max(segment.end.y),
                segment.start.z.max(segment.end.z),
            );
            envelopes.push(RacewayEnvelope {
                index,
                min: lower,
                max: upper,
            });
        }

        let tree = RTree::bulk_load(envelopes);
        let mut projections: Vec<Vec<usize>> = vec![Vec::new(); registry.len()];

        // Transfers between raceways whose endpoints touch another raceway.
        for a in 0..endpoints.len() {
            for endpoint in endpoints[a] {
                let endpoint_point = nodes[endpoint].point;
                for b in candidates(&tree, &endpoint_point, COINCIDENT_TOLERANCE) {
                    if b == a {
                        continue;
                    }
                    let Some(segment_b) = registry.get_index(b) else {
                        continue;
                    };
                    let projection = project_onto_segment(&endpoint_point, &segment_b.start, &segment_b.end);
                    if projection.distance > COINCIDENT_TOLERANCE {
                        continue;
                    }

                    let node = nodes.len();
                    let id = format!("{}@{}", nodes[endpoint].id, segment_b.id);
                    nodes.push(RouteNode {
                        id,
                        kind: NodeKind::Projection,
                        point: projection.point,
                        raceway: Some(b),
                        anchor: Some(a),
                        t: projection.t,
                    });
                    edges.push((
                        endpoint,
                        node,
                        RouteEdge {
                            kind: EdgeKind::RacewayConnector,
                            weight: projection.distance,
                            raceway: Some(b),
                        },
                    ));
                    push_along_raceway(&mut edges, &nodes, segment_b.length(), node, endpoints[b]);
                    projections[b].push(node);
                }
            }
        }

        // Projections sharing a raceway reach each other directly along it.
        for (b, on_raceway) in projections.iter().enumerate() {
            let Some(segment_b) = registry.get_index(b) else {
                continue;
            };
            for (i, &first) in on_raceway.iter().enumerate() {
                push_along_raceway(&mut edges, &nodes, segment_b.length(), first, on_raceway[i + 1..].iter().copied());
            }
        }

        let connected: HashSet<(usize, usize)> = edges
            .iter()
            .map(|&(from, to, _)| (from.min(to), from.max(to)))
            .collect();

        let mut field_edges = Vec::new();
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                if connected.contains(&(i, j)) {
                    continue;
                }
                if nodes[i].raceway.is_some() && nodes[i].raceway == nodes[j].raceway {
                    continue;
                }
                field_edges.push((i, j, RouteEdge::between(&nodes[i].point, &nodes[j].point, config.field_penalty)));
            }
        }

        debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            field_edges = field_edges.len(),
            "built base routing graph"
        );

        BaseGraph {
            nodes,
            edges,
            field_edges,
            projections,
            endpoints,
            tree,
            field_penalty: config.field_penalty,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len() + self.field_edges.len()
    }

    /// Decides which raceways this cable may traverse.
    fn usable_raceways(&self, registry: &RacewayRegistry, cable: &CableRecord) -> (Vec<bool>, Vec<Exclusion>) {
        let cable_area = cable.area();
        let pinned = cable.pinned_raceways();
        let mut usable = Vec::with_capacity(registry.len());
        let mut exclusions = Vec::new();

        for segment in registry.segments() {
            let reason = if pinned.is_some_and(|ids| !ids.iter().any(|id| *id == segment.id)) {
                Some(ExclusionReason::NotPinned)
            } else if !segment.accepts_group(cable.allowed_cable_group.as_deref()) {
                Some(ExclusionReason::CableGroup)
            } else if !segment.has_capacity_for(cable_area) {
                Some(ExclusionReason::Capacity)
            } else {
                None
            };

            usable.push(reason.is_none());
            if let Some(reason) = reason {
                exclusions.push(Exclusion {
                    raceway_id: segment.id.clone(),
                    reason,
                });
            }
        }
        (usable, exclusions)
    }

    /// Derives the graph for one cable: usable raceways only, plus the cable's
    /// own endpoints and their snap projections.
    pub fn cable_graph(&self, registry: &RacewayRegistry, cable: &CableRecord, config: &RoutingConfig) -> CableGraph {
        let (usable, exclusions) = self.usable_raceways(registry, cable);
        let is_usable = |raceway: Option<usize>| raceway.map_or(true, |r| usable.get(r).copied().unwrap_or(false));

        let mut graph: UnGraph<RouteNode, RouteEdge> = UnGraph::default();
        let start = graph.add_node(RouteNode {
            id: "start".to_string(),
            kind: NodeKind::Start,
            point: cable.start,
            raceway: None,
            anchor: None,
            t: 0.0,
        });
        let end = graph.add_node(RouteNode {
            id: "end".to_string(),
            kind: NodeKind::End,
            point: cable.end,
            raceway: None,
            anchor: None,
            t: 0.0,
        });

        let mut present: Vec<Option<NodeIndex>> = vec![None; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            if is_usable(node.raceway) && is_usable(node.anchor) {
                present[index] = Some(graph.add_node(node.clone()));
            }
        }

        for &(from, to, edge) in &self.edges {
            if let (Some(a), Some(b)) = (present[from], present[to]) {
                if is_usable(edge.raceway) {
                    graph.add_edge(a, b, edge);
                }
            }
        }

        for &(from, to, edge) in &self.field_edges {
            if let (Some(a), Some(b)) = (present[from], present[to]) {
                let edge = self.reweight_shared(registry, config, &self.nodes[from].point, &self.nodes[to].point, edge);
                graph.add_edge(a, b, edge);
            }
        }

        for cable_node in [start, end] {
            let point = graph[cable_node].point;
            for (index, node) in self.nodes.iter().enumerate() {
                if let Some(other) = present[index] {
                    let edge = RouteEdge::between(&point, &node.point, self.field_penalty);
                    let edge = self.reweight_shared(registry, config, &point, &node.point, edge);
                    graph.add_edge(cable_node, other, edge);
                }
            }
        }
        let direct = RouteEdge::between(&cable.start, &cable.end, self.field_penalty);
        let direct = self.reweight_shared(registry, config, &cable.start, &cable.end, direct);
        graph.add_edge(start, end, direct);

        // Snap the cable endpoints onto nearby raceways.
        let mut snapped: Vec<Vec<NodeIndex>> = vec![Vec::new(); registry.len()];
        for (cable_node, label) in [(start, "start"), (end, "end")] {
            let point = graph[cable_node].point;
            for r in candidates(&self.tree, &point, config.proximity_threshold) {
                if !is_usable(Some(r)) {
                    continue;
                }
                let Some(segment) = registry.get_index(r) else {
                    continue;
                };
                let projection = project_onto_segment(&point, &segment.start, &segment.end);
                if projection.distance > config.proximity_threshold {
                    continue;
                }

                let snap = graph.add_node(RouteNode {
                    id: format!("{}@{}", label, segment.id),
                    kind: NodeKind::Projection,
                    point: projection.point,
                    raceway: Some(r),
                    anchor: None,
                    t: projection.t,
                });
                graph.add_edge(
                    cable_node,
                    snap,
                    RouteEdge {
                        kind: EdgeKind::Proximity,
                        weight: point.manhattan_distance(&projection.point) * self.field_penalty,
                        raceway: None,
                    },
                );

                let length = segment.length();
                let along = self.endpoints[r]
                    .iter()
                    .chain(self.projections[r].iter())
                    .filter_map(|&index| present[index])
                    .chain(snapped[r].iter().copied())
                    .collect::<Vec<_>>();
                for other in along {
                    let weight = (graph[other].t - projection.t).abs() * length;
                    graph.add_edge(snap, other, RouteEdge::raceway(weight, r));
                }
                snapped[r].push(snap);
            }
        }

        debug!(
            cable = %cable.id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            excluded = exclusions.len(),
            "built cable routing graph"
        );

        CableGraph {
            graph,
            start,
            end,
            exclusions,
        }
    }

    fn reweight_shared(
        &self,
        registry: &RacewayRegistry,
        config: &RoutingConfig,
        from: &Point3,
        to: &Point3,
        mut edge: RouteEdge,
    ) -> RouteEdge {
        if edge.kind != EdgeKind::Field || config.shared_field_factor == 1.0 || registry.shared_field_count() == 0 {
            return edge;
        }
        let moves = axis_aligned_moves(from, to);
        if !moves.is_empty() && moves.iter().all(|(a, b)| registry.is_shared_field(a, b)) {
            edge.weight *= config.shared_field_factor;
        }
        edge
    }
}

/// Raceway indices whose bounding box lies within `radius` of `point`, in index order.
fn candidates(tree: &RTree<RacewayEnvelope>, point: &Point3, radius: f64) -> Vec<usize> {
    let mut found: Vec<usize> = tree
        .locate_in_envelope_intersecting(&around(point, radius))
        .map(|envelope| envelope.index)
        .collect();
    found.sort_unstable();
    found
}

fn push_along_raceway(
    edges: &mut Vec<(usize, usize, RouteEdge)>,
    nodes: &[RouteNode],
    length: f64,
    node: usize,
    others: impl IntoIterator<Item = usize>,
) {
    let raceway = nodes[node].raceway;
    for other in others {
        let weight = (nodes[node].t - nodes[other].t).abs() * length;
        edges.push((
            node,
            other,
            RouteEdge {
                kind: EdgeKind::Raceway,
                weight,
                raceway,
            },
        ));
    }
}

/// Routing graph for a single cable. Dropped once the cable is solved.
pub struct CableGraph {
    pub graph: UnGraph<RouteNode, RouteEdge>,
    pub start: NodeIndex,
    pub end: NodeIndex,
    pub exclusions: Vec<Exclusion>,
}

impl CableGraph {
    /// Whether the raceway's own end-to-end edge is part of this graph.
    pub fn has_raceway_edge(&self, raceway: usize) -> bool {
        self.graph.edge_references().any(|edge| {
            let weight = edge.weight();
            let (a, b) = (&self.graph[edge.source()], &self.graph[edge.target()]);
            weight.kind == EdgeKind::Raceway
                && weight.raceway == Some(raceway)
                && a.kind == NodeKind::RacewayEndpoint
                && b.kind == NodeKind::RacewayEndpoint
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::registry::{RacewayKind, RacewaySegment};

    fn tray(id: &str, start: [f64; 3], end: [f64; 3]) -> RacewaySegment {
        RacewaySegment::new(id, RacewayKind::Tray, start.into(), end.into())
            .with_size(10.0, 1.0)
            .with_fill(0.5, 0.0)
    }

    fn cable(diameter: f64) -> CableRecord {
        CableRecord::new("C1", Point3::new(0.0, -5.0, 0.0), Point3::new(20.0, -5.0, 0.0), diameter)
    }

    #[test]
    fn raceway_edge_present_only_with_spare_capacity() {
        let mut registry = RacewayRegistry::new();
        registry.add_segment(tray("T1", [0.0, 0.0, 0.0], [20.0, 0.0, 0.0]));
        let config = RoutingConfig::default();
        let base = BaseGraph::build(&registry, &config);

        let small = cable(1.0);
        assert!(base.cable_graph(&registry, &small, &config).has_raceway_edge(0));

        registry.update_fill(&["T1"], 5.0 - small.area() / 2.0);
        let graph = base.cable_graph(&registry, &small, &config);
        assert!(!graph.has_raceway_edge(0));
        assert_eq!(graph.exclusions[0].reason, ExclusionReason::Capacity);
    }

    #[test]
    fn touching_raceways_get_projection_nodes() {
        let mut registry = RacewayRegistry::new();
        registry.add_segment(tray("T1", [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]));
        registry.add_segment(tray("T2", [5.0, 0.0, 0.0], [5.0, 10.0, 0.0]));
        let base = BaseGraph::build(&registry, &RoutingConfig::default());

        let projection = base
            .nodes
            .iter()
            .find(|node| node.kind == NodeKind::Projection)
            .expect("T2 starts on T1");
        assert_eq!(projection.point, Point3::new(5.0, 0.0, 0.0));
        assert_eq!(projection.raceway, Some(0));
        assert_eq!(projection.anchor, Some(1));
        assert_eq!(projection.t, 0.5);
    }

    #[test]
    fn coincident_points_are_stitched_with_connectors() {
        let mut registry = RacewayRegistry::new();
        registry.add_segment(tray("T1", [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]));
        registry.add_segment(tray("T2", [10.05, 0.0, 0.0], [10.05, 10.0, 0.0]));
        let base = BaseGraph::build(&registry, &RoutingConfig::default());

        let stitched = base.field_edges.iter().any(|&(a, b, edge)| {
            edge.kind == EdgeKind::RacewayConnector
                && edge.weight == COINCIDENT_WEIGHT
                && base.nodes[a].id == "T1:end"
                && base.nodes[b].id == "T2:start"
        });
        assert!(stitched);
    }

    #[test]
    fn field_edges_use_penalized_manhattan_distance() {
        let registry = RacewayRegistry::new();
        let config = RoutingConfig::default();
        let base = BaseGraph::build(&registry, &config);
        let graph = base.cable_graph(&registry, &cable(1.0), &config);

        assert_eq!(graph.graph.node_count(), 2);
        let edge = graph.graph.edge_weights().next().unwrap();
        assert_eq!(edge.kind, EdgeKind::Field);
        assert_eq!(edge.weight, 60.0);
    }

    #[test]
    fn endpoints_snap_onto_nearby_raceways() {
        let mut registry = RacewayRegistry::new();
        registry.add_segment(tray("T1", [0.0, 0.0, 0.0], [20.0, 0.0, 0.0]));
        let mut config = RoutingConfig::default();
        let base = BaseGraph::build(&registry, &config);

        let snaps = |graph: &CableGraph| {
            graph
                .graph
                .node_weights()
                .filter(|node| node.kind == NodeKind::Projection)
                .count()
        };
        assert_eq!(snaps(&base.cable_graph(&registry, &cable(1.0), &config)), 2);

        config.proximity_threshold = 4.0;
        assert_eq!(snaps(&base.cable_graph(&registry, &cable(1.0), &config)), 0);
    }

    #[test]
    fn pinned_cables_only_see_their_raceways() {
        let mut registry = RacewayRegistry::new();
        registry.add_segment(tray("T1", [0.0, 0.0, 0.0], [20.0, 0.0, 0.0]));
        registry.add_segment(tray("T2", [0.0, -10.0, 0.0], [20.0, -10.0, 0.0]));
        let config = RoutingConfig::default();
        let base = BaseGraph::build(&registry, &config);

        let mut pinned = cable(1.0);
        pinned.manual_path = true;
        pinned.raceway_ids = vec!["T2".to_string()];
        let graph = base.cable_graph(&registry, &pinned, &config);
        assert!(!graph.has_raceway_edge(0));
        assert!(graph.has_raceway_edge(1));
        assert_eq!(
            graph.exclusions,
            vec![Exclusion {
                raceway_id: "T1".to_string(),
                reason: ExclusionReason::NotPinned
            }]
        );
    }

    #[test]
    fn construction_is_deterministic() {
        let mut registry = RacewayRegistry::new();
        registry.add_segment(tray("T1", [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]));
        registry.add_segment(tray("T2", [10.0, 0.0, 0.0], [10.0, 10.0, 0.0]));
        registry.add_segment(tray("T3", [5.0, 0.0, 0.0], [5.0, 0.0, 10.0]));
        let config = RoutingConfig::default();

        let first = BaseGraph::build(&registry, &config).cable_graph(&registry, &cable(1.0), &config);
        let second = BaseGraph::build(&registry, &config).cable_graph(&registry, &cable(1.0), &config);
        let nodes = |graph: &CableGraph| graph.graph.node_weights().cloned().collect::<Vec<_>>();
        let edges = |graph: &CableGraph| graph.graph.edge_weights().copied().collect::<Vec<_>>();
        assert_eq!(nodes(&first), nodes(&second));
        assert_eq!(edges(&first), edges(&second));
    }
}
