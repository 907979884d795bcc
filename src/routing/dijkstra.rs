use std::cmp::{Ordering, Reverse};

use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use priority_queue::PriorityQueue;

use super::graph::RouteEdge;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Cost(f64);

impl Eq for Cost {}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cost {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShortestPath {
    pub cost: f64,
    pub nodes: Vec<NodeIndex>,
    /// `edges[i]` joins `nodes[i]` and `nodes[i + 1]`.
    pub edges: Vec<EdgeIndex>,
}

/// Dijkstra from `start` to `goal`, stopping as soon as `goal` is settled.
///
/// Equal-cost frontier entries pop in the order they were last improved, and a
/// node's predecessor only changes on a strictly cheaper path, so ties resolve
/// the same way on every run.
pub fn shortest_path<N>(graph: &UnGraph<N, RouteEdge>, start: NodeIndex, goal: NodeIndex) -> Option<ShortestPath> {
    let bound = graph.node_count();
    if start.index() >= bound || goal.index() >= bound {
        return None;
    }

    let mut distance = vec![f64::INFINITY; bound];
    let mut came_from: Vec<Option<(NodeIndex, EdgeIndex)>> = vec![None; bound];
    let mut settled = vec![false; bound];
    let mut frontier: PriorityQueue<NodeIndex, (Reverse<Cost>, Reverse<u64>)> = PriorityQueue::new();
    let mut insert_counter: u64 = 0;

    distance[start.index()] = 0.0;
    frontier.push(start, (Reverse(Cost(0.0)), Reverse(insert_counter)));

    while let Some((current, (Reverse(Cost(current_cost)), _))) = frontier.pop() {
        if current == goal {
            break;
        }
        settled[current.index()] = true;

        for edge in graph.edges(current) {
            let neighbor = if edge.source() == current {
                edge.target()
            } else {
                edge.source()
            };
            if settled[neighbor.index()] {
                continue;
            }

            let weight = edge.weight().weight;
            debug_assert!(weight >= 0.0, "negative edge weight {}", weight);
            let tentative = current_cost + weight;
            if tentative < distance[neighbor.index()] {
                distance[neighbor.index()] = tentative;
                came_from[neighbor.index()] = Some((current, edge.id()));
                insert_counter += 1;
                frontier.push(neighbor, (Reverse(Cost(tentative)), Reverse(insert_counter)));
            }
        }
    }

    if !distance[goal.index()].is_finite() {
        return None;
    }

    let mut nodes = vec![goal];
    let mut edges = Vec::new();
    let mut cursor = goal;
    while let Some((previous, edge)) = came_from[cursor.index()] {
        nodes.push(previous);
        edges.push(edge);
        cursor = previous;
    }
    nodes.reverse();
    edges.reverse();

    Some(ShortestPath {
        cost: distance[goal.index()],
        nodes,
        edges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::graph::EdgeKind;

    fn edge(weight: f64) -> RouteEdge {
        RouteEdge {
            kind: EdgeKind::Field,
            weight,
            raceway: None,
        }
    }

    #[test]
    fn finds_the_cheapest_path() {
        let mut graph: UnGraph<&str, RouteEdge> = UnGraph::default();
        let a = graph.add_node("a");
        let b = graph.add_node("b");
        let c = graph.add_node("c");
        let d = graph.add_node("d");
        graph.add_edge(a, b, edge(1.0));
        graph.add_edge(b, d, edge(5.0));
        graph.add_edge(a, c, edge(2.0));
        graph.add_edge(c, d, edge(2.0));
        graph.add_edge(a, d, edge(10.0));

        let path = shortest_path(&graph, a, d).unwrap();
        assert_eq!(path.cost, 4.0);
        assert_eq!(path.nodes, vec![a, c, d]);
        assert_eq!(path.edges.len(), 2);
    }

    #[test]
    fn travels_undirected_edges_backwards() {
        let mut graph: UnGraph<&str, RouteEdge> = UnGraph::default();
        let a = graph.add_node("a");
        let b = graph.add_node("b");
        graph.add_edge(b, a, edge(3.0));

        let path = shortest_path(&graph, a, b).unwrap();
        assert_eq!(path.nodes, vec![a, b]);
        assert_eq!(path.cost, 3.0);
    }

    #[test]
    fn unreachable_goal_yields_none() {
        let mut graph: UnGraph<&str, RouteEdge> = UnGraph::default();
        let a = graph.add_node("a");
        let b = graph.add_node("b");
        let c = graph.add_node("c");
        graph.add_edge(a, b, edge(1.0));

        assert!(shortest_path(&graph, a, c).is_none());
    }

    #[test]
    fn start_equal_to_goal_is_a_zero_cost_path() {
        let mut graph: UnGraph<&str, RouteEdge> = UnGraph::default();
        let a = graph.add_node("a");
        let path = shortest_path(&graph, a, a).unwrap();
        assert_eq!(path.cost, 0.0);
        assert_eq!(path.nodes, vec![a]);
        assert!(path.edges.is_empty());
    }

    #[test]
    fn ties_resolve_identically_across_runs() {
        let mut graph: UnGraph<&str, RouteEdge> = UnGraph::default();
        let a = graph.add_node("a");
        let b = graph.add_node("b");
        let c = graph.add_node("c");
        let d = graph.add_node("d");
        graph.add_edge(a, b, edge(1.0));
        graph.add_edge(a, c, edge(1.0));
        graph.add_edge(b, d, edge(1.0));
        graph.add_edge(c, d, edge(1.0));

        let first = shortest_path(&graph, a, d).unwrap();
        for _ in 0..10 {
            assert_eq!(shortest_path(&graph, a, d).unwrap(), first);
        }
    }
}
