use petgraph::graph::{EdgeIndex, NodeIndex};

use crate::geometry::Point3;

use super::graph::{CableGraph, EdgeKind};
use super::registry::RacewayRegistry;
use super::types::{RouteSegment, SegmentKind};

/// Splits a straight move into axis-aligned moves: X first, then Y, then Z.
/// Axes without displacement are skipped.
pub(crate) fn axis_aligned_moves(from: &Point3, to: &Point3) -> Vec<(Point3, Point3)> {
    let mut moves = Vec::with_capacity(3);
    let mut cursor = *from;

    let steps = [
        Point3::new(to.x, cursor.y, cursor.z),
        Point3::new(to.x, to.y, cursor.z),
        Point3::new(to.x, to.y, to.z),
    ];
    for next in steps {
        if next != cursor {
            moves.push((cursor, next));
            cursor = next;
        }
    }
    moves
}

/// Turns a solved node/edge path into route segments, in travel order.
pub fn materialize_path(
    cable_graph: &CableGraph,
    nodes: &[NodeIndex],
    edges: &[EdgeIndex],
    registry: &RacewayRegistry,
) -> Vec<RouteSegment> {
    let graph = &cable_graph.graph;
    let mut segments = Vec::with_capacity(edges.len());

    for (window, &edge_index) in nodes.windows(2).zip(edges) {
        let from = &graph[window[0]];
        let to = &graph[window[1]];
        let edge = &graph[edge_index];

        let raceway_id = match edge.kind {
            EdgeKind::Field | EdgeKind::Proximity => None,
            EdgeKind::Raceway | EdgeKind::RacewayConnector => edge
                .raceway
                .or(from.raceway)
                .or(to.raceway)
                .and_then(|index| registry.get_index(index))
                .map(|segment| segment.id.clone()),
        };

        match raceway_id {
            Some(raceway_id) => segments.push(RouteSegment::tray(from.point, to.point, raceway_id)),
            None => segments.extend(
                axis_aligned_moves(&from.point, &to.point)
                    .into_iter()
                    .map(|(start, end)| RouteSegment::field(start, end)),
            ),
        }
    }

    segments
}

/// Merges directly adjacent tray segments that run in the same raceway.
pub fn consolidate_segments(segments: Vec<RouteSegment>) -> Vec<RouteSegment> {
    let mut consolidated: Vec<RouteSegment> = Vec::with_capacity(segments.len());

    for segment in segments {
        if let Some(last) = consolidated.last_mut() {
            if last.kind == SegmentKind::Tray
                && segment.kind == SegmentKind::Tray
                && last.raceway_id.is_some()
                && last.raceway_id == segment.raceway_id
            {
                last.end = segment.end;
                last.length += segment.length;
                continue;
            }
        }
        consolidated.push(segment);
    }

    consolidated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_moves_split_x_then_y_then_z() {
        let moves = axis_aligned_moves(&Point3::new(0.0, 0.0, 0.0), &Point3::new(3.0, -4.0, 2.0));
        assert_eq!(
            moves,
            vec![
                (Point3::new(0.0, 0.0, 0.0), Point3::new(3.0, 0.0, 0.0)),
                (Point3::new(3.0, 0.0, 0.0), Point3::new(3.0, -4.0, 0.0)),
                (Point3::new(3.0, -4.0, 0.0), Point3::new(3.0, -4.0, 2.0)),
            ]
        );
        let length: f64 = moves.iter().map(|(a, b)| a.distance(b)).sum();
        assert_eq!(length, 9.0);
    }

    #[test]
    fn aligned_moves_skip_unused_axes() {
        let moves = axis_aligned_moves(&Point3::new(1.0, 1.0, 1.0), &Point3::new(1.0, 1.0, 5.0));
        assert_eq!(moves.len(), 1);
        assert!(axis_aligned_moves(&Point3::new(1.0, 1.0, 1.0), &Point3::new(1.0, 1.0, 1.0)).is_empty());
    }

    fn sample() -> Vec<RouteSegment> {
        vec![
            RouteSegment::field(Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)),
            RouteSegment::tray(Point3::new(0.0, 1.0, 0.0), Point3::new(4.0, 1.0, 0.0), "T1"),
            RouteSegment::tray(Point3::new(4.0, 1.0, 0.0), Point3::new(4.0, 1.0, 0.0), "T1"),
            RouteSegment::tray(Point3::new(4.0, 1.0, 0.0), Point3::new(10.0, 1.0, 0.0), "T1"),
            RouteSegment::tray(Point3::new(10.0, 1.0, 0.0), Point3::new(10.0, 6.0, 0.0), "T2"),
            RouteSegment::field(Point3::new(10.0, 6.0, 0.0), Point3::new(10.0, 7.0, 0.0)),
            RouteSegment::field(Point3::new(10.0, 7.0, 0.0), Point3::new(10.0, 8.0, 0.0)),
        ]
    }

    #[test]
    fn consolidation_merges_same_raceway_runs() {
        let consolidated = consolidate_segments(sample());
        assert_eq!(consolidated.len(), 5);
        assert_eq!(consolidated[1].raceway_id.as_deref(), Some("T1"));
        assert_eq!(consolidated[1].start, Point3::new(0.0, 1.0, 0.0));
        assert_eq!(consolidated[1].end, Point3::new(10.0, 1.0, 0.0));
        assert_eq!(consolidated[1].length, 10.0);
        // Field moves are never merged.
        assert_eq!(consolidated[3].kind, SegmentKind::Field);
        assert_eq!(consolidated[4].kind, SegmentKind::Field);
    }

    #[test]
    fn consolidation_is_idempotent() {
        let once = consolidate_segments(sample());
        let twice = consolidate_segments(once.clone());
        assert_eq!(once, twice);
    }
}
