use std::fs;
use std::path::PathBuf;

use serde_json::json;

use crate::error::Result;

use super::registry::RacewayRegistry;
use super::types::{CableRecord, RouteResult};

/// Collects one JSON entry per processed cable and dumps them when the batch ends.
#[derive(Debug)]
pub(crate) struct BatchTrace {
    path: PathBuf,
    cables: Vec<serde_json::Value>,
}

impl BatchTrace {
    pub(crate) fn new(path: PathBuf) -> Self {
        BatchTrace {
            path,
            cables: Vec::new(),
        }
    }

    pub(crate) fn record_cable(
        &mut self,
        index: usize,
        cable: &CableRecord,
        graph_size: Option<(usize, usize)>,
        result: &RouteResult,
    ) {
        let graph = graph_size.map(|(nodes, edges)| json!({ "nodes": nodes, "edges": edges }));
        let segments: Vec<serde_json::Value> = result
            .route_segments
            .iter()
            .map(|segment| {
                json!({
                    "type": segment.kind,
                    "start": segment.start.as_array(),
                    "end": segment.end.as_array(),
                    "length": segment.length,
                    "raceway_id": segment.raceway_id,
                })
            })
            .collect();

        self.cables.push(json!({
            "index": index,
            "cable_id": cable.id,
            "area": cable.area(),
            "locked": graph_size.is_none(),
            "graph": graph,
            "success": result.success,
            "cost": result.cost,
            "total_length": result.total_length,
            "field_routed_length": result.field_routed_length,
            "segments": segments,
            "exclusions": result.exclusions,
        }));
    }

    pub(crate) fn write(&self, registry: &RacewayRegistry, wall_time: f64) -> Result<()> {
        let trace_json = json!({
            "wall_time": wall_time,
            "cables": self.cables,
            "utilization": registry.utilization(),
            "ductbanks": registry.ductbank_utilization(),
            "shared_field_segments": registry.shared_field_count(),
        });
        let serialized = serde_json::to_string_pretty(&trace_json)?;
        fs::write(&self.path, serialized)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point3;
    use crate::routing::types::RouteSegment;

    #[test]
    fn writes_recorded_cables() {
        let path = std::env::temp_dir().join(format!("cableroute-trace-{}.json", std::process::id()));
        let cable = CableRecord::new("C1", Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0), 1.0);
        let result = RouteResult::from_segments(
            "C1",
            vec![RouteSegment::field(cable.start, cable.end)],
            3.0,
            Vec::new(),
        );

        let mut trace = BatchTrace::new(path.clone());
        trace.record_cable(0, &cable, Some((2, 1)), &result);
        trace.write(&RacewayRegistry::new(), 0.5).unwrap();

        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(written["cables"][0]["cable_id"], "C1");
        assert_eq!(written["cables"][0]["graph"]["nodes"], 2);
        assert_eq!(written["cables"][0]["segments"][0]["type"], "field");
        assert_eq!(written["wall_time"], 0.5);
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let trace = BatchTrace::new(PathBuf::from("/nonexistent-dir/for/trace.json"));
        assert!(trace.write(&RacewayRegistry::new(), 0.0).is_err());
    }
}
