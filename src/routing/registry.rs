use std::f64::consts::PI;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, RoutingError};
use crate::geometry::Point3;

use super::types::{RouteSegment, RoutingConfig, SegmentKind};

/// Slack allowed when comparing fill against capacity, relative to capacity.
const FILL_TOLERANCE: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RacewayKind {
    Tray,
    Conduit,
    Ductbank,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RacewaySegment {
    pub id: String,
    pub kind: RacewayKind,
    pub start: Point3,
    pub end: Point3,
    pub width: f64,
    pub height: f64,
    /// Explicit cross-section, overriding `width * height`.
    pub area: Option<f64>,
    pub fill_limit: f64,
    pub current_fill: f64,
    /// Set by the registry when the segment is added.
    pub max_fill: f64,
    pub allowed_cable_group: Option<String>,
    pub ductbank_tag: Option<String>,
}

impl RacewaySegment {
    pub fn new(id: impl Into<String>, kind: RacewayKind, start: Point3, end: Point3) -> Self {
        RacewaySegment {
            id: id.into(),
            kind,
            start,
            end,
            width: 0.0,
            height: 0.0,
            area: None,
            fill_limit: RoutingConfig::default().fill_limit,
            current_fill: 0.0,
            max_fill: 0.0,
            allowed_cable_group: None,
            ductbank_tag: None,
        }
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_fill(mut self, fill_limit: f64, current_fill: f64) -> Self {
        self.fill_limit = fill_limit;
        self.current_fill = current_fill;
        self
    }

    pub fn cross_section(&self) -> f64 {
        self.area.unwrap_or(self.width * self.height)
    }

    pub fn length(&self) -> f64 {
        self.start.distance(&self.end)
    }

    pub fn available_capacity(&self) -> f64 {
        self.max_fill - self.current_fill
    }

    /// Whether a cable of `cable_area` still fits. Zero-capacity raceways never fit.
    pub fn has_capacity_for(&self, cable_area: f64) -> bool {
        self.max_fill > 0.0
            && self.current_fill + cable_area <= self.max_fill + FILL_TOLERANCE * self.max_fill.max(1.0)
    }

    /// Raceways without a group accept every cable.
    pub fn accepts_group(&self, cable_group: Option<&str>) -> bool {
        match &self.allowed_cable_group {
            None => true,
            Some(group) => cable_group == Some(group.as_str()),
        }
    }
}

/// A raceway row as it comes out of the tray, conduit or ductbank schedules.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RacewayRecord {
    #[serde(alias = "tray_id", alias = "conduit_id", alias = "name")]
    pub id: String,
    #[serde(default, alias = "raceway_type", alias = "type")]
    pub kind: Option<RacewayKind>,
    pub start: Point3,
    pub end: Point3,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    /// Conduits are sized by their inner diameter.
    #[serde(default, alias = "inner_diameter")]
    pub diameter: Option<f64>,
    #[serde(default)]
    pub area: Option<f64>,
    #[serde(default, alias = "fillLimit")]
    pub fill_limit: Option<f64>,
    #[serde(default)]
    pub current_fill: f64,
    #[serde(default)]
    pub allowed_cable_group: Option<String>,
    #[serde(default, alias = "ductbankTag", alias = "ductbank")]
    pub ductbank_tag: Option<String>,
}

impl RacewayRecord {
    pub fn into_segment(self, default_fill_limit: f64) -> Result<RacewaySegment> {
        let invalid = |reason: String| RoutingError::InvalidRaceway {
            id: self.id.clone(),
            reason,
        };

        if self.id.is_empty() {
            return Err(invalid("missing id".to_string()));
        }
        let dimensions = [
            ("width", Some(self.width)),
            ("height", Some(self.height)),
            ("diameter", self.diameter),
            ("area", self.area),
            ("current_fill", Some(self.current_fill)),
        ];
        for (name, value) in dimensions {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(invalid(format!("{} {} is not a non-negative number", name, value)));
                }
            }
        }
        let fill_limit = self.fill_limit.unwrap_or(default_fill_limit);
        if !(0.0..=1.0).contains(&fill_limit) {
            return Err(invalid(format!("fill limit {} is outside 0..=1", fill_limit)));
        }

        let kind = self.kind.unwrap_or(if self.diameter.is_some() {
            RacewayKind::Conduit
        } else {
            RacewayKind::Tray
        });
        let area = self
            .area
            .or_else(|| self.diameter.map(|diameter| PI * (diameter / 2.0).powi(2)));

        Ok(RacewaySegment {
            id: self.id,
            kind,
            start: self.start,
            end: self.end,
            width: self.width,
            height: self.height,
            area,
            fill_limit,
            current_fill: self.current_fill,
            max_fill: 0.0,
            allowed_cable_group: self.allowed_cable_group,
            ductbank_tag: self.ductbank_tag,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Utilization {
    pub current_fill: f64,
    pub max_fill: f64,
    /// Zero-capacity raceways report as fully utilized.
    pub utilization_percentage: f64,
    pub available_capacity: f64,
}

impl Utilization {
    fn new(current_fill: f64, max_fill: f64) -> Self {
        let utilization_percentage = if max_fill > 0.0 {
            current_fill / max_fill * 100.0
        } else {
            100.0
        };
        Utilization {
            current_fill,
            max_fill,
            utilization_percentage,
            available_capacity: max_fill - current_fill,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DuctbankUtilization {
    pub conduits: Vec<String>,
    #[serde(flatten)]
    pub utilization: Utilization,
}

/// Endpoints rounded to micro-units so identical field moves compare equal.
type FieldKey = [i64; 6];

fn field_key(start: &Point3, end: &Point3) -> FieldKey {
    let quantize = |v: f64| (v * 1e6).round() as i64;
    let a = start.as_array().map(quantize);
    let b = end.as_array().map(quantize);
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    [first[0], first[1], first[2], second[0], second[1], second[2]]
}

/// Owns raceway capacity for one batch run.
///
/// Iteration order is insertion order, which keeps graph construction stable.
#[derive(Clone, Debug, Default)]
pub struct RacewayRegistry {
    segments: IndexMap<String, RacewaySegment>,
    shared_field: IndexMap<FieldKey, usize>,
}

impl RacewayRegistry {
    pub fn new() -> Self {
        RacewayRegistry::default()
    }

    /// Builds a registry from a schedule snapshot. The records are consumed, so
    /// the stored schedule is never touched while the batch mutates fill.
    pub fn from_records(records: Vec<RacewayRecord>, config: &RoutingConfig) -> Result<Self> {
        let mut registry = RacewayRegistry::new();
        for record in records {
            registry.add_segment(record.into_segment(config.fill_limit)?);
        }
        Ok(registry)
    }

    pub fn add_segment(&mut self, mut segment: RacewaySegment) {
        segment.max_fill = segment.cross_section() * segment.fill_limit;
        if segment.max_fill <= 0.0 {
            warn!(raceway = %segment.id, "raceway has no fill capacity and will never be used");
        }
        if let Some(previous) = self.segments.insert(segment.id.clone(), segment) {
            warn!(raceway = %previous.id, "duplicate raceway id, replacing earlier segment");
        }
    }

    pub fn update_fill<S: AsRef<str>>(&mut self, segment_ids: &[S], area: f64) {
        for id in segment_ids {
            match self.segments.get_mut(id.as_ref()) {
                Some(segment) => segment.current_fill += area,
                None => debug!(raceway = id.as_ref(), "ignoring fill update for unknown raceway"),
            }
        }
    }

    pub fn utilization(&self) -> IndexMap<String, Utilization> {
        self.segments
            .iter()
            .map(|(id, segment)| (id.clone(), Utilization::new(segment.current_fill, segment.max_fill)))
            .collect()
    }

    pub fn ductbank_utilization(&self) -> IndexMap<String, DuctbankUtilization> {
        let mut totals: IndexMap<String, (Vec<String>, f64, f64)> = IndexMap::new();
        for segment in self.segments.values() {
            if let Some(tag) = &segment.ductbank_tag {
                let entry = totals.entry(tag.clone()).or_default();
                entry.0.push(segment.id.clone());
                entry.1 += segment.current_fill;
                entry.2 += segment.max_fill;
            }
        }
        totals
            .into_iter()
            .map(|(tag, (conduits, current_fill, max_fill))| {
                (
                    tag,
                    DuctbankUtilization {
                        conduits,
                        utilization: Utilization::new(current_fill, max_fill),
                    },
                )
            })
            .collect()
    }

    /// Notes field moves consumed by earlier cables. Advisory only.
    pub fn record_shared_field_segments(&mut self, segments: &[RouteSegment]) {
        for segment in segments.iter().filter(|s| s.kind == SegmentKind::Field) {
            *self.shared_field.entry(field_key(&segment.start, &segment.end)).or_insert(0) += 1;
        }
    }

    pub fn is_shared_field(&self, start: &Point3, end: &Point3) -> bool {
        self.shared_field.contains_key(&field_key(start, end))
    }

    pub fn shared_field_count(&self) -> usize {
        self.shared_field.len()
    }

    pub fn get(&self, id: &str) -> Option<&RacewaySegment> {
        self.segments.get(id)
    }

    pub fn get_index(&self, index: usize) -> Option<&RacewaySegment> {
        self.segments.get_index(index).map(|(_, segment)| segment)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.segments.get_index_of(id)
    }

    pub fn segments(&self) -> impl Iterator<Item = &RacewaySegment> {
        self.segments.values()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tray(id: &str, width: f64, height: f64) -> RacewaySegment {
        RacewaySegment::new(id, RacewayKind::Tray, Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 0.0, 0.0))
            .with_size(width, height)
            .with_fill(0.5, 0.0)
    }

    #[test]
    fn add_segment_computes_max_fill() {
        let mut registry = RacewayRegistry::new();
        registry.add_segment(tray("T1", 4.0, 2.0));
        assert_eq!(registry.get("T1").unwrap().max_fill, 4.0);
    }

    #[test]
    fn duplicate_ids_keep_the_last_segment() {
        let mut registry = RacewayRegistry::new();
        registry.add_segment(tray("T1", 4.0, 2.0));
        registry.add_segment(tray("T2", 1.0, 1.0));
        registry.add_segment(tray("T1", 8.0, 2.0));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("T1").unwrap().max_fill, 8.0);
        assert_eq!(registry.index_of("T1"), Some(0));
    }

    #[test]
    fn update_fill_ignores_unknown_ids() {
        let mut registry = RacewayRegistry::new();
        registry.add_segment(tray("T1", 4.0, 2.0));
        registry.update_fill(&["T1", "missing", "T1"], 1.0);
        assert_eq!(registry.get("T1").unwrap().current_fill, 2.0);
    }

    #[test]
    fn utilization_reports_percentage_and_headroom() {
        let mut registry = RacewayRegistry::new();
        registry.add_segment(tray("T1", 4.0, 2.0));
        registry.add_segment(tray("EMPTY", 0.0, 0.0));
        registry.update_fill(&["T1"], 1.0);

        let utilization = registry.utilization();
        let t1 = utilization["T1"];
        assert_eq!(t1.utilization_percentage, 25.0);
        assert_eq!(t1.available_capacity, 3.0);

        let empty = utilization["EMPTY"];
        assert!(empty.utilization_percentage.is_finite());
        assert_eq!(empty.utilization_percentage, 100.0);
    }

    #[test]
    fn capacity_check_blocks_zero_capacity_raceways() {
        let mut registry = RacewayRegistry::new();
        registry.add_segment(tray("EMPTY", 0.0, 0.0));
        assert!(!registry.get("EMPTY").unwrap().has_capacity_for(0.0));
    }

    #[test]
    fn records_normalize_conduits_and_ductbanks() {
        let records: Vec<RacewayRecord> = serde_json::from_str(
            r#"[
                {"conduit_id": "C1", "start": [0, 0, 0], "end": [0, 10, 0], "diameter": 2, "ductbankTag": "DB1"},
                {"conduit_id": "C2", "start": [1, 0, 0], "end": [1, 10, 0], "diameter": 2, "ductbankTag": "DB1"},
                {"tray_id": "T1", "start": {"x": 0, "y": 0, "z": 5}, "end": {"x": 9, "y": 0, "z": 5}, "width": 6, "height": 4}
            ]"#,
        )
        .unwrap();
        let registry = RacewayRegistry::from_records(records, &RoutingConfig::default()).unwrap();

        let conduit = registry.get("C1").unwrap();
        assert_eq!(conduit.kind, RacewayKind::Conduit);
        assert!((conduit.max_fill - PI * 0.4).abs() < 1e-12);
        assert_eq!(registry.get("T1").unwrap().kind, RacewayKind::Tray);

        let ductbanks = registry.ductbank_utilization();
        assert_eq!(ductbanks["DB1"].conduits, vec!["C1".to_string(), "C2".to_string()]);
        assert!((ductbanks["DB1"].utilization.max_fill - 2.0 * PI * 0.4).abs() < 1e-12);
    }

    #[test]
    fn records_with_negative_dimensions_are_rejected() {
        let records: Vec<RacewayRecord> = serde_json::from_str(
            r#"[{"id": "T1", "start": [0, 0, 0], "end": [1, 0, 0], "width": -1, "height": 2}]"#,
        )
        .unwrap();
        assert!(RacewayRegistry::from_records(records, &RoutingConfig::default()).is_err());
    }

    #[test]
    fn shared_field_segments_are_direction_independent() {
        let mut registry = RacewayRegistry::new();
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(5.0, 0.0, 0.0);
        registry.record_shared_field_segments(&[
            RouteSegment::field(a, b),
            RouteSegment::tray(b, Point3::new(9.0, 0.0, 0.0), "T1"),
        ]);
        assert!(registry.is_shared_field(&b, &a));
        assert_eq!(registry.shared_field_count(), 1);
    }
}
