use std::f64::consts::PI;
use std::path::PathBuf;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RoutingError};
use crate::geometry::Point3;

/// Environment variable that points the batch trace at a file.
pub const TRACE_ENV: &str = "CABLEROUTE_TRACE_JSON";

pub const NO_PATH_ERROR: &str = "No valid path could be found.";

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Fill fraction for raceway records that do not carry their own.
    #[serde(alias = "fillLimit")]
    pub fill_limit: f64,
    /// Maximum snap distance from a cable endpoint onto a raceway.
    #[serde(alias = "proximityThreshold")]
    pub proximity_threshold: f64,
    /// Multiplier applied to the Manhattan length of field edges.
    #[serde(alias = "fieldPenalty")]
    pub field_penalty: f64,
    /// Multiplier for field edges retracing a field path used earlier in the batch.
    #[serde(alias = "sharedFieldFactor")]
    pub shared_field_factor: f64,
    #[serde(alias = "tracePath")]
    pub trace_path: Option<PathBuf>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            fill_limit: 0.4,
            proximity_threshold: 72.0,
            field_penalty: 3.0,
            shared_field_factor: 1.0,
            trace_path: None,
        }
    }
}

impl RoutingConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RoutingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var(TRACE_ENV) {
            if !path.is_empty() {
                self.trace_path = Some(PathBuf::from(path));
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fill_limit) {
            return Err(RoutingError::InvalidConfig(format!(
                "fill limit {} is outside 0..=1",
                self.fill_limit
            )));
        }
        let non_negative = [
            ("proximity threshold", self.proximity_threshold),
            ("field penalty", self.field_penalty),
            ("shared field factor", self.shared_field_factor),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(RoutingError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Tray,
    Field,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredSegment")]
pub struct RouteSegment {
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub start: Point3,
    pub end: Point3,
    pub length: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raceway_id: Option<String>,
}

/// Stored routes may omit `length`; it is then measured from the endpoints.
#[derive(Deserialize)]
struct StoredSegment {
    #[serde(rename = "type")]
    kind: SegmentKind,
    start: Point3,
    end: Point3,
    #[serde(default)]
    length: Option<f64>,
    #[serde(default)]
    raceway_id: Option<String>,
}

impl From<StoredSegment> for RouteSegment {
    fn from(stored: StoredSegment) -> Self {
        RouteSegment {
            kind: stored.kind,
            start: stored.start,
            end: stored.end,
            length: stored.length.unwrap_or_else(|| stored.start.distance(&stored.end)),
            raceway_id: stored.raceway_id,
        }
    }
}

impl RouteSegment {
    pub fn tray(start: Point3, end: Point3, raceway_id: impl Into<String>) -> Self {
        RouteSegment {
            kind: SegmentKind::Tray,
            start,
            end,
            length: start.distance(&end),
            raceway_id: Some(raceway_id.into()),
        }
    }

    pub fn field(start: Point3, end: Point3) -> Self {
        RouteSegment {
            kind: SegmentKind::Field,
            start,
            end,
            length: start.distance(&end),
            raceway_id: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CableRecord {
    #[serde(alias = "name")]
    pub id: String,
    pub start: Point3,
    pub end: Point3,
    pub diameter: f64,
    #[serde(default)]
    pub allowed_cable_group: Option<String>,
    #[serde(default)]
    pub manual_path: bool,
    #[serde(default)]
    pub raceway_ids: Vec<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub route_segments: Option<Vec<RouteSegment>>,
}

impl CableRecord {
    pub fn new(id: impl Into<String>, start: Point3, end: Point3, diameter: f64) -> Self {
        CableRecord {
            id: id.into(),
            start,
            end,
            diameter,
            allowed_cable_group: None,
            manual_path: false,
            raceway_ids: Vec::new(),
            locked: false,
            route_segments: None,
        }
    }

    pub fn area(&self) -> f64 {
        PI * (self.diameter / 2.0).powi(2)
    }

    /// Stored segments of a locked cable, which bypasses the solver.
    pub fn locked_route(&self) -> Option<&[RouteSegment]> {
        match (&self.route_segments, self.locked) {
            (Some(segments), true) => Some(segments),
            _ => None,
        }
    }

    /// Raceways a manually pinned cable is restricted to.
    pub fn pinned_raceways(&self) -> Option<&[String]> {
        if self.manual_path && !self.raceway_ids.is_empty() {
            Some(&self.raceway_ids)
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(RoutingError::InvalidCable {
                id: "<unnamed>".to_string(),
                reason: "missing id".to_string(),
            });
        }
        if !self.diameter.is_finite() || self.diameter < 0.0 {
            return Err(RoutingError::InvalidCable {
                id: self.id.clone(),
                reason: format!("diameter {} is not a non-negative number", self.diameter),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Not enough spare fill for this cable.
    Capacity,
    /// Raceway is reserved for a different cable group.
    CableGroup,
    /// Cable is pinned to a set of raceways that does not include this one.
    NotPinned,
    /// A locked route was applied even though it overfilled the raceway.
    OverCapacity,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub raceway_id: String,
    pub reason: ExclusionReason,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    pub cable_id: String,
    pub success: bool,
    pub total_length: f64,
    pub field_routed_length: f64,
    /// Path weight including field penalties.
    pub cost: f64,
    pub route_segments: Vec<RouteSegment>,
    pub tray_segments: Vec<String>,
    pub exclusions: Vec<Exclusion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RouteResult {
    pub fn failure(cable_id: impl Into<String>, exclusions: Vec<Exclusion>) -> Self {
        RouteResult {
            cable_id: cable_id.into(),
            success: false,
            total_length: 0.0,
            field_routed_length: 0.0,
            cost: 0.0,
            route_segments: Vec::new(),
            tray_segments: Vec::new(),
            exclusions,
            error: Some(NO_PATH_ERROR.to_string()),
        }
    }

    pub fn from_segments(
        cable_id: impl Into<String>,
        route_segments: Vec<RouteSegment>,
        cost: f64,
        exclusions: Vec<Exclusion>,
    ) -> Self {
        let mut total_length = 0.0;
        let mut field_routed_length = 0.0;
        let mut tray_segments: IndexSet<String> = IndexSet::new();

        for segment in &route_segments {
            total_length += segment.length;
            match segment.kind {
                SegmentKind::Field => field_routed_length += segment.length,
                SegmentKind::Tray => {
                    if let Some(raceway_id) = &segment.raceway_id {
                        tray_segments.insert(raceway_id.clone());
                    }
                }
            }
        }

        RouteResult {
            cable_id: cable_id.into(),
            success: true,
            total_length,
            field_routed_length,
            cost,
            route_segments,
            tray_segments: tray_segments.into_iter().collect(),
            exclusions,
            error: None,
        }
    }
}
