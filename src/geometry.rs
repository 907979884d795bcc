use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// Two points closer than this are treated as the same location.
pub const COINCIDENT_TOLERANCE: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "PointRepr")]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Schedules store coordinates either as `[x, y, z]` or as `{x, y, z}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PointRepr {
    Array([f64; 3]),
    Object {
        x: f64,
        y: f64,
        #[serde(default)]
        z: f64,
    },
}

impl From<PointRepr> for Point3 {
    fn from(repr: PointRepr) -> Self {
        match repr {
            PointRepr::Array([x, y, z]) => Point3 { x, y, z },
            PointRepr::Object { x, y, z } => Point3 { x, y, z },
        }
    }
}

impl From<[f64; 3]> for Point3 {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Point3 { x, y, z }
    }
}

impl Sub for Point3 {
    type Output = Point3;

    fn sub(self, other: Point3) -> Point3 {
        Point3 {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }
}

impl Add for Point3 {
    type Output = Point3;

    fn add(self, other: Point3) -> Point3 {
        Point3 {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }
}

impl Mul<f64> for Point3 {
    type Output = Point3;

    fn mul(self, factor: f64) -> Point3 {
        Point3 {
            x: self.x * factor,
            y: self.y * factor,
            z: self.z * factor,
        }
    }
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Point3 { x, y, z }
    }

    pub fn dot(&self, other: &Point3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn distance(&self, other: &Point3) -> f64 {
        (*self - *other).length_as_vector()
    }

    pub fn manhattan_distance(&self, other: &Point3) -> f64 {
        (self.x - other.x).abs() + (self.y - other.y).abs() + (self.z - other.z).abs()
    }

    pub fn length_as_vector(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn is_coincident(&self, other: &Point3) -> bool {
        self.distance(other) <= COINCIDENT_TOLERANCE
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl rstar::Point for Point3 {
    type Scalar = f64;
    const DIMENSIONS: usize = 3;

    fn generate(mut generator: impl FnMut(usize) -> Self::Scalar) -> Self {
        Point3 {
            x: generator(0),
            y: generator(1),
            z: generator(2),
        }
    }

    fn nth(&self, index: usize) -> Self::Scalar {
        match index {
            0 => self.x,
            1 => self.y,
            2 => self.z,
            _ => panic!("Index out of bounds"),
        }
    }

    fn nth_mut(&mut self, index: usize) -> &mut Self::Scalar {
        match index {
            0 => &mut self.x,
            1 => &mut self.y,
            2 => &mut self.z,
            _ => panic!("Index out of bounds"),
        }
    }
}

/// Closest point on the segment `start..end` to `point`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub point: Point3,
    /// Position along the segment, clamped to `0.0..=1.0`.
    pub t: f64,
    /// Distance from the projected point back to the query point.
    pub distance: f64,
}

pub fn project_onto_segment(point: &Point3, start: &Point3, end: &Point3) -> Projection {
    let direction = *end - *start;
    let length_sqrd = direction.dot(&direction);

    // Degenerate segments project everything onto their start.
    let t = if length_sqrd <= f64::EPSILON {
        0.0
    } else {
        ((*point - *start).dot(&direction) / length_sqrd).clamp(0.0, 1.0)
    };

    let projected = *start + direction * t;
    Projection {
        point: projected,
        t,
        distance: projected.distance(point),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distances() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(3.0, 4.0, 12.0);
        assert_eq!(a.distance(&b), 13.0);
        assert_eq!(a.manhattan_distance(&b), 19.0);
    }

    #[test]
    fn projection_is_clamped_to_the_segment() {
        let start = Point3::new(0.0, 0.0, 0.0);
        let end = Point3::new(10.0, 0.0, 0.0);

        let inside = project_onto_segment(&Point3::new(4.0, 3.0, 0.0), &start, &end);
        assert_eq!(inside.point, Point3::new(4.0, 0.0, 0.0));
        assert_eq!(inside.t, 0.4);
        assert_eq!(inside.distance, 3.0);

        let beyond = project_onto_segment(&Point3::new(14.0, 3.0, 0.0), &start, &end);
        assert_eq!(beyond.point, end);
        assert_eq!(beyond.t, 1.0);
        assert_eq!(beyond.distance, 5.0);
    }

    #[test]
    fn degenerate_segment_projects_to_start() {
        let p = Point3::new(1.0, 1.0, 1.0);
        let projection = project_onto_segment(&Point3::new(1.0, 1.0, 3.0), &p, &p);
        assert_eq!(projection.point, p);
        assert_eq!(projection.distance, 2.0);
    }

    #[test]
    fn points_deserialize_from_arrays_and_objects() {
        let from_array: Point3 = serde_json::from_str("[1.0, 2.0, 3.0]").unwrap();
        let from_object: Point3 = serde_json::from_str(r#"{"x": 1, "y": 2, "z": 3}"#).unwrap();
        let flat: Point3 = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap();
        assert_eq!(from_array, Point3::new(1.0, 2.0, 3.0));
        assert_eq!(from_object, from_array);
        assert_eq!(flat.z, 0.0);
    }
}
