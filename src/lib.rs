//! Capacity-aware cable routing through trays, conduits and open field.
//!
//! Each cable is solved as a shortest path on a graph built from the raceways
//! that still have room for it. Batches route cables in order and book fill
//! as they go, so earlier cables get first pick of the raceway network.

pub mod error;
pub mod geometry;
pub mod lib_tracing;
pub mod routing;

#[cfg(feature = "python")]
mod python;

pub use error::{Result, RoutingError};
pub use geometry::Point3;
pub use routing::{
    route_cable, BatchRouter, BatchWorker, CableRecord, ProgressMessage, RacewayRegistry, RouteResult, RoutingConfig,
};
