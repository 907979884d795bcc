use std::path::PathBuf;

use pyo3::prelude::*;

use crate::error::{Result, RoutingError};
use crate::lib_tracing::LibTracer;
use crate::routing::{
    route_cable, BatchRouter, CableRecord, ProgressMessage, RacewayRecord, RacewayRegistry, RoutingConfig,
};

/// Python entry point. Records and results cross the boundary as JSON strings.
#[pyclass]
pub struct CableRouter {
    config: RoutingConfig,
}

#[pymethods]
impl CableRouter {
    #[new]
    #[pyo3(signature = (config_json=None))]
    pub fn new(config_json: Option<&str>) -> PyResult<Self> {
        let config = match config_json {
            Some(json) => RoutingConfig::from_json(json)?,
            None => RoutingConfig::default(),
        };
        Ok(CableRouter {
            config: config.with_env_overrides(),
        })
    }

    /// Routes a whole batch and returns the final report as JSON.
    fn route_batch(&self, py: Python<'_>, raceways_json: &str, cables_json: &str) -> PyResult<String> {
        let raceways: Vec<RacewayRecord> = serde_json::from_str(raceways_json).map_err(RoutingError::from)?;
        let cables: Vec<CableRecord> = serde_json::from_str(cables_json).map_err(RoutingError::from)?;
        let config = self.config.clone();

        let report = py.allow_threads(move || -> Result<String> {
            let mut router = BatchRouter::new(config);
            router.start_from_records(raceways, cables)?;
            let mut done = None;
            router.run(|message| {
                if let ProgressMessage::Done(report) = message {
                    done = Some(report);
                }
            });
            Ok(serde_json::to_string(&done.unwrap_or_else(|| router.report()))?)
        })?;
        Ok(report)
    }

    /// Routes one cable against the given raceways without booking any fill.
    fn route_cable(&self, py: Python<'_>, raceways_json: &str, cable_json: &str) -> PyResult<String> {
        let raceways: Vec<RacewayRecord> = serde_json::from_str(raceways_json).map_err(RoutingError::from)?;
        let cable: CableRecord = serde_json::from_str(cable_json).map_err(RoutingError::from)?;
        let config = self.config.clone();

        let result = py.allow_threads(move || -> Result<String> {
            cable.validate()?;
            let registry = RacewayRegistry::from_records(raceways, &config)?;
            Ok(serde_json::to_string(&route_cable(&registry, &cable, &config))?)
        })?;
        Ok(result)
    }
}

#[pymethods]
impl LibTracer {
    #[new]
    #[pyo3(signature = (log_path=None, flame_path=None))]
    fn py_new(log_path: Option<PathBuf>, flame_path: Option<PathBuf>) -> PyResult<Self> {
        Ok(LibTracer::install(log_path.as_deref(), flame_path.as_deref())?)
    }

    #[pyo3(name = "flush")]
    fn py_flush(&self) -> PyResult<()> {
        Ok(self.flush()?)
    }
}

#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<CableRouter>()?;
    m.add_class::<LibTracer>()?;
    Ok(())
}
