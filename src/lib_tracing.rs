use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use tracing::level_filters::LevelFilter;
use tracing_flame::{FlameLayer, FlushGuard};
use tracing_subscriber::prelude::*;

use crate::error::{Result, RoutingError};

/// Keeps the process-wide subscriber's flame output alive.
///
/// Pretty INFO logs always go to stdout. A log file, when given, receives
/// every level. Dropping the tracer flushes the flame graph samples.
#[cfg_attr(feature = "python", pyo3::pyclass)]
pub struct LibTracer {
    flame_guard: Option<FlushGuard<BufWriter<File>>>,
}

impl LibTracer {
    pub fn install(log_path: Option<&Path>, flame_path: Option<&Path>) -> Result<Self> {
        let stdout_log = tracing_subscriber::fmt::layer().pretty();

        let debug_log = match log_path {
            Some(path) => {
                let file = File::create(path)?;
                Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
            }
            None => None,
        };

        let (flame_layer, flame_guard) = match flame_path {
            Some(path) => {
                let (layer, guard) = FlameLayer::with_file(path).map_err(|e| RoutingError::Tracing(e.to_string()))?;
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(
                stdout_log
                    .with_filter(LevelFilter::INFO)
                    .and_then(debug_log),
            )
            .with(flame_layer)
            .try_init()
            .map_err(|e| RoutingError::Tracing(e.to_string()))?;

        Ok(LibTracer { flame_guard })
    }

    /// Writes buffered flame samples without uninstalling anything.
    pub fn flush(&self) -> Result<()> {
        if let Some(guard) = &self.flame_guard {
            guard.flush().map_err(|e| RoutingError::Tracing(e.to_string()))?;
        }
        Ok(())
    }
}
