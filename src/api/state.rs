use crate::config::Config;
use crate::detect::engine::AnomalyEngine;
use crate::metrics::MetricSource;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub source: Arc<dyn MetricSource>,
    pub engine: Arc<AnomalyEngine>,
}
