use crate::config::Config;
use crate::ingest::IngestHandler;
use crate::session::SessionManager;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use vigil_storage::{MetaStore, Tsdb};

#[derive(Clone)]
pub struct AppState {
    pub meta: Arc<MetaStore>,
    pub tsdb: Arc<Tsdb>,
    pub manager: Arc<SessionManager>,
    pub ingest: Arc<IngestHandler>,
    pub config: Arc<Config>,
    pub start_time: DateTime<Utc>,
}
