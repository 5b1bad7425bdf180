use axum::extract::FromRef;
use chrono::{DateTime, Utc};

use crate::studio::Studio;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type SharedStudio = Arc<Studio>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
    pub studio: SharedStudio,
}

impl ServerState {
    pub fn new(config: ServerConfig, studio: SharedStudio) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            started_at: Utc::now(),
            studio,
        }
    }
}

impl FromRef<ServerState> for SharedStudio {
    fn from_ref(input: &ServerState) -> Self {
        input.studio.clone()
    }
}
