//! Home Assistant state API

use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::http::client::HttpClient;

/// State object returned by `/api/states/<entity_id>`
#[derive(Debug, Clone, Deserialize)]
pub struct EntityState {
    #[serde(default)]
    pub entity_id: Option<String>,
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub last_changed: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// State update request
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StateUpdate {
    pub state: String,
}

fn state_path(entity_id: &str) -> String {
    format!("/api/states/{}", entity_id)
}

impl HttpClient {
    /// Fetch the current state of an entity
    pub async fn get_state(&self, entity_id: &str) -> Result<EntityState, ServiceError> {
        self.get(&state_path(entity_id)).await
    }

    /// Set the state of an entity
    pub async fn set_state(
        &self,
        entity_id: &str,
        update: &StateUpdate,
    ) -> Result<(), ServiceError> {
        self.post(&state_path(entity_id), update).await
    }
}
