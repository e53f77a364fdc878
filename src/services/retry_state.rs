use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::RetryStateStore;
use crate::config::RetriesConfig;
use crate::error::ServiceResult;
use crate::retry::RetryManager;

/// Retry managers kept in process memory, created from a configured template.
///
/// With retries disabled every hydration returns `None`, which makes the
/// control loop fall back to the attempt-count ceiling.
#[derive(Debug)]
pub struct InMemoryRetryStateStore {
    template: RetriesConfig,
    managers: DashMap<(i64, Uuid), RetryManager>,
}

impl InMemoryRetryStateStore {
    pub fn new(template: RetriesConfig) -> Self {
        Self {
            template,
            managers: DashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(RetriesConfig {
            enabled: false,
            ..RetriesConfig::default()
        })
    }

    pub fn get(&self, job_id: i64, connection_id: Uuid) -> Option<RetryManager> {
        self.managers
            .get(&(job_id, connection_id))
            .map(|entry| entry.clone())
    }
}

#[async_trait]
impl RetryStateStore for InMemoryRetryStateStore {
    async fn hydrate(
        &self,
        job_id: Option<i64>,
        connection_id: Uuid,
    ) -> ServiceResult<Option<RetryManager>> {
        if !self.template.enabled {
            return Ok(None);
        }
        let persisted = job_id.and_then(|job_id| self.get(job_id, connection_id));
        Ok(Some(persisted.unwrap_or_else(|| self.template.new_manager())))
    }

    async fn persist(
        &self,
        job_id: i64,
        connection_id: Uuid,
        manager: &RetryManager,
    ) -> ServiceResult<bool> {
        if !self.template.enabled {
            return Ok(false);
        }
        self.managers.insert((job_id, connection_id), manager.clone());
        Ok(true)
    }
}
