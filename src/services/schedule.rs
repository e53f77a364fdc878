//! Schedule arithmetic and an in-memory schedule service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use uuid::Uuid;

use super::ScheduleService;
use crate::error::{ServiceError, ServiceResult};
use crate::models::ConnectionContext;

/// How long the control loop waits before the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeToWait {
    Duration(Duration),
    /// Only a signal ends the wait.
    Indefinite,
}

impl TimeToWait {
    pub fn is_zero(&self) -> bool {
        matches!(self, TimeToWait::Duration(duration) if duration.is_zero())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionSchedule {
    /// Runs only on a manual trigger.
    Manual,
    Disabled,
    BasicInterval(#[serde(with = "interval_secs")] Duration),
}

/// `max(0, last_run + cadence - now)`, indefinite for manual and disabled
/// schedules. A connection that never ran is due immediately.
pub fn time_until_next_run(
    schedule: ConnectionSchedule,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> TimeToWait {
    let cadence = match schedule {
        ConnectionSchedule::Manual | ConnectionSchedule::Disabled => return TimeToWait::Indefinite,
        ConnectionSchedule::BasicInterval(cadence) => cadence,
    };
    let Some(last_run) = last_run else {
        return TimeToWait::Duration(Duration::ZERO);
    };
    let Ok(cadence) = chrono::Duration::from_std(cadence) else {
        return TimeToWait::Indefinite;
    };
    let Some(next_run) = last_run.checked_add_signed(cadence) else {
        return TimeToWait::Indefinite;
    };
    let remaining = next_run - now;
    TimeToWait::Duration(remaining.to_std().unwrap_or(Duration::ZERO))
}

mod interval_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone)]
struct ScheduledConnection {
    context: ConnectionContext,
    schedule: ConnectionSchedule,
    last_run: Option<DateTime<Utc>>,
    tombstoned: bool,
}

/// Schedule service backed by process memory.
#[derive(Debug)]
pub struct InMemoryScheduleService {
    connections: DashMap<Uuid, ScheduledConnection>,
    max_attempts: u32,
    load_shed: Mutex<VecDeque<Duration>>,
}

impl InMemoryScheduleService {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            connections: DashMap::new(),
            max_attempts,
            load_shed: Mutex::new(VecDeque::new()),
        }
    }

    pub fn register(&self, context: ConnectionContext, schedule: ConnectionSchedule) {
        self.connections.insert(
            context.connection_id,
            ScheduledConnection {
                context,
                schedule,
                last_run: None,
                tombstoned: false,
            },
        );
    }

    pub fn record_run(&self, connection_id: Uuid, at: DateTime<Utc>) {
        if let Some(mut connection) = self.connections.get_mut(&connection_id) {
            connection.last_run = Some(at);
        }
    }

    pub fn set_schedule(&self, connection_id: Uuid, schedule: ConnectionSchedule) {
        if let Some(mut connection) = self.connections.get_mut(&connection_id) {
            connection.schedule = schedule;
        }
    }

    pub fn tombstone(&self, connection_id: Uuid) {
        if let Some(mut connection) = self.connections.get_mut(&connection_id) {
            connection.tombstoned = true;
        }
    }

    /// Queue load-shed delays returned before admission resumes.
    pub fn push_load_shed(&self, delay: Duration) {
        self.load_shed.lock().push_back(delay);
    }

    fn connection(&self, connection_id: Uuid) -> ServiceResult<ScheduledConnection> {
        self.connections
            .get(&connection_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("connection {connection_id}")))
    }
}

#[async_trait]
impl ScheduleService for InMemoryScheduleService {
    async fn get_connection_context(&self, connection_id: Uuid) -> ServiceResult<ConnectionContext> {
        Ok(self.connection(connection_id)?.context)
    }

    async fn get_time_to_wait(&self, connection_id: Uuid) -> ServiceResult<TimeToWait> {
        let connection = self.connection(connection_id)?;
        Ok(time_until_next_run(
            connection.schedule,
            connection.last_run,
            Utc::now(),
        ))
    }

    async fn get_load_shed_backoff(&self, _context: &ConnectionContext) -> ServiceResult<Duration> {
        Ok(self.load_shed.lock().pop_front().unwrap_or(Duration::ZERO))
    }

    async fn get_max_attempts(&self) -> ServiceResult<u32> {
        Ok(self.max_attempts)
    }

    async fn is_workspace_tombstoned(&self, connection_id: Uuid) -> ServiceResult<bool> {
        Ok(self
            .connections
            .get(&connection_id)
            .map(|entry| entry.tombstoned)
            .unwrap_or(false))
    }
}
