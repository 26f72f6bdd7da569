//! Collaborators the synchronizer talks to.
//!
//! Implementations live in the embedding application (REST clients, query
//! cache bindings). [`memory`] carries in-process versions used by the tests.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{ServerTimerSnapshot, Source, TaskStatus};

pub mod memory;

/// Identity attached to every timer endpoint call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerRequest {
    pub tenant_id: String,
    pub organization_id: String,
    pub organization_team_id: Option<String>,
    pub employee_id: Option<String>,
    pub task_id: Option<String>,
    pub source: Source,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTaskUpdate {
    pub organization_id: String,
    pub active_task_id: Option<String>,
    pub organization_team_id: Option<String>,
    pub tenant_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheScope {
    Timer,
    TeamMembers,
    WorkforceStatus,
}

#[async_trait]
pub trait ServerTimerGateway: Send + Sync {
    async fn get_status(&self, request: &TimerRequest) -> Result<ServerTimerSnapshot>;
    async fn start(&self, request: &TimerRequest) -> Result<ServerTimerSnapshot>;
    async fn stop(&self, source: Source, request: &TimerRequest) -> Result<ServerTimerSnapshot>;
    async fn toggle(&self, task_id: &str, request: &TimerRequest) -> Result<ServerTimerSnapshot>;
    /// Heartbeat keeping the server-side duration of the running log current.
    async fn sync(&self, source: Source, request: &TimerRequest) -> Result<()>;
}

#[async_trait]
pub trait TeamMembershipGateway: Send + Sync {
    async fn set_active_task(&self, membership_id: &str, update: ActiveTaskUpdate) -> Result<()>;
}

#[async_trait]
pub trait TaskGateway: Send + Sync {
    async fn update_task(&self, patch: TaskPatch) -> Result<()>;
}

/// Hook into the UI query cache.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, scope: CacheScope);
}

/// Invalidator for embeddings without a query cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, _scope: CacheScope) {}
}
