use crate::common::{AgentId, DomainError, DomainResult, Point, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl TaskPriority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TaskPriority::Low),
            1 => Some(TaskPriority::Normal),
            2 => Some(TaskPriority::High),
            3 => Some(TaskPriority::Urgent),
            _ => None,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Assigned,
    /// Reachable through [`Task::begin`] but never entered by the scheduler.
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Assigned => 1,
            TaskStatus::InProgress => 2,
            TaskStatus::Completed => 3,
            TaskStatus::Failed => 4,
            TaskStatus::Cancelled => 5,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TaskStatus::Pending),
            1 => Some(TaskStatus::Assigned),
            2 => Some(TaskStatus::InProgress),
            3 => Some(TaskStatus::Completed),
            4 => Some(TaskStatus::Failed),
            5 => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Assigned => "Assigned",
            TaskStatus::InProgress => "InProgress",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
            TaskStatus::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// A sequence of waypoints to be visited by one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    waypoints: Vec<Point>,
    current_waypoint_index: usize,
    priority: TaskPriority,
    status: TaskStatus,
    assigned_agent_id: Option<AgentId>,
    created_time: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    completion_time: Option<DateTime<Utc>>,
    estimated_duration: f64,
}

impl Task {
    pub fn new(id: TaskId, waypoints: Vec<Point>, priority: TaskPriority) -> DomainResult<Self> {
        if waypoints.is_empty() {
            return Err(DomainError::InvalidCommand {
                reason: "a task needs at least one waypoint".to_string(),
            });
        }
        Ok(Self {
            id,
            waypoints,
            current_waypoint_index: 0,
            priority,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            created_time: Utc::now(),
            start_time: None,
            completion_time: None,
            estimated_duration: 0.0,
        })
    }

    /// Rebuilds a persisted task. Only the current target survives persistence,
    /// and a task that was bound to an agent goes back to `Pending` since the
    /// binding is not stored.
    pub fn restored(id: TaskId, target: Point, priority: TaskPriority, status: TaskStatus) -> Self {
        let now = Utc::now();
        let status = if status.is_active() {
            TaskStatus::Pending
        } else {
            status
        };
        Self {
            id,
            waypoints: vec![target],
            current_waypoint_index: 0,
            priority,
            status,
            assigned_agent_id: None,
            created_time: now,
            start_time: None,
            completion_time: status.is_terminal().then_some(now),
            estimated_duration: 0.0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn waypoints(&self) -> &[Point] {
        &self.waypoints
    }

    pub fn current_waypoint_index(&self) -> usize {
        self.current_waypoint_index
    }

    /// The waypoint being worked on, or the last one once all are visited.
    pub fn current_waypoint(&self) -> Point {
        let last = self.waypoints.len().saturating_sub(1);
        self.waypoints[self.current_waypoint_index.min(last)]
    }

    pub fn first_waypoint(&self) -> Point {
        self.waypoints[0]
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn assigned_agent_id(&self) -> Option<AgentId> {
        self.assigned_agent_id
    }

    pub fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.completion_time
    }

    pub fn estimated_duration(&self) -> f64 {
        self.estimated_duration
    }

    pub fn set_estimated_duration(&mut self, seconds: f64) {
        self.estimated_duration = seconds;
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn has_more_waypoints(&self) -> bool {
        self.current_waypoint_index < self.waypoints.len()
    }

    /// Percentage of waypoints already visited.
    pub fn progress(&self) -> f64 {
        self.current_waypoint_index as f64 / self.waypoints.len() as f64 * 100.0
    }

    /// Seconds between assignment and completion, for completed tasks.
    pub fn completion_seconds(&self) -> Option<f64> {
        match (self.status, self.start_time, self.completion_time) {
            (TaskStatus::Completed, Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// Binds the task to an agent. Only legal from `Pending`.
    pub fn assign(&mut self, agent_id: AgentId) -> DomainResult<()> {
        self.transition(TaskStatus::Assigned, |s| s == TaskStatus::Pending)?;
        self.assigned_agent_id = Some(agent_id);
        self.start_time = Some(Utc::now());
        Ok(())
    }

    pub fn begin(&mut self) -> DomainResult<()> {
        self.transition(TaskStatus::InProgress, |s| s == TaskStatus::Assigned)
    }

    /// Moves the cursor past the current waypoint. Returns whether any remain.
    pub fn advance_waypoint(&mut self) -> bool {
        if self.has_more_waypoints() {
            self.current_waypoint_index += 1;
        }
        self.has_more_waypoints()
    }

    pub fn complete(&mut self) -> DomainResult<()> {
        self.transition(TaskStatus::Completed, TaskStatus::is_active)?;
        self.completion_time = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self) -> DomainResult<()> {
        self.transition(TaskStatus::Failed, TaskStatus::is_active)?;
        self.completion_time = Some(Utc::now());
        Ok(())
    }

    pub fn cancel(&mut self) -> DomainResult<()> {
        self.transition(TaskStatus::Cancelled, |s| {
            matches!(s, TaskStatus::Pending | TaskStatus::Assigned)
        })?;
        self.completion_time = Some(Utc::now());
        Ok(())
    }

    fn transition(
        &mut self,
        to: TaskStatus,
        allowed: impl Fn(TaskStatus) -> bool,
    ) -> DomainResult<()> {
        if !allowed(self.status) {
            return Err(DomainError::InvalidTransition {
                id: self.id,
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}
