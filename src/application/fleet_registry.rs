use crate::common::sync::lock;
use crate::common::{AgentId, DomainError, DomainResult, Point, TaskId};
use crate::domains::agent::{Agent, AgentHandle, AgentState, PendingStop};
use crate::domains::environment::Environment;
use crate::domains::logger::DynLogger;
use crate::domains::task::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RESET_ATTEMPTS: usize = 100;
const RESET_FALLBACK: Point = Point::new(1, 1);

/// Registry-side mirror of an agent, refreshed once per registry pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: AgentId,
    pub home_position: Point,
    pub current_state: AgentState,
    pub current_task_id: Option<TaskId>,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    /// One cell counts as one metre.
    pub total_distance_traveled: f64,
    pub cells_traveled: u64,
    pub obstacles_avoided: u64,
    pub last_update_time: DateTime<Utc>,
    pub is_active: bool,
    pub current_goal: Point,
    pub has_personal_goal: bool,
    pub position: Point,
    pub battery_level: f32,
}

impl AgentInfo {
    fn fresh(handle: &AgentHandle, home: Point) -> Self {
        let snap = handle.snapshot();
        Self {
            id: snap.id,
            home_position: home,
            current_state: snap.state,
            current_task_id: None,
            tasks_completed: 0,
            tasks_failed: 0,
            total_distance_traveled: 0.0,
            cells_traveled: snap.cells_traveled,
            obstacles_avoided: snap.obstacles_avoided,
            last_update_time: Utc::now(),
            is_active: true,
            current_goal: snap.current_goal,
            has_personal_goal: snap.has_personal_goal,
            position: snap.position,
            battery_level: snap.battery_level,
        }
    }
}

/// What survives a save/load of an agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentRecord {
    pub id: AgentId,
    pub position: Point,
    pub state: AgentState,
    pub battery_level: f32,
}

struct AgentEntry {
    handle: AgentHandle,
    info: AgentInfo,
}

struct Directory {
    agents: BTreeMap<AgentId, AgentEntry>,
    next_id: AgentId,
    agent_tick: Duration,
}

/// Thread-safe directory of agents. Callers address agents by id and receive
/// cloned [`AgentInfo`] values, never references.
pub struct FleetRegistry {
    env: Arc<Environment>,
    directory: Mutex<Directory>,
    logger: DynLogger,
}

impl FleetRegistry {
    pub fn new(env: Arc<Environment>, agent_tick: Duration, logger: DynLogger) -> Self {
        Self {
            env,
            directory: Mutex::new(Directory {
                agents: BTreeMap::new(),
                next_id: 1,
                agent_tick,
            }),
            logger,
        }
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    pub fn agent_tick_interval(&self) -> Duration {
        lock(&self.directory).agent_tick
    }

    /// Applies to agents created afterwards.
    pub fn set_agent_tick_interval(&self, interval: Duration) {
        lock(&self.directory).agent_tick = interval;
    }

    /// Registers a new idle agent at `home`. The agent is not started.
    pub fn add_agent(&self, home: Point) -> AgentId {
        let mut dir = lock(&self.directory);
        let id = dir.next_id;
        dir.next_id += 1;
        let handle = AgentHandle::new(Agent::new(id, home), Arc::clone(&self.env), dir.agent_tick);
        let info = AgentInfo::fresh(&handle, home);
        dir.agents.insert(id, AgentEntry { handle, info });
        self.logger.info(&format!("Agent {} registered at {}", id, home));
        id
    }

    /// Stops and removes an agent. The thread is joined before this returns.
    pub fn remove_agent(&self, id: AgentId) -> bool {
        let removed = lock(&self.directory).agents.remove(&id);
        match removed {
            Some(mut entry) => {
                entry.handle.stop();
                self.logger.info(&format!("Agent {} removed", id));
                true
            }
            None => false,
        }
    }

    pub fn start_agent(&self, id: AgentId) -> DomainResult<()> {
        let mut dir = lock(&self.directory);
        let entry = dir
            .agents
            .get_mut(&id)
            .ok_or(DomainError::AgentNotFound { id })?;
        entry.handle.start()
    }

    /// Starts every active agent. Returns how many are running afterwards.
    pub fn start_all(&self) -> usize {
        let mut dir = lock(&self.directory);
        let mut running = 0;
        for (id, entry) in dir.agents.iter_mut() {
            if !entry.info.is_active {
                continue;
            }
            match entry.handle.start() {
                Ok(()) => running += 1,
                Err(e) => self.logger.error(&format!("Agent {} failed to start: {}", id, e)),
            }
        }
        running
    }

    /// Signals every agent under the lock and joins the threads after it is
    /// released.
    pub fn stop_all(&self) {
        let pending: Vec<PendingStop> = lock(&self.directory)
            .agents
            .values_mut()
            .filter_map(|entry| entry.handle.signal_stop())
            .collect();
        for stop in pending {
            stop.wait();
        }
    }

    pub fn set_active(&self, id: AgentId, active: bool) -> bool {
        match lock(&self.directory).agents.get_mut(&id) {
            Some(entry) => {
                entry.info.is_active = active;
                true
            }
            None => false,
        }
    }

    /// Binds `task` to the agent and steers the agent to the task's current
    /// waypoint. Fails for unknown agents, agents already holding a task, and
    /// tasks that are not pending.
    pub fn assign(&self, id: AgentId, task: &mut Task) -> bool {
        let mut dir = lock(&self.directory);
        let Some(entry) = dir.agents.get_mut(&id) else {
            return false;
        };
        if entry.info.current_task_id.is_some() {
            return false;
        }
        if let Err(e) = task.assign(id) {
            self.logger.warn(&format!("Cannot assign task {} to agent {}: {}", task.id(), id, e));
            return false;
        }
        let waypoint = task.current_waypoint();
        entry.handle.with_agent(|agent| agent.set_personal_goal(waypoint));
        entry.info.current_task_id = Some(task.id());
        entry.info.current_goal = waypoint;
        entry.info.has_personal_goal = true;
        self.logger.info(&format!(
            "Task {} assigned to agent {} (target {})",
            task.id(),
            id,
            waypoint
        ));
        true
    }

    /// Clears the task binding and the steering goal.
    pub fn unassign(&self, id: AgentId) {
        if let Some(entry) = lock(&self.directory).agents.get_mut(&id) {
            Self::release(entry);
        }
    }

    pub fn mark_task_failed(&self, id: AgentId) {
        if let Some(entry) = lock(&self.directory).agents.get_mut(&id) {
            Self::release(entry);
            entry.info.tasks_failed += 1;
        }
    }

    fn release(entry: &mut AgentEntry) {
        entry.info.current_task_id = None;
        entry.handle.with_agent(|agent| agent.clear_personal_goal());
        entry.info.has_personal_goal = false;
    }

    /// Re-points the agent at the next waypoint of its task. Waypoints only
    /// need to be inside the grid.
    pub fn steer(&self, id: AgentId, waypoint: Point) -> bool {
        if !self.env.in_bounds(waypoint) {
            return false;
        }
        self.point_agent_at(id, waypoint)
    }

    /// Gives the agent a personal goal. Like the global goal it must be an
    /// interior cell.
    pub fn set_goal(&self, id: AgentId, goal: Point) -> bool {
        if !self.env.is_interior(goal) {
            self.logger.warn(&format!("Rejected goal {} for agent {}", goal, id));
            return false;
        }
        self.point_agent_at(id, goal)
    }

    fn point_agent_at(&self, id: AgentId, goal: Point) -> bool {
        match lock(&self.directory).agents.get_mut(&id) {
            Some(entry) => {
                entry.handle.with_agent(|agent| agent.set_personal_goal(goal));
                entry.info.current_goal = goal;
                entry.info.has_personal_goal = true;
                true
            }
            None => false,
        }
    }

    pub fn clear_all_personal_goals(&self) {
        let mut dir = lock(&self.directory);
        for entry in dir.agents.values_mut() {
            entry.handle.with_agent(|agent| agent.clear_personal_goal());
            entry.info.has_personal_goal = false;
        }
    }

    /// Copies live agent state into every mirror. A Navigating to ReachedGoal
    /// edge counts as a completed trip.
    pub fn refresh(&self) {
        let mut dir = lock(&self.directory);
        let now = Utc::now();
        for entry in dir.agents.values_mut() {
            let snap = entry.handle.snapshot();
            let info = &mut entry.info;
            let previous = info.current_state;
            info.current_state = snap.state;
            info.position = snap.position;
            info.cells_traveled = snap.cells_traveled;
            info.total_distance_traveled = snap.cells_traveled as f64;
            info.obstacles_avoided = snap.obstacles_avoided;
            info.current_goal = snap.current_goal;
            info.has_personal_goal = snap.has_personal_goal;
            info.battery_level = snap.battery_level;
            info.last_update_time = now;
            if previous == AgentState::Navigating && snap.state == AgentState::ReachedGoal {
                info.tasks_completed += 1;
            }
        }
    }

    /// Active, unassigned and Idle according to the last refresh.
    pub fn is_available(&self, id: AgentId) -> bool {
        lock(&self.directory)
            .agents
            .get(&id)
            .map_or(false, |entry| Self::available(&entry.info))
    }

    fn available(info: &AgentInfo) -> bool {
        info.is_active && info.current_task_id.is_none() && info.current_state == AgentState::Idle
    }

    pub fn find_available(&self) -> Option<AgentId> {
        lock(&self.directory)
            .agents
            .values()
            .find(|entry| Self::available(&entry.info))
            .map(|entry| entry.info.id)
    }

    /// Every available agent with its live position, in id order.
    pub fn available_candidates(&self) -> Vec<(AgentId, Point)> {
        lock(&self.directory)
            .agents
            .values()
            .filter(|entry| Self::available(&entry.info))
            .map(|entry| (entry.info.id, entry.handle.position()))
            .collect()
    }

    /// Position and state read straight from the agent.
    pub fn live_status(&self, id: AgentId) -> Option<(Point, AgentState)> {
        lock(&self.directory)
            .agents
            .get(&id)
            .map(|entry| (entry.handle.position(), entry.handle.state()))
    }

    /// Regenerates obstacles and re-creates every agent at a random free cell
    /// with zeroed counters. Agents that were running are restarted.
    pub fn reset_all(&self, obstacle_percentage: u32) {
        let placed = self.env.generate_random_obstacles(obstacle_percentage);
        let mut retired = Vec::new();
        let count = {
            let mut dir = lock(&self.directory);
            let tick = dir.agent_tick;
            for (id, entry) in dir.agents.iter_mut() {
                let home = self
                    .env
                    .random_free_cell(RESET_ATTEMPTS, 1)
                    .unwrap_or(RESET_FALLBACK);
                let is_active = entry.info.is_active;

                let pending = entry.handle.signal_stop();
                let was_running = pending.is_some();
                retired.extend(pending);
                let agent = Agent::new(*id, home);
                entry.handle = AgentHandle::new(agent, Arc::clone(&self.env), tick);
                entry.info = AgentInfo::fresh(&entry.handle, home);
                entry.info.is_active = is_active;

                if was_running {
                    if let Err(e) = entry.handle.start() {
                        self.logger.error(&format!("Agent {} failed to restart: {}", id, e));
                    }
                }
            }
            dir.agents.len()
        };
        // Old threads only touch their own retired agent cells.
        for stop in retired {
            stop.wait();
        }
        self.logger.info(&format!(
            "Fleet reset: {} obstacles, {} agents repositioned",
            placed, count
        ));
    }

    pub fn agent_info(&self, id: AgentId) -> Option<AgentInfo> {
        lock(&self.directory).agents.get(&id).map(|e| e.info.clone())
    }

    pub fn agents(&self) -> Vec<AgentInfo> {
        lock(&self.directory).agents.values().map(|e| e.info.clone()).collect()
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        lock(&self.directory).agents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.directory).agents.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.directory).agents.is_empty()
    }

    pub fn set_battery_level(&self, id: AgentId, level: f32) -> bool {
        match lock(&self.directory).agents.get_mut(&id) {
            Some(entry) => {
                entry.handle.with_agent(|agent| agent.set_battery_level(level));
                entry.info.battery_level = entry.handle.snapshot().battery_level;
                true
            }
            None => false,
        }
    }

    pub fn snapshots(&self) -> Vec<AgentRecord> {
        lock(&self.directory)
            .agents
            .values()
            .map(|entry| {
                let snap = entry.handle.snapshot();
                AgentRecord {
                    id: snap.id,
                    position: snap.position,
                    state: snap.state,
                    battery_level: snap.battery_level,
                }
            })
            .collect()
    }

    /// Replaces the whole fleet with `records`. Existing agents are stopped;
    /// restored agents start Idle and are not started.
    pub fn restore(&self, records: &[AgentRecord]) {
        let old = {
            let mut dir = lock(&self.directory);
            let tick = dir.agent_tick;
            let old = std::mem::take(&mut dir.agents);
            for record in records {
                let mut agent = Agent::new(record.id, record.position);
                agent.set_battery_level(record.battery_level);
                let handle = AgentHandle::new(agent, Arc::clone(&self.env), tick);
                let info = AgentInfo::fresh(&handle, record.position);
                dir.agents.insert(record.id, AgentEntry { handle, info });
            }
            dir.next_id = records.iter().map(|r| r.id).max().map_or(1, |max| max + 1);
            old
        };
        drop(old);
        self.logger.info(&format!("Fleet restored with {} agents", records.len()));
    }
}

impl Drop for FleetRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}
