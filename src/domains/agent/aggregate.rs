use crate::common::{AgentId, Point};
use crate::domains::environment::Environment;
use crate::domains::path_planning::find_path;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Positions kept for stuck detection.
pub const HISTORY_CAPACITY: usize = 10;
/// Occurrences of the current position within the history that count as stuck.
pub const STUCK_THRESHOLD: usize = 3;
pub const FULL_BATTERY: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentState {
    Idle,
    Navigating,
    ReachedGoal,
    Blocked,
    Error,
    Shutdown,
}

impl AgentState {
    pub fn as_u8(self) -> u8 {
        match self {
            AgentState::Idle => 0,
            AgentState::Navigating => 1,
            AgentState::ReachedGoal => 2,
            AgentState::Blocked => 3,
            AgentState::Error => 4,
            AgentState::Shutdown => 5,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AgentState::Idle),
            1 => Some(AgentState::Navigating),
            2 => Some(AgentState::ReachedGoal),
            3 => Some(AgentState::Blocked),
            4 => Some(AgentState::Error),
            5 => Some(AgentState::Shutdown),
            _ => None,
        }
    }
}

/// What a single navigation tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The agent is not in a state that navigates.
    Inactive,
    ReachedGoal,
    Moved(Point),
    /// The plan was exhausted or its next cell was taken; greedy resumes next tick.
    PlanDropped,
    Blocked,
}

/// Point-in-time copy of an agent, taken under its lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub position: Point,
    pub state: AgentState,
    pub current_goal: Point,
    pub has_personal_goal: bool,
    pub cells_traveled: u64,
    pub obstacles_avoided: u64,
    pub battery_level: f32,
    pub planned_steps_left: usize,
}

#[derive(Debug, Clone)]
pub struct Agent {
    id: AgentId,
    position: Point,
    state: AgentState,
    personal_goal: Option<Point>,
    history: VecDeque<Point>,
    planned_path: Vec<Point>,
    path_index: usize,
    cells_traveled: u64,
    obstacles_avoided: u64,
    battery_level: f32,
    last_goal: Option<Point>,
}

impl Agent {
    pub fn new(id: AgentId, position: Point) -> Self {
        Self {
            id,
            position,
            state: AgentState::Idle,
            personal_goal: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            planned_path: Vec::new(),
            path_index: 0,
            cells_traveled: 0,
            obstacles_avoided: 0,
            battery_level: FULL_BATTERY,
            last_goal: None,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: AgentState) {
        self.state = state;
    }

    pub fn personal_goal(&self) -> Option<Point> {
        self.personal_goal
    }

    pub fn cells_traveled(&self) -> u64 {
        self.cells_traveled
    }

    pub fn obstacles_avoided(&self) -> u64 {
        self.obstacles_avoided
    }

    pub fn battery_level(&self) -> f32 {
        self.battery_level
    }

    pub fn set_battery_level(&mut self, level: f32) {
        self.battery_level = level.clamp(0.0, FULL_BATTERY);
    }

    pub fn planned_path(&self) -> &[Point] {
        &self.planned_path[self.path_index.min(self.planned_path.len())..]
    }

    pub fn history(&self) -> impl Iterator<Item = &Point> {
        self.history.iter()
    }

    /// The personal goal when one is set, otherwise the fleet-wide goal.
    pub fn effective_goal(&self, env: &Environment) -> Point {
        self.personal_goal.unwrap_or_else(|| env.goal())
    }

    /// Overrides the fleet-wide goal for this agent. An idle or parked agent
    /// starts navigating again.
    pub fn set_personal_goal(&mut self, goal: Point) {
        if self.personal_goal != Some(goal) {
            self.discard_plan();
        }
        self.personal_goal = Some(goal);
        if matches!(self.state, AgentState::Idle | AgentState::ReachedGoal) {
            self.state = AgentState::Navigating;
        }
    }

    /// Drops the override. The fleet-wide goal applies from the next tick.
    pub fn clear_personal_goal(&mut self) {
        if self.personal_goal.take().is_some() {
            self.discard_plan();
        }
    }

    pub fn snapshot(&self, global_goal: Point) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            position: self.position,
            state: self.state,
            current_goal: self.personal_goal.unwrap_or(global_goal),
            has_personal_goal: self.personal_goal.is_some(),
            cells_traveled: self.cells_traveled,
            obstacles_avoided: self.obstacles_avoided,
            battery_level: self.battery_level,
            planned_steps_left: self.planned_path().len(),
        }
    }

    /// One navigation step against the shared environment.
    pub fn tick(&mut self, env: &Environment) -> TickOutcome {
        let goal = self.effective_goal(env);

        if self.state == AgentState::ReachedGoal && self.last_goal != Some(goal) {
            tracing::debug!("Agent {} sees a new goal {}", self.id, goal);
            self.state = AgentState::Navigating;
            self.discard_plan();
        }
        if !matches!(self.state, AgentState::Navigating | AgentState::Blocked) {
            return TickOutcome::Inactive;
        }
        self.last_goal = Some(goal);

        if self.position == goal {
            self.state = AgentState::ReachedGoal;
            self.discard_plan();
            return TickOutcome::ReachedGoal;
        }

        self.observe(env, goal);

        if !self.planned_path.is_empty() {
            return self.follow_plan(env);
        }
        self.step_greedy(env, goal)
    }

    /// Records the current position and replans when the agent keeps returning
    /// to it. Returns true when a replan happened.
    pub fn observe(&mut self, env: &Environment, goal: Point) -> bool {
        self.history.push_back(self.position);
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
        if !self.is_stuck() {
            return false;
        }
        self.replan(env, goal);
        true
    }

    pub fn is_stuck(&self) -> bool {
        self.history.len() >= STUCK_THRESHOLD
            && self.history.iter().filter(|p| **p == self.position).count() >= STUCK_THRESHOLD
    }

    fn replan(&mut self, env: &Environment, goal: Point) {
        self.planned_path = find_path(self.position, goal, env);
        self.path_index = 0;
        self.obstacles_avoided += 1;
        tracing::debug!(
            "Agent {} stuck at {}, replanned {} steps to {}",
            self.id,
            self.position,
            self.planned_path.len(),
            goal
        );
    }

    fn follow_plan(&mut self, env: &Environment) -> TickOutcome {
        let Some(next) = self.planned_path.get(self.path_index).copied() else {
            self.discard_plan();
            return TickOutcome::PlanDropped;
        };
        if !env.is_free(next) || !self.move_to(env, next) {
            self.discard_plan();
            return TickOutcome::PlanDropped;
        }
        self.path_index += 1;
        self.state = AgentState::Navigating;
        TickOutcome::Moved(next)
    }

    fn step_greedy(&mut self, env: &Environment, goal: Point) -> TickOutcome {
        let mut best: Option<(Point, u64)> = None;
        for candidate in self.position.cardinal_neighbors() {
            if !env.is_free(candidate) {
                continue;
            }
            let distance = candidate.manhattan_distance(&goal);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((candidate, distance));
            }
        }

        match best {
            Some((next, _)) if self.move_to(env, next) => {
                self.state = AgentState::Navigating;
                TickOutcome::Moved(next)
            }
            _ => {
                if self.state != AgentState::Blocked {
                    tracing::debug!("Agent {} blocked at {}", self.id, self.position);
                }
                self.state = AgentState::Blocked;
                TickOutcome::Blocked
            }
        }
    }

    fn move_to(&mut self, env: &Environment, next: Point) -> bool {
        if !env.update_robot_position(next) {
            return false;
        }
        self.position = next;
        self.cells_traveled += 1;
        true
    }

    fn discard_plan(&mut self) {
        self.planned_path.clear();
        self.path_index = 0;
    }
}
