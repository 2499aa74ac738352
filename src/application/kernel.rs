use super::fleet_registry::{AgentInfo, FleetRegistry};
use super::task_scheduler::{CostModel, ManhattanCost, TaskScheduler};
use crate::adapters::outbound::storage::{FileStateStore, SavedState, StateStore, TaskRecord};
use crate::common::sync::lock;
use crate::common::{
    AgentId, ApplicationResult, DomainError, DomainResult, Point, StorageError, StorageResult,
    TaskId,
};
use crate::config::Config;
use crate::domains::agent::AgentState;
use crate::domains::environment::{CellType, Environment};
use crate::domains::logger::DynLogger;
use crate::domains::task::{Task, TaskPriority};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const SPAWN_FALLBACK: Point = Point::new(5, 5);
const SLEEP_SLICE: Duration = Duration::from_millis(20);
/// Task count field of the state file is a `u16`.
const MAX_SAVED_TASKS: usize = u16::MAX as usize;

/// Everything a control surface needs to draw the world.
#[derive(Debug, Clone, Serialize)]
pub struct WorldState {
    pub width: i32,
    pub height: i32,
    pub cells: Vec<Vec<CellType>>,
    pub goal: Point,
    pub agents: Vec<AgentInfo>,
    pub paused: bool,
    pub running: bool,
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FleetStatistics {
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub cells_traveled: u64,
    pub total_distance: f64,
    pub robots_active: usize,
    pub robots_idle: usize,
    pub total_robots: usize,
    /// Completed over completed plus failed trips, in percent; 0 with none.
    pub efficiency: f64,
    pub uptime_secs: u64,
    pub average_completion_time: f64,
    pub success_rate: f64,
    pub pending_tasks: usize,
    pub active_tasks: usize,
}

/// Composition root of the fleet: owns the environment, the registry and the
/// scheduler, and drives the fleet tick on its own thread.
pub struct FleetKernel {
    config: Config,
    env: Arc<Environment>,
    registry: Arc<FleetRegistry>,
    scheduler: Arc<TaskScheduler>,
    logger: DynLogger,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    tick_ms: Arc<AtomicU64>,
    started_at: Instant,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl FleetKernel {
    pub fn new(config: Config, logger: DynLogger) -> Self {
        Self::with_cost_model(config, Box::new(ManhattanCost), logger)
    }

    pub fn with_cost_model(
        config: Config,
        cost_model: Box<dyn CostModel>,
        logger: DynLogger,
    ) -> Self {
        let env = Arc::new(Environment::from_config(&config.grid));
        let placed = env.generate_random_obstacles(config.grid.initial_obstacle_percentage);
        let registry = Arc::new(FleetRegistry::new(
            Arc::clone(&env),
            Duration::from_millis(config.simulation.agent_tick_ms),
            Arc::clone(&logger),
        ));
        let scheduler = Arc::new(TaskScheduler::with_cost_model(
            Arc::clone(&registry),
            cost_model,
            Arc::clone(&logger),
        ));
        logger.info(&format!(
            "Kernel initialised: {}x{} grid, {} obstacles, goal at {}",
            env.width(),
            env.height(),
            placed,
            env.goal()
        ));

        Self {
            tick_ms: Arc::new(AtomicU64::new(config.simulation.fleet_tick_ms.max(1))),
            config,
            env,
            registry,
            scheduler,
            logger,
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
            driver: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the environment unit, every active agent and the driver thread.
    pub fn start(&self) -> DomainResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.env.start();
        let agents = self.registry.start_all();

        let running = Arc::clone(&self.running);
        let paused = Arc::clone(&self.paused);
        let tick_ms = Arc::clone(&self.tick_ms);
        let registry = Arc::clone(&self.registry);
        let scheduler = Arc::clone(&self.scheduler);

        let spawned = thread::Builder::new()
            .name("fleet-driver".into())
            .spawn(move || {
                tracing::debug!("Fleet driver started");
                while running.load(Ordering::SeqCst) {
                    if !paused.load(Ordering::SeqCst) {
                        Self::drive(&registry, &scheduler);
                    }
                    let interval = Duration::from_millis(tick_ms.load(Ordering::SeqCst));
                    let deadline = Instant::now() + interval;
                    while running.load(Ordering::SeqCst) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        thread::sleep(SLEEP_SLICE.min(deadline - now));
                    }
                }
                tracing::debug!("Fleet driver finished");
            });

        match spawned {
            Ok(handle) => {
                *lock(&self.driver) = Some(handle);
                self.logger.info(&format!("Kernel started with {} running agents", agents));
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.registry.stop_all();
                self.env.stop();
                Err(DomainError::InfrastructureError(format!(
                    "failed to spawn fleet driver: {}",
                    e
                )))
            }
        }
    }

    /// Joins the driver, then stops every agent and the environment unit.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = lock(&self.driver).take() {
            if handle.join().is_err() {
                tracing::error!("Fleet driver thread panicked");
            }
        }
        self.registry.stop_all();
        self.env.stop();
        self.logger.info("Kernel stopped");
    }

    /// One fleet tick on the caller's thread: refresh, progress, dispatch.
    pub fn step(&self) -> usize {
        Self::drive(&self.registry, &self.scheduler)
    }

    fn drive(registry: &FleetRegistry, scheduler: &TaskScheduler) -> usize {
        registry.refresh();
        scheduler.update();
        scheduler.dispatch()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_tick_interval(&self, ms: u64) {
        self.tick_ms.store(ms.max(1), Ordering::SeqCst);
    }

    pub fn tick_interval(&self) -> u64 {
        self.tick_ms.load(Ordering::SeqCst)
    }

    /// Applies to agents created afterwards.
    pub fn set_agent_tick_interval(&self, ms: u64) {
        self.registry.set_agent_tick_interval(Duration::from_millis(ms.max(1)));
    }

    /// Adds an agent at `at`, or at a random free cell away from the edges when
    /// omitted. An explicit home must be a free cell. The agent starts
    /// immediately if the kernel is running.
    pub fn add_agent(&self, at: Option<Point>) -> DomainResult<AgentId> {
        let home = match at {
            Some(p) if !self.env.is_free(p) => {
                return Err(DomainError::InvalidCommand {
                    reason: format!("agent home {} is not a free cell", p),
                });
            }
            Some(p) => p,
            None => self
                .env
                .random_free_cell(self.config.fleet.spawn_attempts, self.config.fleet.spawn_margin)
                .unwrap_or(SPAWN_FALLBACK),
        };
        let id = self.registry.add_agent(home);
        if self.is_running() {
            self.registry.start_agent(id)?;
        }
        Ok(id)
    }

    pub fn remove_agent(&self, id: AgentId) -> bool {
        self.registry.remove_agent(id)
    }

    pub fn set_global_goal(&self, goal: Point) -> bool {
        let moved = self.env.set_goal(goal);
        if moved {
            self.logger.info(&format!("Global goal moved to {}", goal));
        }
        moved
    }

    pub fn set_agent_goal(&self, id: AgentId, goal: Point) -> bool {
        self.registry.set_goal(id, goal)
    }

    pub fn clear_personal_goals(&self) {
        self.registry.clear_all_personal_goals();
    }

    pub fn toggle_obstacle(&self, p: Point) -> bool {
        self.env.toggle_obstacle(p)
    }

    pub fn clear_obstacles(&self) {
        self.env.clear_all_obstacles();
    }

    pub fn randomize_obstacles(&self, percentage: u32) -> usize {
        self.env.generate_random_obstacles(percentage)
    }

    /// Fails every task in flight, then regenerates obstacles and repositions
    /// every agent.
    pub fn reset(&self) {
        let abandoned = self.scheduler.fail_active_tasks();
        self.registry.reset_all(self.config.grid.initial_obstacle_percentage);
        if abandoned > 0 {
            self.logger.warn(&format!("Reset abandoned {} active tasks", abandoned));
        }
    }

    pub fn create_task(
        &self,
        waypoints: Vec<Point>,
        priority: TaskPriority,
    ) -> DomainResult<TaskId> {
        self.scheduler.create_task(waypoints, priority)
    }

    pub fn cancel_task(&self, id: TaskId) -> bool {
        self.scheduler.cancel_task(id)
    }

    pub fn world_state(&self) -> WorldState {
        let grid = self.env.snapshot();
        WorldState {
            width: grid.width(),
            height: grid.height(),
            cells: grid.rows(),
            goal: self.env.goal(),
            agents: self.registry.agents(),
            paused: self.is_paused(),
            running: self.is_running(),
            tick_interval_ms: self.tick_interval(),
        }
    }

    pub fn statistics(&self) -> FleetStatistics {
        let agents = self.registry.agents();
        let mut stats = FleetStatistics {
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            cells_traveled: 0,
            total_distance: 0.0,
            robots_active: 0,
            robots_idle: 0,
            total_robots: agents.len(),
            efficiency: 0.0,
            uptime_secs: self.started_at.elapsed().as_secs(),
            average_completion_time: self.scheduler.average_completion_time(),
            success_rate: self.scheduler.success_rate(),
            pending_tasks: self.scheduler.pending_count(),
            active_tasks: self.scheduler.active_count(),
        };
        for info in &agents {
            match info.current_state {
                AgentState::Navigating => stats.robots_active += 1,
                AgentState::Idle | AgentState::ReachedGoal => stats.robots_idle += 1,
                _ => {}
            }
            stats.completed_tasks += info.tasks_completed;
            stats.failed_tasks += info.tasks_failed;
            stats.cells_traveled += info.cells_traveled;
            stats.total_distance += info.total_distance_traveled;
        }
        stats.total_tasks = stats.completed_tasks + stats.failed_tasks;
        if stats.total_tasks > 0 {
            stats.efficiency =
                f64::from(stats.completed_tasks) / f64::from(stats.total_tasks) * 100.0;
        }
        stats
    }

    /// Oldest finished tasks are left out when the table would not fit in a
    /// state file. Open tasks are always kept.
    pub fn capture_state(&self) -> SavedState {
        let tasks = self.scheduler.tasks();
        let total = tasks.len();
        let tasks = saveable_tasks(tasks, MAX_SAVED_TASKS);
        if tasks.len() < total {
            self.logger.warn(&format!(
                "State file leaves out {} finished tasks",
                total - tasks.len()
            ));
        }
        SavedState {
            timestamp: u64::try_from(Utc::now().timestamp()).unwrap_or(0),
            width: self.env.width(),
            height: self.env.height(),
            obstacles: self.env.obstacles(),
            agents: self.registry.snapshots(),
            tasks: tasks.iter().map(TaskRecord::from_task).collect(),
        }
    }

    pub fn save_state<P: AsRef<Path>>(&self, path: P) -> ApplicationResult<()> {
        self.save_state_to(&FileStateStore::new(path))
    }

    pub fn save_state_to(&self, store: &dyn StateStore) -> ApplicationResult<()> {
        let state = self.capture_state();
        store.save(&state)?;
        self.logger.info(&format!(
            "State saved: {} agents, {} tasks, {} obstacle cells",
            state.agents.len(),
            state.tasks.len(),
            state.obstacles.len()
        ));
        Ok(())
    }

    pub fn load_state<P: AsRef<Path>>(&self, path: P) -> ApplicationResult<()> {
        self.load_state_from(&FileStateStore::new(path))
    }

    /// Decodes and validates the whole file before touching live state.
    /// Restored agents are idle and not started.
    pub fn load_state_from(&self, store: &dyn StateStore) -> ApplicationResult<()> {
        let state = store.load()?;
        self.validate(&state)?;

        self.env.replace_obstacles(&state.obstacles);
        self.registry.restore(&state.agents);
        self.scheduler
            .restore(state.tasks.iter().map(|t| t.into_task()).collect());
        self.logger.info(&format!(
            "State loaded: {} agents, {} tasks",
            state.agents.len(),
            state.tasks.len()
        ));
        Ok(())
    }

    fn validate(&self, state: &SavedState) -> StorageResult<()> {
        if state.width != self.env.width() || state.height != self.env.height() {
            return Err(StorageError::GridMismatch {
                file_width: state.width,
                file_height: state.height,
                width: self.env.width(),
                height: self.env.height(),
            });
        }
        let mut ids = BTreeSet::new();
        for agent in &state.agents {
            if !ids.insert(agent.id) {
                return Err(StorageError::InvalidRecord(format!(
                    "duplicate agent id {}",
                    agent.id
                )));
            }
            if !self.env.in_bounds(agent.position) {
                return Err(StorageError::InvalidRecord(format!(
                    "agent {} outside the grid at {}",
                    agent.id, agent.position
                )));
            }
        }
        let mut task_ids = BTreeSet::new();
        for task in &state.tasks {
            if !task_ids.insert(task.id) {
                return Err(StorageError::InvalidRecord(format!(
                    "duplicate task id {}",
                    task.id
                )));
            }
            if !self.env.in_bounds(task.target) {
                return Err(StorageError::InvalidRecord(format!(
                    "task {} targets {} outside the grid",
                    task.id, task.target
                )));
            }
        }
        Ok(())
    }
}

/// `tasks` is in id order. Drops terminal tasks from the front until at most
/// `cap` remain.
fn saveable_tasks(tasks: Vec<Task>, cap: usize) -> Vec<Task> {
    let mut excess = tasks.len().saturating_sub(cap);
    if excess == 0 {
        return tasks;
    }
    tasks
        .into_iter()
        .filter(|task| {
            if excess > 0 && task.status().is_terminal() {
                excess -= 1;
                false
            } else {
                true
            }
        })
        .collect()
}

impl Drop for FleetKernel {
    fn drop(&mut self) {
        self.shutdown();
    }
}
