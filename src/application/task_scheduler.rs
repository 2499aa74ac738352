use super::fleet_registry::FleetRegistry;
use crate::common::sync::lock;
use crate::common::{AgentId, DomainError, DomainResult, Point, TaskId};
use crate::domains::agent::AgentState;
use crate::domains::logger::DynLogger;
use crate::domains::task::{PendingQueue, Task, TaskPriority, TaskStatus};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Prices an agent for a task. `None` means the agent cannot serve it.
pub trait CostModel: Send + Sync {
    fn cost(&self, agent_id: AgentId, position: Point, task: &Task) -> Option<u64>;
}

/// Manhattan distance from the agent to the task's first waypoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManhattanCost;

impl CostModel for ManhattanCost {
    fn cost(&self, _agent_id: AgentId, position: Point, task: &Task) -> Option<u64> {
        Some(position.manhattan_distance(&task.first_waypoint()))
    }
}

struct TaskTable {
    tasks: BTreeMap<TaskId, Task>,
    queue: PendingQueue,
    next_id: TaskId,
}

/// Owns every task, dispatches pending ones to the cheapest available agent
/// and tracks progress of the assigned ones.
pub struct TaskScheduler {
    registry: Arc<FleetRegistry>,
    table: Mutex<TaskTable>,
    cost_model: Box<dyn CostModel>,
    logger: DynLogger,
}

impl TaskScheduler {
    pub fn new(registry: Arc<FleetRegistry>, logger: DynLogger) -> Self {
        Self::with_cost_model(registry, Box::new(ManhattanCost), logger)
    }

    pub fn with_cost_model(
        registry: Arc<FleetRegistry>,
        cost_model: Box<dyn CostModel>,
        logger: DynLogger,
    ) -> Self {
        Self {
            registry,
            table: Mutex::new(TaskTable {
                tasks: BTreeMap::new(),
                queue: PendingQueue::new(),
                next_id: 1,
            }),
            cost_model,
            logger,
        }
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.registry
    }

    /// Queues a task. Every waypoint must lie inside the grid.
    pub fn create_task(
        &self,
        waypoints: Vec<Point>,
        priority: TaskPriority,
    ) -> DomainResult<TaskId> {
        let env = self.registry.environment();
        if let Some(outside) = waypoints.iter().find(|p| !env.in_bounds(**p)) {
            return Err(DomainError::InvalidCommand {
                reason: format!("waypoint {} is outside the grid", outside),
            });
        }
        let mut table = lock(&self.table);
        let id = table.next_id;
        let task = Task::new(id, waypoints, priority)?;
        table.next_id += 1;
        table.queue.push(id, priority);
        self.logger.info(&format!(
            "Task {} created with {} waypoints ({:?})",
            id,
            task.waypoints().len(),
            priority
        ));
        table.tasks.insert(id, task);
        Ok(id)
    }

    /// Cancels a pending or assigned task and releases its agent.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let mut table = lock(&self.table);
        let Some(task) = table.tasks.get_mut(&id) else {
            return false;
        };
        let agent = task.assigned_agent_id();
        if task.cancel().is_err() {
            return false;
        }
        if let Some(agent_id) = agent {
            self.registry.unassign(agent_id);
        }
        self.logger.info(&format!("Task {} cancelled", id));
        true
    }

    /// One dispatch pass. Tasks are taken in queue order and the pass stops at
    /// the first task no agent can take, even if later tasks could be served.
    /// Returns the number of assignments made.
    pub fn dispatch(&self) -> usize {
        let mut guard = lock(&self.table);
        let table = &mut *guard;
        let mut assigned = 0;

        while let Some(entry) = table.queue.peek() {
            let Some(task) = table.tasks.get_mut(&entry.task_id) else {
                table.queue.pop();
                continue;
            };
            if task.status() != TaskStatus::Pending {
                table.queue.pop();
                continue;
            }

            let Some(agent_id) = self.cheapest_agent(task) else {
                break;
            };
            if !self.registry.assign(agent_id, task) {
                break;
            }
            table.queue.pop();
            assigned += 1;
        }
        assigned
    }

    fn cheapest_agent(&self, task: &Task) -> Option<AgentId> {
        self.registry
            .available_candidates()
            .into_iter()
            .filter_map(|(id, position)| {
                self.cost_model
                    .cost(id, position, task)
                    .map(|cost| (cost, id))
            })
            .min()
            .map(|(_, id)| id)
    }

    /// Advances, completes or fails every active task based on where its agent
    /// is right now.
    pub fn update(&self) {
        let mut table = lock(&self.table);
        for task in table.tasks.values_mut() {
            if !task.is_active() {
                continue;
            }
            let Some(agent_id) = task.assigned_agent_id() else {
                continue;
            };
            let Some((position, state)) = self.registry.live_status(agent_id) else {
                if task.fail().is_ok() {
                    self.logger.warn(&format!(
                        "Task {} failed: agent {} no longer exists",
                        task.id(),
                        agent_id
                    ));
                }
                continue;
            };

            if position == task.current_waypoint() {
                if task.advance_waypoint() {
                    let next = task.current_waypoint();
                    if !self.registry.steer(agent_id, next) && task.fail().is_ok() {
                        self.registry.mark_task_failed(agent_id);
                        self.logger.warn(&format!(
                            "Task {} failed: agent {} cannot be steered to {}",
                            task.id(),
                            agent_id,
                            next
                        ));
                        continue;
                    }
                } else if task.complete().is_ok() {
                    self.registry.unassign(agent_id);
                    self.logger.info(&format!(
                        "Task {} completed by agent {}",
                        task.id(),
                        agent_id
                    ));
                    continue;
                }
            }

            if state == AgentState::Blocked && task.fail().is_ok() {
                self.registry.mark_task_failed(agent_id);
                self.logger.warn(&format!(
                    "Task {} failed: agent {} is blocked at {}",
                    task.id(),
                    agent_id,
                    position
                ));
            }
        }
    }

    /// Fails every task in flight and releases its agent. Returns the count.
    pub fn fail_active_tasks(&self) -> usize {
        let mut table = lock(&self.table);
        let mut failed = 0;
        for task in table.tasks.values_mut() {
            let agent = task.assigned_agent_id();
            if task.is_active() && task.fail().is_ok() {
                failed += 1;
                if let Some(agent_id) = agent {
                    self.registry.mark_task_failed(agent_id);
                }
            }
        }
        failed
    }

    pub fn task(&self, id: TaskId) -> DomainResult<Task> {
        lock(&self.table)
            .tasks
            .get(&id)
            .cloned()
            .ok_or(DomainError::TaskNotFound { id })
    }

    pub fn tasks(&self) -> Vec<Task> {
        lock(&self.table).tasks.values().cloned().collect()
    }

    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        lock(&self.table)
            .tasks
            .values()
            .filter(|t| t.status() == status)
            .cloned()
            .collect()
    }

    fn count(&self, pred: impl Fn(&Task) -> bool) -> usize {
        lock(&self.table).tasks.values().filter(|t| pred(*t)).count()
    }

    pub fn pending_count(&self) -> usize {
        self.count(|t| t.status() == TaskStatus::Pending)
    }

    pub fn active_count(&self) -> usize {
        self.count(Task::is_active)
    }

    pub fn completed_count(&self) -> usize {
        self.count(|t| t.status() == TaskStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(|t| t.status() == TaskStatus::Failed)
    }

    /// Mean seconds from assignment to completion over completed tasks.
    pub fn average_completion_time(&self) -> f64 {
        let table = lock(&self.table);
        let times: Vec<f64> = table
            .tasks
            .values()
            .filter_map(Task::completion_seconds)
            .collect();
        if times.is_empty() {
            0.0
        } else {
            times.iter().sum::<f64>() / times.len() as f64
        }
    }

    /// Completed over completed plus failed, in percent. 100 with no terminal tasks.
    pub fn success_rate(&self) -> f64 {
        let table = lock(&self.table);
        let (mut completed, mut failed) = (0usize, 0usize);
        for task in table.tasks.values() {
            match task.status() {
                TaskStatus::Completed => completed += 1,
                TaskStatus::Failed => failed += 1,
                _ => {}
            }
        }
        let total = completed + failed;
        if total == 0 {
            100.0
        } else {
            completed as f64 / total as f64 * 100.0
        }
    }

    /// Replaces the task table. Pending tasks are queued again.
    pub fn restore(&self, tasks: Vec<Task>) {
        let mut table = lock(&self.table);
        table.queue.clear();
        table.tasks.clear();
        let mut max_id = 0;
        for task in tasks {
            max_id = max_id.max(task.id());
            if task.status() == TaskStatus::Pending {
                table.queue.push(task.id(), task.priority());
            }
            table.tasks.insert(task.id(), task);
        }
        table.next_id = max_id + 1;
        self.logger.info(&format!("Task table restored with {} tasks", table.tasks.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbound::init_noop_logger;
    use crate::domains::environment::Environment;
    use std::time::Duration;

    fn scheduler() -> TaskScheduler {
        let env = Environment::with_options(20, 20, 1000, Some(8));
        env.set_goal(Point::new(18, 18));
        let registry =
            FleetRegistry::new(Arc::new(env), Duration::from_millis(5), init_noop_logger());
        TaskScheduler::new(Arc::new(registry), init_noop_logger())
    }

    #[test]
    fn rejects_empty_waypoints() {
        let s = scheduler();
        assert!(matches!(
            s.create_task(Vec::new(), TaskPriority::High),
            Err(DomainError::InvalidCommand { .. })
        ));
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn rejects_waypoints_outside_the_grid() {
        let s = scheduler();
        s.registry().add_agent(Point::new(2, 2));
        for bad in [Point::new(i32::MIN, 0), Point::new(20, 5), Point::new(3, -1)] {
            assert!(matches!(
                s.create_task(vec![Point::new(4, 4), bad], TaskPriority::Normal),
                Err(DomainError::InvalidCommand { .. })
            ));
        }
        assert!(s.tasks().is_empty());
        assert_eq!(s.dispatch(), 0);

        let id = s.create_task(vec![Point::new(19, 19)], TaskPriority::Normal).unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn dispatch_picks_cheapest_then_lowest_id() {
        let s = scheduler();
        let far = s.registry().add_agent(Point::new(9, 9));
        let near_a = s.registry().add_agent(Point::new(2, 3));
        let near_b = s.registry().add_agent(Point::new(3, 2));
        let task = s.create_task(vec![Point::new(2, 2)], TaskPriority::Normal).unwrap();

        assert_eq!(s.dispatch(), 1);
        assert_eq!(s.task(task).unwrap().assigned_agent_id(), Some(near_a));
        assert!(s.registry().is_available(near_b));
        assert!(s.registry().is_available(far));
    }

    #[test]
    fn higher_priority_dispatches_first() {
        let s = scheduler();
        s.registry().add_agent(Point::new(2, 2));
        let low = s.create_task(vec![Point::new(4, 4)], TaskPriority::Low).unwrap();
        let urgent = s.create_task(vec![Point::new(8, 8)], TaskPriority::Urgent).unwrap();
        assert_eq!(s.dispatch(), 1);
        assert_eq!(s.task(urgent).unwrap().status(), TaskStatus::Assigned);
        assert_eq!(s.task(low).unwrap().status(), TaskStatus::Pending);
    }

    #[test]
    fn cancelled_entries_are_skipped() {
        let s = scheduler();
        let agent = s.registry().add_agent(Point::new(2, 2));
        let first = s.create_task(vec![Point::new(4, 4)], TaskPriority::High).unwrap();
        let second = s.create_task(vec![Point::new(5, 5)], TaskPriority::Low).unwrap();
        assert!(s.cancel_task(first));
        assert!(!s.cancel_task(first));
        assert_eq!(s.dispatch(), 1);
        assert_eq!(s.task(second).unwrap().assigned_agent_id(), Some(agent));
    }

    #[test]
    fn cancel_assigned_releases_agent() {
        let s = scheduler();
        let agent = s.registry().add_agent(Point::new(2, 2));
        let id = s.create_task(vec![Point::new(4, 4)], TaskPriority::Normal).unwrap();
        s.dispatch();
        assert!(s.cancel_task(id));
        assert_eq!(s.registry().agent_info(agent).unwrap().current_task_id, None);
        assert_eq!(s.task(id).unwrap().status(), TaskStatus::Cancelled);
    }

    #[test]
    fn multi_waypoint_task_is_steered_then_completed() {
        let s = scheduler();
        let agent = s.registry().add_agent(Point::new(2, 2));
        let id = s
            .create_task(vec![Point::new(2, 2), Point::new(2, 4)], TaskPriority::Normal)
            .unwrap();
        s.dispatch();
        s.update();
        let task = s.task(id).unwrap();
        assert_eq!(task.current_waypoint(), Point::new(2, 4));
        assert_eq!(task.status(), TaskStatus::Assigned);
        assert_eq!(s.registry().agent_info(agent).unwrap().current_goal, Point::new(2, 4));
        assert_eq!(s.completed_count(), 0);
        assert_eq!(s.active_count(), 1);
    }

    #[test]
    fn vanished_agent_fails_task() {
        let s = scheduler();
        let agent = s.registry().add_agent(Point::new(2, 2));
        let id = s.create_task(vec![Point::new(7, 7)], TaskPriority::Normal).unwrap();
        s.dispatch();
        s.registry().remove_agent(agent);
        s.update();
        assert_eq!(s.task(id).unwrap().status(), TaskStatus::Failed);
        assert_eq!(s.success_rate(), 0.0);
    }

    #[test]
    fn metrics_without_terminal_tasks() {
        let s = scheduler();
        assert_eq!(s.success_rate(), 100.0);
        assert_eq!(s.average_completion_time(), 0.0);
    }

    #[test]
    fn restore_requeues_pending_tasks() {
        let s = scheduler();
        s.registry().add_agent(Point::new(2, 2));
        s.restore(vec![
            Task::restored(5, Point::new(3, 3), TaskPriority::High, TaskStatus::Pending),
            Task::restored(7, Point::new(4, 4), TaskPriority::Low, TaskStatus::Completed),
        ]);
        assert_eq!(s.pending_count(), 1);
        assert_eq!(s.dispatch(), 1);
        assert_eq!(s.task(5).unwrap().status(), TaskStatus::Assigned);
        assert_eq!(s.create_task(vec![Point::new(1, 1)], TaskPriority::Low).unwrap(), 8);
    }
}
