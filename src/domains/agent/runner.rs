use super::aggregate::{Agent, AgentSnapshot, AgentState, TickOutcome};
use crate::common::sync::lock;
use crate::common::{AgentId, DomainError, DomainResult, Point};
use crate::domains::environment::Environment;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Owns one agent and the thread that ticks it.
pub struct AgentHandle {
    id: AgentId,
    agent: Arc<Mutex<Agent>>,
    env: Arc<Environment>,
    tick_interval: Duration,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AgentHandle {
    pub fn new(agent: Agent, env: Arc<Environment>, tick_interval: Duration) -> Self {
        Self {
            id: agent.id(),
            agent: Arc::new(Mutex::new(agent)),
            env,
            tick_interval,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Switches the agent to navigating and spawns its thread. Starting a running
    /// agent does nothing.
    pub fn start(&mut self) -> DomainResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        lock(&self.agent).set_state(AgentState::Navigating);

        let agent = Arc::clone(&self.agent);
        let env = Arc::clone(&self.env);
        let running = Arc::clone(&self.running);
        let interval = self.tick_interval;
        let id = self.id;

        let spawned = thread::Builder::new()
            .name(format!("agent-{}", id))
            .spawn(move || {
                tracing::debug!("Agent {} navigation loop started", id);
                while running.load(Ordering::SeqCst) {
                    lock(&agent).tick(&env);
                    let deadline = Instant::now() + interval;
                    while running.load(Ordering::SeqCst) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        thread::sleep(SLEEP_SLICE.min(deadline - now));
                    }
                }
                tracing::debug!("Agent {} navigation loop finished", id);
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                lock(&self.agent).set_state(AgentState::Error);
                Err(DomainError::InfrastructureError(format!(
                    "failed to spawn thread for agent {}: {}",
                    id, e
                )))
            }
        }
    }

    /// Clears the running flag without waiting. The returned [`PendingStop`]
    /// finishes the job and can be waited on after the caller drops its locks.
    /// `None` when the agent was not running.
    pub fn signal_stop(&mut self) -> Option<PendingStop> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return None;
        }
        Some(PendingStop {
            id: self.id,
            agent: Arc::clone(&self.agent),
            running: Arc::clone(&self.running),
            worker: self.worker.take(),
        })
    }

    /// Signals the thread, waits for it to exit and marks the agent shut down.
    /// Stopping an agent that is not running does nothing.
    pub fn stop(&mut self) {
        if let Some(pending) = self.signal_stop() {
            pending.wait();
        }
    }

    /// Runs one tick on the caller's thread.
    pub fn tick_once(&self) -> TickOutcome {
        lock(&self.agent).tick(&self.env)
    }

    pub fn with_agent<R>(&self, f: impl FnOnce(&mut Agent) -> R) -> R {
        f(&mut lock(&self.agent))
    }

    pub fn position(&self) -> Point {
        lock(&self.agent).position()
    }

    pub fn state(&self) -> AgentState {
        lock(&self.agent).state()
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let agent = lock(&self.agent);
        agent.snapshot(self.env.goal())
    }
}

/// An agent thread that has been told to stop but not yet joined.
pub struct PendingStop {
    id: AgentId,
    agent: Arc<Mutex<Agent>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PendingStop {
    /// Joins the thread and marks the agent shut down, unless it was started
    /// again in the meantime.
    pub fn wait(self) {
        if let Some(worker) = self.worker {
            if worker.join().is_err() {
                tracing::error!("Agent {} thread panicked", self.id);
            }
        }
        if !self.running.load(Ordering::SeqCst) {
            lock(&self.agent).set_state(AgentState::Shutdown);
        }
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Arc<Environment> {
        let env = Environment::with_options(15, 15, 1000, Some(11));
        env.set_goal(Point::new(12, 12));
        Arc::new(env)
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let agent = Agent::new(1, Point::new(2, 2));
        let mut handle = AgentHandle::new(agent, env(), Duration::from_millis(5));
        handle.stop();
        assert_eq!(handle.state(), AgentState::Idle);

        handle.start().unwrap();
        handle.start().unwrap();
        assert!(handle.is_running());

        handle.stop();
        handle.stop();
        assert!(!handle.is_running());
        assert_eq!(handle.state(), AgentState::Shutdown);
    }

    #[test]
    fn running_agent_reaches_goal() {
        let agent = Agent::new(1, Point::new(2, 2));
        let mut handle = AgentHandle::new(agent, env(), Duration::from_millis(2));
        handle.start().unwrap();
        let mut reached = false;
        for _ in 0..200 {
            if handle.state() == AgentState::ReachedGoal {
                reached = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        handle.stop();
        assert!(reached);
        assert_eq!(handle.position(), Point::new(12, 12));
    }

    #[test]
    fn long_tick_does_not_delay_stop() {
        let agent = Agent::new(2, Point::new(2, 2));
        let mut handle = AgentHandle::new(agent, env(), Duration::from_secs(5));
        handle.start().unwrap();
        thread::sleep(Duration::from_millis(30));

        let pending = handle.signal_stop().unwrap();
        assert!(!handle.is_running());
        assert!(handle.signal_stop().is_none());
        let started = Instant::now();
        pending.wait();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(handle.state(), AgentState::Shutdown);
    }

    #[test]
    fn tick_once_drives_without_thread() {
        let agent = Agent::new(3, Point::new(2, 2));
        let handle = AgentHandle::new(agent, env(), Duration::from_millis(5));
        handle.with_agent(|a| a.set_personal_goal(Point::new(2, 4)));
        assert_eq!(handle.tick_once(), TickOutcome::Moved(Point::new(2, 3)));
        assert_eq!(handle.snapshot().current_goal, Point::new(2, 4));
    }
}
