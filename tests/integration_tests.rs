use gridfleet::adapters::outbound::init_noop_logger;
use gridfleet::domains::task::{TaskPriority, TaskStatus};
use gridfleet::{AgentState, Config, FleetKernel, Point};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn fast_config(seed: u64) -> Config {
    let mut config = Config::default();
    config.grid.width = 20;
    config.grid.height = 20;
    config.grid.initial_obstacle_percentage = 0;
    config.grid.seed = Some(seed);
    config.simulation.fleet_tick_ms = 5;
    config.simulation.agent_tick_ms = 5;
    config
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_running_fleet_completes_dispatched_task() {
    let kernel = FleetKernel::new(fast_config(1), init_noop_logger());
    let agent = kernel.add_agent(Some(Point::new(3, 3))).unwrap();
    let task = kernel
        .create_task(vec![Point::new(10, 10)], TaskPriority::High)
        .unwrap();

    assert_eq!(kernel.step(), 1);
    kernel.start().unwrap();
    assert!(kernel.is_running());

    let completed = wait_until(Duration::from_secs(5), || {
        kernel.scheduler().task(task).unwrap().status() == TaskStatus::Completed
    });
    assert!(completed);
    assert_eq!(kernel.registry().agent_info(agent).unwrap().current_task_id, None);

    kernel.shutdown();
    assert!(!kernel.is_running());
    assert_eq!(kernel.registry().live_status(agent).unwrap().1, AgentState::Shutdown);
}

#[test]
fn test_agents_converge_on_global_goal() {
    let kernel = FleetKernel::new(fast_config(2), init_noop_logger());
    kernel.set_global_goal(Point::new(15, 15));
    let ids = [
        kernel.add_agent(Some(Point::new(2, 2))).unwrap(),
        kernel.add_agent(Some(Point::new(2, 16))).unwrap(),
    ];
    kernel.start().unwrap();

    let arrived = wait_until(Duration::from_secs(5), || {
        ids.iter().all(|id| {
            kernel.registry().live_status(*id)
                == Some((Point::new(15, 15), AgentState::ReachedGoal))
        })
    });
    assert!(arrived);

    let refreshed = wait_until(Duration::from_secs(2), || kernel.statistics().robots_idle == 2);
    assert!(refreshed);
    let stats = kernel.statistics();
    assert_eq!(stats.total_robots, 2);
    assert!(stats.cells_traveled >= 26 + 14);
    kernel.shutdown();
}

#[test]
fn test_pause_freezes_registry_view() {
    let kernel = FleetKernel::new(fast_config(3), init_noop_logger());
    kernel.set_global_goal(Point::new(15, 15));
    let agent = kernel.add_agent(Some(Point::new(3, 3))).unwrap();

    kernel.start().unwrap();
    kernel.pause();
    assert!(kernel.is_paused());

    // Agents keep moving on their own threads while the fleet tick is paused.
    let arrived = wait_until(Duration::from_secs(5), || {
        kernel.registry().live_status(agent).map(|(_, s)| s) == Some(AgentState::ReachedGoal)
    });
    assert!(arrived);
    thread::sleep(Duration::from_millis(50));
    assert_ne!(
        kernel.registry().agent_info(agent).unwrap().current_state,
        AgentState::ReachedGoal
    );

    kernel.resume();
    let refreshed = wait_until(Duration::from_secs(2), || {
        kernel.registry().agent_info(agent).unwrap().current_state == AgentState::ReachedGoal
    });
    assert!(refreshed);
    kernel.shutdown();
}

#[test]
fn test_reset_fails_tasks_in_flight() {
    let kernel = FleetKernel::new(fast_config(4), init_noop_logger());
    let agent = kernel.add_agent(Some(Point::new(2, 2))).unwrap();
    let task = kernel
        .create_task(vec![Point::new(17, 17)], TaskPriority::Normal)
        .unwrap();
    kernel.step();
    kernel.start().unwrap();
    kernel.pause();
    thread::sleep(Duration::from_millis(30));

    kernel.reset();
    assert_eq!(kernel.scheduler().task(task).unwrap().status(), TaskStatus::Failed);
    let info = kernel.registry().agent_info(agent).unwrap();
    assert_eq!(info.current_task_id, None);
    assert_eq!(info.cells_traveled, 0);
    let (_, state) = kernel.registry().live_status(agent).unwrap();
    assert!(matches!(state, AgentState::Navigating | AgentState::ReachedGoal));
    kernel.shutdown();
}

#[test]
fn test_concurrent_callers_and_clean_shutdown() {
    let kernel = Arc::new(FleetKernel::new(fast_config(5), init_noop_logger()));
    for _ in 0..3 {
        kernel.add_agent(None).unwrap();
    }
    kernel.start().unwrap();

    let workers: Vec<_> = (0..4)
        .map(|n| {
            let kernel = Arc::clone(&kernel);
            thread::spawn(move || {
                for i in 0..25 {
                    let p = Point::new(2 + (n * 3 + i) % 15, 2 + (i * 7) % 15);
                    kernel.toggle_obstacle(p);
                    if i % 10 == 0 {
                        kernel.add_agent(None).unwrap();
                    }
                    let world = kernel.world_state();
                    assert_eq!(world.cells.len(), 20);
                    let _ = kernel.statistics();
                    thread::sleep(Duration::from_millis(1));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(kernel.registry().len(), 3 + 4 * 3);
    kernel.shutdown();
    assert!(kernel
        .registry()
        .snapshots()
        .iter()
        .all(|r| r.state == AgentState::Shutdown));
}

#[tokio::test]
async fn test_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    tokio::fs::write(
        &path,
        r#"
[grid]
width = 30
height = 24
max_obstacles = 200
initial_obstacle_percentage = 15
seed = 9

[simulation]
fleet_tick_ms = 40
agent_tick_ms = 60
stats_interval_secs = 2

[fleet]
initial_agents = 4
spawn_attempts = 20
spawn_margin = 3

[storage]
state_file = "fleet.bin"
"#,
    )
    .await
    .unwrap();

    let config = Config::from_file(&path).await.unwrap();
    assert_eq!((config.grid.width, config.grid.height), (30, 24));
    assert_eq!(config.grid.seed, Some(9));
    assert_eq!(config.fleet.initial_agents, 4);
    assert_eq!(config.logging.file, None);
    assert_eq!(config.storage.state_file.as_deref(), Some("fleet.bin"));
}

#[tokio::test]
async fn test_config_rejects_bad_percentage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    let mut config = Config::default();
    config.grid.initial_obstacle_percentage = 140;
    tokio::fs::write(&path, toml::to_string(&config).unwrap())
        .await
        .unwrap();

    assert!(Config::from_file(&path).await.is_err());
    assert!(Config::from_file(dir.path().join("missing.toml")).await.is_err());
}
