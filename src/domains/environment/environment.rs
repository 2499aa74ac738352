use super::grid::{CellType, Grid};
use crate::common::sync::lock;
use crate::common::Point;
use crate::config::GridConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const BACKGROUND_PERIOD: Duration = Duration::from_millis(2000);
const BACKGROUND_POLL: Duration = Duration::from_millis(50);

struct EnvironmentState {
    grid: Grid,
    goal: Point,
    interior_obstacles: usize,
    rng: StdRng,
}

/// Shared grid world. Every read and write goes through one lock; no call
/// holds it across another call, so "check free then move" is not atomic.
pub struct Environment {
    width: i32,
    height: i32,
    max_obstacles: usize,
    state: Mutex<EnvironmentState>,
    running: Arc<AtomicBool>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl Environment {
    /// Empty interior, random goal, obstacle cap equal to the interior area.
    pub fn new(width: i32, height: i32) -> Self {
        let interior = ((width - 2).max(0) * (height - 2).max(0)) as usize;
        Self::with_options(width, height, interior, None)
    }

    pub fn from_config(config: &GridConfig) -> Self {
        Self::with_options(config.width, config.height, config.max_obstacles, config.seed)
    }

    pub fn with_options(width: i32, height: i32, max_obstacles: usize, seed: Option<u64>) -> Self {
        let grid = Grid::new(width, height);
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let goal = initial_goal(&grid, &mut rng);
        let mut state = EnvironmentState {
            grid,
            goal,
            interior_obstacles: 0,
            rng,
        };
        state.grid.set(goal, CellType::Goal);

        Self {
            width: state.grid.width(),
            height: state.grid.height(),
            max_obstacles,
            state: Mutex::new(state),
            running: Arc::new(AtomicBool::new(false)),
            background: Mutex::new(None),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn max_obstacles(&self) -> usize {
        self.max_obstacles
    }

    pub fn in_bounds(&self, p: Point) -> bool {
        p.x >= 0 && p.x < self.width && p.y >= 0 && p.y < self.height
    }

    /// Inside the grid and off the border ring.
    pub fn is_interior(&self, p: Point) -> bool {
        self.in_bounds(p) && lock(&self.state).grid.is_interior(p)
    }

    /// False for out-of-bounds and obstacle cells.
    pub fn is_free(&self, p: Point) -> bool {
        if !self.in_bounds(p) {
            return false;
        }
        lock(&self.state).grid.is_free(p)
    }

    /// Agents report moves here for bounds validation only. Agent occupancy is
    /// never written into the grid.
    pub fn update_robot_position(&self, p: Point) -> bool {
        self.in_bounds(p)
    }

    /// Flips an interior cell between empty and obstacle. Returns true only when
    /// an obstacle was added; border, goal and out-of-bounds cells are left alone,
    /// and so is an empty cell once the obstacle cap is reached.
    pub fn toggle_obstacle(&self, p: Point) -> bool {
        let mut state = lock(&self.state);
        if !state.grid.is_interior(p) {
            return false;
        }
        match state.grid.cell(p) {
            Some(CellType::Obstacle) => {
                state.grid.set(p, CellType::Empty);
                state.interior_obstacles = state.interior_obstacles.saturating_sub(1);
                false
            }
            Some(CellType::Empty) if state.interior_obstacles < self.max_obstacles => {
                state.grid.set(p, CellType::Obstacle);
                state.interior_obstacles += 1;
                true
            }
            _ => false,
        }
    }

    /// Moves the goal marker. Rejects border and out-of-bounds targets; an
    /// obstacle under the new goal is removed.
    pub fn set_goal(&self, p: Point) -> bool {
        let mut state = lock(&self.state);
        if !state.grid.is_interior(p) {
            return false;
        }
        let old = state.goal;
        if state.grid.cell(old) == Some(CellType::Goal) {
            state.grid.set(old, CellType::Empty);
        }
        if state.grid.cell(p) == Some(CellType::Obstacle) {
            state.interior_obstacles = state.interior_obstacles.saturating_sub(1);
        }
        state.grid.set(p, CellType::Goal);
        state.goal = p;
        true
    }

    pub fn goal(&self) -> Point {
        lock(&self.state).goal
    }

    pub fn clear_all_obstacles(&self) {
        let mut state = lock(&self.state);
        state.grid.clear_interior();
        state.interior_obstacles = 0;
    }

    /// Clears the interior, then scatters obstacles until `percentage` of the
    /// interior is occupied. The target is capped by `max_obstacles` and by the
    /// number of interior cells that are not the goal. Returns the count placed.
    pub fn generate_random_obstacles(&self, percentage: u32) -> usize {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.grid.clear_interior();
        state.interior_obstacles = 0;

        let interior = state.grid.interior_area();
        if interior == 0 {
            return 0;
        }
        let requested = interior * percentage.min(100) as usize / 100;
        let target = requested
            .min(self.max_obstacles)
            .min(interior.saturating_sub(1));

        let mut placed = 0;
        while placed < target {
            let p = Point::new(
                state.rng.gen_range(1..self.width - 1),
                state.rng.gen_range(1..self.height - 1),
            );
            if p == state.goal {
                continue;
            }
            if state.grid.cell(p) == Some(CellType::Empty) {
                state.grid.set(p, CellType::Obstacle);
                placed += 1;
            }
        }
        state.interior_obstacles = placed;
        placed
    }

    /// Random free cell at least `margin` cells away from the edge, or `None`
    /// after `attempts` misses. A margin too large for the grid falls back to
    /// the whole interior.
    pub fn random_free_cell(&self, attempts: usize, margin: i32) -> Option<Point> {
        let mut state = lock(&self.state);
        let (mut lo_x, mut hi_x) = (margin.max(1), self.width - margin.max(1));
        let (mut lo_y, mut hi_y) = (margin.max(1), self.height - margin.max(1));
        if lo_x >= hi_x || lo_y >= hi_y {
            lo_x = 1;
            hi_x = self.width - 1;
            lo_y = 1;
            hi_y = self.height - 1;
        }
        if lo_x >= hi_x || lo_y >= hi_y {
            return None;
        }
        for _ in 0..attempts {
            let p = Point::new(state.rng.gen_range(lo_x..hi_x), state.rng.gen_range(lo_y..hi_y));
            if state.grid.is_free(p) {
                return Some(p);
            }
        }
        None
    }

    /// Replaces every interior obstacle with `points`. Border points, the goal
    /// and out-of-bounds points are skipped. Returns the count applied.
    pub fn replace_obstacles(&self, points: &[Point]) -> usize {
        let mut state = lock(&self.state);
        state.grid.clear_interior();
        let mut placed = 0;
        for p in points {
            if placed >= self.max_obstacles {
                break;
            }
            if state.grid.is_interior(*p) && state.grid.cell(*p) == Some(CellType::Empty) {
                state.grid.set(*p, CellType::Obstacle);
                placed += 1;
            }
        }
        state.interior_obstacles = placed;
        placed
    }

    pub fn interior_obstacle_count(&self) -> usize {
        lock(&self.state).interior_obstacles
    }

    /// Every obstacle cell, border included, row-major.
    pub fn obstacles(&self) -> Vec<Point> {
        lock(&self.state).grid.obstacles()
    }

    /// Point-in-time copy of the grid for planning and reporting.
    pub fn snapshot(&self) -> Grid {
        lock(&self.state).grid.clone()
    }

    pub fn cells(&self) -> Vec<CellType> {
        lock(&self.state).grid.cells().to_vec()
    }

    /// Starts the background unit. It currently performs no grid changes.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let running = Arc::clone(&self.running);
        let spawned = thread::Builder::new()
            .name("environment".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let mut waited = Duration::ZERO;
                    while waited < BACKGROUND_PERIOD && running.load(Ordering::SeqCst) {
                        thread::sleep(BACKGROUND_POLL);
                        waited += BACKGROUND_POLL;
                    }
                }
            });
        match spawned {
            Ok(handle) => *lock(&self.background) = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                tracing::error!("Failed to spawn environment thread: {}", e);
            }
        }
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = lock(&self.background).take() {
            if handle.join().is_err() {
                tracing::error!("Environment thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.stop();
    }
}

fn initial_goal(grid: &Grid, rng: &mut StdRng) -> Point {
    let (w, h) = (grid.width(), grid.height());
    if w >= 5 && h >= 5 {
        Point::new(rng.gen_range(2..w - 2), rng.gen_range(2..h - 2))
    } else {
        Point::new((w / 2).max(1).min(w - 1), (h / 2).max(1).min(h - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(width: i32, height: i32) -> Environment {
        Environment::with_options(width, height, 10_000, Some(42))
    }

    #[test]
    fn goal_starts_inside_the_interior() {
        let env = seeded(20, 15);
        let goal = env.goal();
        assert!(goal.x >= 2 && goal.x <= 17);
        assert!(goal.y >= 2 && goal.y <= 12);
        assert!(env.is_free(goal));
    }

    #[test]
    fn toggle_twice_restores_empty() {
        let env = seeded(20, 15);
        env.set_goal(Point::new(10, 10));
        let p = Point::new(4, 4);
        assert!(env.toggle_obstacle(p));
        assert!(!env.is_free(p));
        assert!(!env.toggle_obstacle(p));
        assert!(env.is_free(p));
        assert_eq!(env.interior_obstacle_count(), 0);
    }

    #[test]
    fn toggle_ignores_border_and_goal() {
        let env = seeded(20, 15);
        env.set_goal(Point::new(10, 10));
        assert!(!env.toggle_obstacle(Point::new(0, 5)));
        assert!(!env.is_free(Point::new(0, 5)));
        assert!(!env.toggle_obstacle(Point::new(10, 10)));
        assert!(env.is_free(Point::new(10, 10)));
        assert!(!env.toggle_obstacle(Point::new(-3, 50)));
    }

    #[test]
    fn toggle_respects_obstacle_cap() {
        let env = Environment::with_options(10, 10, 1, Some(1));
        env.set_goal(Point::new(8, 8));
        assert!(env.toggle_obstacle(Point::new(2, 2)));
        assert!(!env.toggle_obstacle(Point::new(3, 3)));
        assert!(env.is_free(Point::new(3, 3)));
    }

    #[test]
    fn set_goal_rejects_border_and_clears_obstacle() {
        let env = seeded(12, 12);
        env.set_goal(Point::new(5, 5));
        assert!(!env.set_goal(Point::new(0, 0)));
        assert_eq!(env.goal(), Point::new(5, 5));

        env.toggle_obstacle(Point::new(7, 7));
        assert!(env.set_goal(Point::new(7, 7)));
        assert!(env.is_free(Point::new(7, 7)));
        assert_eq!(env.interior_obstacle_count(), 0);
        assert_eq!(env.snapshot().cell(Point::new(5, 5)), Some(CellType::Empty));
    }

    #[test]
    fn generate_hits_requested_percentage_and_spares_goal() {
        let env = seeded(22, 22);
        env.set_goal(Point::new(11, 11));
        let placed = env.generate_random_obstacles(25);
        assert_eq!(placed, 100);
        assert_eq!(env.interior_obstacle_count(), 100);
        assert_eq!(env.snapshot().interior_obstacle_count(), 100);
        assert!(env.is_free(Point::new(11, 11)));
    }

    #[test]
    fn generate_is_capped_by_max_obstacles() {
        let env = Environment::with_options(22, 22, 30, Some(9));
        assert_eq!(env.generate_random_obstacles(50), 30);
    }

    #[test]
    fn generate_full_interior_leaves_goal_free() {
        let env = seeded(6, 6);
        let goal = env.goal();
        let placed = env.generate_random_obstacles(100);
        assert_eq!(placed, 15);
        assert!(env.is_free(goal));
    }

    #[test]
    fn clear_frees_every_interior_cell() {
        let env = seeded(16, 16);
        env.generate_random_obstacles(40);
        env.clear_all_obstacles();
        let grid = env.snapshot();
        for y in 0..16 {
            for x in 0..16 {
                let p = Point::new(x, y);
                assert_eq!(env.is_free(p), !grid.is_border(p), "cell {}", p);
            }
        }
    }

    #[test]
    fn update_robot_position_never_writes() {
        let env = seeded(10, 10);
        let before = env.snapshot();
        assert!(env.update_robot_position(Point::new(3, 3)));
        assert!(!env.update_robot_position(Point::new(30, 3)));
        assert_eq!(env.snapshot(), before);
    }

    #[test]
    fn random_free_cell_avoids_obstacles() {
        let env = seeded(20, 20);
        env.generate_random_obstacles(30);
        for _ in 0..20 {
            let p = env.random_free_cell(100, 2).unwrap();
            assert!(env.is_free(p));
            assert!(p.x >= 2 && p.x < 18 && p.y >= 2 && p.y < 18);
        }
    }

    #[test]
    fn background_unit_starts_and_joins() {
        let env = seeded(10, 10);
        env.start();
        env.start();
        assert!(env.is_running());
        env.stop();
        env.stop();
        assert!(!env.is_running());
    }
}
