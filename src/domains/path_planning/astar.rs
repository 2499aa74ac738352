//! Grid A* over a 4-connected lattice with unit step cost.
//!
//! The open set is a binary heap ordered on `(f, h, y, x)` ascending, so two
//! runs over the same grid always expand nodes in the same order. Closed flags,
//! best-known costs and parent links are flat arrays indexed like the grid.

use crate::common::Point;
use crate::domains::environment::{Environment, Grid};
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenNode {
    f: OrderedFloat<f64>,
    h: OrderedFloat<f64>,
    g: u32,
    point: Point,
}

impl OpenNode {
    fn key(&self) -> (OrderedFloat<f64>, OrderedFloat<f64>, i32, i32) {
        (self.f, self.h, self.point.y, self.point.x)
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse to pop the smallest key first.
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Plans against a snapshot of the environment, so the grid lock is only held
/// for the copy.
pub fn find_path(start: Point, goal: Point, env: &Environment) -> Vec<Point> {
    find_path_on_grid(start, goal, &env.snapshot())
}

/// Shortest path from `start` to `goal`, excluding `start` and including `goal`.
///
/// Returns an empty vector when `start == goal`, when either endpoint is out of
/// bounds, when the goal is blocked, or when no route exists. The start cell
/// itself does not need to be free.
pub fn find_path_on_grid(start: Point, goal: Point, grid: &Grid) -> Vec<Point> {
    if start == goal || !grid.in_bounds(start) || !grid.is_free(goal) {
        return Vec::new();
    }
    let (Some(start_idx), Some(goal_idx)) = (grid.index(start), grid.index(goal)) else {
        return Vec::new();
    };

    let cells = grid.len();
    let mut closed = vec![false; cells];
    let mut best_g = vec![u32::MAX; cells];
    let mut parent: Vec<Option<usize>> = vec![None; cells];
    let mut open = BinaryHeap::new();

    let h0 = start.euclidean_distance(&goal);
    best_g[start_idx] = 0;
    open.push(OpenNode {
        f: OrderedFloat(h0),
        h: OrderedFloat(h0),
        g: 0,
        point: start,
    });

    while let Some(node) = open.pop() {
        let Some(idx) = grid.index(node.point) else {
            continue;
        };
        if closed[idx] {
            continue;
        }
        closed[idx] = true;

        if idx == goal_idx {
            return reconstruct(grid, &parent, start_idx, goal_idx);
        }

        for next in node.point.cardinal_neighbors() {
            if !grid.is_free(next) {
                continue;
            }
            let Some(next_idx) = grid.index(next) else {
                continue;
            };
            if closed[next_idx] {
                continue;
            }
            let g = node.g + 1;
            if g < best_g[next_idx] {
                best_g[next_idx] = g;
                parent[next_idx] = Some(idx);
                let h = next.euclidean_distance(&goal);
                open.push(OpenNode {
                    f: OrderedFloat(f64::from(g) + h),
                    h: OrderedFloat(h),
                    g,
                    point: next,
                });
            }
        }
    }

    Vec::new()
}

fn reconstruct(
    grid: &Grid,
    parent: &[Option<usize>],
    start_idx: usize,
    goal_idx: usize,
) -> Vec<Point> {
    let mut path = Vec::new();
    let mut current = goal_idx;
    while current != start_idx {
        path.push(grid.point_at(current));
        match parent[current] {
            Some(prev) => current = prev,
            None => return Vec::new(),
        }
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::environment::CellType;

    fn wall(grid: &mut Grid, points: &[(i32, i32)]) {
        for (x, y) in points {
            grid.set(Point::new(*x, *y), CellType::Obstacle);
        }
    }

    #[test]
    fn open_grid_path_is_manhattan_length() {
        let grid = Grid::new(12, 12);
        let start = Point::new(1, 1);
        let goal = Point::new(9, 6);
        let path = find_path_on_grid(start, goal, &grid);
        assert_eq!(path.len() as u64, start.manhattan_distance(&goal));
        assert_eq!(path.last(), Some(&goal));
        assert!(!path.contains(&start));
    }

    #[test]
    fn steps_are_adjacent_and_free() {
        let mut grid = Grid::new(10, 10);
        wall(&mut grid, &[(5, 1), (5, 2), (5, 3), (5, 4), (5, 5), (5, 6), (5, 7)]);
        let start = Point::new(2, 4);
        let goal = Point::new(8, 4);
        let path = find_path_on_grid(start, goal, &grid);
        assert!(!path.is_empty());
        let mut prev = start;
        for step in &path {
            assert_eq!(prev.manhattan_distance(step), 1);
            assert!(grid.is_free(*step));
            prev = *step;
        }
        assert_eq!(prev, goal);
    }

    #[test]
    fn enclosed_start_has_no_path() {
        let mut grid = Grid::new(10, 10);
        wall(&mut grid, &[(4, 5), (6, 5), (5, 4), (5, 6)]);
        assert!(find_path_on_grid(Point::new(5, 5), Point::new(8, 8), &grid).is_empty());
    }

    #[test]
    fn start_equal_goal_is_empty() {
        let grid = Grid::new(8, 8);
        assert!(find_path_on_grid(Point::new(3, 3), Point::new(3, 3), &grid).is_empty());
    }

    #[test]
    fn blocked_or_outside_goal_is_empty() {
        let mut grid = Grid::new(8, 8);
        wall(&mut grid, &[(4, 4)]);
        assert!(find_path_on_grid(Point::new(1, 1), Point::new(4, 4), &grid).is_empty());
        assert!(find_path_on_grid(Point::new(1, 1), Point::new(0, 3), &grid).is_empty());
        assert!(find_path_on_grid(Point::new(1, 1), Point::new(20, 3), &grid).is_empty());
    }

    #[test]
    fn repeated_runs_agree() {
        let mut grid = Grid::new(15, 15);
        wall(&mut grid, &[(7, 3), (7, 4), (7, 5), (3, 9), (4, 9), (5, 9)]);
        let a = find_path_on_grid(Point::new(2, 2), Point::new(12, 12), &grid);
        let b = find_path_on_grid(Point::new(2, 2), Point::new(12, 12), &grid);
        assert_eq!(a, b);
    }

    #[test]
    fn heap_pops_lowest_f_then_h() {
        let mut heap = BinaryHeap::new();
        let node = |f: f64, h: f64, x: i32, y: i32| OpenNode {
            f: OrderedFloat(f),
            h: OrderedFloat(h),
            g: 0,
            point: Point::new(x, y),
        };
        heap.push(node(5.0, 2.0, 1, 1));
        heap.push(node(4.0, 3.0, 2, 2));
        heap.push(node(4.0, 1.0, 3, 3));
        heap.push(node(4.0, 1.0, 1, 3));
        assert_eq!(heap.pop().map(|n| n.point), Some(Point::new(1, 3)));
        assert_eq!(heap.pop().map(|n| n.point), Some(Point::new(3, 3)));
        assert_eq!(heap.pop().map(|n| n.point), Some(Point::new(2, 2)));
        assert_eq!(heap.pop().map(|n| n.point), Some(Point::new(1, 1)));
    }
}
