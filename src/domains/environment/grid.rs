use crate::common::Point;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellType {
    Empty,
    Obstacle,
    Goal,
}

/// Flat `width * height` cell array. Neighbours are found by index arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    width: i32,
    height: i32,
    cells: Vec<CellType>,
}

impl Grid {
    /// Empty interior with a permanent obstacle border.
    pub fn new(width: i32, height: i32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mut grid = Self {
            width,
            height,
            cells: vec![CellType::Empty; (width * height) as usize],
        };
        for x in 0..width {
            grid.set(Point::new(x, 0), CellType::Obstacle);
            grid.set(Point::new(x, height - 1), CellType::Obstacle);
        }
        for y in 0..height {
            grid.set(Point::new(0, y), CellType::Obstacle);
            grid.set(Point::new(width - 1, y), CellType::Obstacle);
        }
        grid
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn in_bounds(&self, p: Point) -> bool {
        p.x >= 0 && p.x < self.width && p.y >= 0 && p.y < self.height
    }

    pub fn is_border(&self, p: Point) -> bool {
        self.in_bounds(p)
            && (p.x == 0 || p.y == 0 || p.x == self.width - 1 || p.y == self.height - 1)
    }

    pub fn is_interior(&self, p: Point) -> bool {
        self.in_bounds(p) && !self.is_border(p)
    }

    pub(crate) fn index(&self, p: Point) -> Option<usize> {
        if self.in_bounds(p) {
            Some((p.y * self.width + p.x) as usize)
        } else {
            None
        }
    }

    pub(crate) fn point_at(&self, index: usize) -> Point {
        let index = index as i32;
        Point::new(index % self.width, index / self.width)
    }

    pub fn cell(&self, p: Point) -> Option<CellType> {
        self.index(p).map(|i| self.cells[i])
    }

    pub(crate) fn set(&mut self, p: Point, cell: CellType) -> bool {
        match self.index(p) {
            Some(i) => {
                self.cells[i] = cell;
                true
            }
            None => false,
        }
    }

    /// Out-of-bounds counts as blocked.
    pub fn is_free(&self, p: Point) -> bool {
        matches!(self.cell(p), Some(CellType::Empty) | Some(CellType::Goal))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn interior_area(&self) -> usize {
        ((self.width - 2).max(0) * (self.height - 2).max(0)) as usize
    }

    pub fn interior_points(&self) -> impl Iterator<Item = Point> + '_ {
        (1..self.height - 1).flat_map(move |y| (1..self.width - 1).map(move |x| Point::new(x, y)))
    }

    pub fn interior_obstacle_count(&self) -> usize {
        self.interior_points()
            .filter(|p| self.cell(*p) == Some(CellType::Obstacle))
            .count()
    }

    /// Removes every interior obstacle. Border and goal cells are kept.
    pub(crate) fn clear_interior(&mut self) {
        let interior: Vec<Point> = self.interior_points().collect();
        for p in interior {
            if self.cell(p) == Some(CellType::Obstacle) {
                self.set(p, CellType::Empty);
            }
        }
    }

    /// Every obstacle cell (border included) in row-major order.
    pub fn obstacles(&self) -> Vec<Point> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == CellType::Obstacle)
            .map(|(i, _)| self.point_at(i))
            .collect()
    }

    pub fn cells(&self) -> &[CellType] {
        &self.cells
    }

    pub fn rows(&self) -> Vec<Vec<CellType>> {
        self.cells
            .chunks(self.width as usize)
            .map(|row| row.to_vec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_is_obstacle_interior_is_empty() {
        let grid = Grid::new(6, 5);
        for p in [Point::new(0, 0), Point::new(5, 4), Point::new(3, 0), Point::new(0, 2)] {
            assert!(grid.is_border(p));
            assert_eq!(grid.cell(p), Some(CellType::Obstacle));
        }
        assert_eq!(grid.interior_area(), 12);
        assert_eq!(grid.interior_obstacle_count(), 0);
        assert!(grid.interior_points().all(|p| grid.is_free(p)));
    }

    #[test]
    fn out_of_bounds_is_never_free() {
        let grid = Grid::new(4, 4);
        assert!(!grid.is_free(Point::new(-1, 1)));
        assert!(!grid.is_free(Point::new(1, 4)));
        assert_eq!(grid.cell(Point::new(9, 9)), None);
    }

    #[test]
    fn index_round_trips_through_point_at() {
        let grid = Grid::new(7, 3);
        let p = Point::new(5, 2);
        let i = grid.index(p).unwrap();
        assert_eq!(grid.point_at(i), p);
    }

    #[test]
    fn obstacles_are_listed_row_major() {
        let mut grid = Grid::new(4, 4);
        grid.set(Point::new(2, 1), CellType::Obstacle);
        let obstacles = grid.obstacles();
        assert_eq!(obstacles.len(), 13);
        let pos = obstacles.iter().position(|p| *p == Point::new(2, 1)).unwrap();
        assert_eq!(obstacles[pos - 1], Point::new(0, 1));
        assert_eq!(obstacles[pos + 1], Point::new(3, 1));
    }
}
