//! Vehicle cell coordinates and the projected-cell rejection test.
//!
//! # Model
//! - A vehicle is a set of unit cells ("blocks") addressed by integer coordinates
//!   `CellPos` in the vehicle's local frame.
//! - A cell's local center is `cell * cell_size`; the world center follows from the
//!   vehicle pose.
//!
//! # Rejection test
//! To decide whether a vehicle travelling along `dir` can pass another one, every
//! occupied cell of both vehicles is projected onto the plane orthogonal to `dir`
//! and rounded to a coarse grid (the larger of the two cell sizes). The path is
//! obstructed iff a projected cell of the other vehicle lands within one coarse
//! unit of a projected cell of this vehicle. Hashing the projections makes this
//! O(cells) instead of O(cells^2).
//!
//! The plane basis depends only on the *line* of `dir`, so `dir` and `-dir` project
//! identically and the test is symmetric under swapping the vehicles and reversing
//! the direction.

use nalgebra as na;
use rapier3d::parry::utils::hashmap::HashMap;

use crate::collision::Vec3;

/// Integer cell coordinate in a vehicle's local frame.
pub type CellPos = na::Vector3<i32>;

/// 2D key of a projected cell on the coarse grid.
pub type ProjectedKey = (i32, i32);

/// Local center of `cell`.
#[inline]
pub fn cell_to_local(cell: &CellPos, cell_size: f32) -> Vec3 {
    Vec3::new(cell.x as f32, cell.y as f32, cell.z as f32) * cell_size
}

/// Two unit vectors spanning the plane orthogonal to the line of `dir`.
///
/// `dir` is first flipped into a canonical half-space (its largest component
/// positive), so `plane_basis(d) == plane_basis(-d)`.
pub fn plane_basis(dir: &Vec3) -> (Vec3, Vec3) {
    let n = dir.try_normalize(1.0e-9).unwrap_or_else(Vec3::z);
    let abs = n.abs();
    let major = if abs.x >= abs.y && abs.x >= abs.z {
        n.x
    } else if abs.y >= abs.z {
        n.y
    } else {
        n.z
    };
    let n = if major < 0.0 { -n } else { n };

    // Seed with the world axis least aligned with `n` for numerical stability.
    let seed = if abs.x <= abs.y && abs.x <= abs.z {
        Vec3::x()
    } else if abs.y <= abs.z {
        Vec3::y()
    } else {
        Vec3::z()
    };
    let u = (seed - n * seed.dot(&n)).normalize();
    let v = n.cross(&u);
    (u, v)
}

/// Sparse 2D grid of cells projected onto the plane orthogonal to a travel line.
///
/// Each key remembers the world point that produced it with the smallest coordinate
/// along the travel direction, which is the cell that would be met first.
#[derive(Clone, Debug)]
pub struct ProjectedGrid {
    direction: Vec3,
    u: Vec3,
    v: Vec3,
    inv_coarse: f32,
    cells: HashMap<ProjectedKey, Vec3>,
}

impl ProjectedGrid {
    /// Empty grid for travel along `direction`, rounding to `coarse` (meters).
    pub fn new(direction: &Vec3, coarse: f32) -> Self {
        let (u, v) = plane_basis(direction);
        Self {
            direction: direction.try_normalize(1.0e-9).unwrap_or_else(Vec3::z),
            u,
            v,
            inv_coarse: 1.0 / coarse.max(f32::EPSILON),
            cells: HashMap::default(),
        }
    }

    /// Coarse-grid key of a world point.
    #[inline]
    pub fn key(&self, p: &Vec3) -> ProjectedKey {
        (
            (p.dot(&self.u) * self.inv_coarse).round() as i32,
            (p.dot(&self.v) * self.inv_coarse).round() as i32,
        )
    }

    /// Coordinate of a world point along the travel direction.
    #[inline]
    pub fn along(&self, p: &Vec3) -> f32 {
        p.dot(&self.direction)
    }

    pub fn insert(&mut self, p: Vec3) {
        let key = self.key(&p);
        let along = self.along(&p);
        let direction = self.direction;
        self.cells
            .entry(key)
            .and_modify(|existing| {
                if along < existing.dot(&direction) {
                    *existing = p;
                }
            })
            .or_insert(p);
    }

    /// The stored point of any projected cell within one coarse unit of `p`.
    pub fn near(&self, p: &Vec3) -> Option<Vec3> {
        let (ku, kv) = self.key(p);
        for du in -1..=1 {
            for dv in -1..=1 {
                if let Some(found) = self.cells.get(&(ku + du, kv + dv)) {
                    return Some(*found);
                }
            }
        }
        None
    }

    #[inline]
    pub fn contains_near(&self, p: &Vec3) -> bool {
        self.near(p).is_some()
    }

    /// Stored points, one per projected key.
    pub fn points(&self) -> impl Iterator<Item = &Vec3> {
        self.cells.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Extend<Vec3> for ProjectedGrid {
    fn extend<T: IntoIterator<Item = Vec3>>(&mut self, iter: T) {
        for p in iter {
            self.insert(p);
        }
    }
}

/// Projected-cell rejection test between two sets of world cell centers.
///
/// Returns true iff a projected cell of `other` lands within one `coarse` unit of a
/// projected cell of `this` on the plane orthogonal to `direction`.
pub fn rejection_collides<A, B>(this: A, other: B, direction: &Vec3, coarse: f32) -> bool
where
    A: IntoIterator<Item = Vec3>,
    B: IntoIterator<Item = Vec3>,
{
    first_contact(this, other, direction, coarse).is_some()
}

/// Like [`rejection_collides`], but returns the colliding point of `other` met
/// first when travelling along `direction`.
pub fn first_contact<A, B>(this: A, other: B, direction: &Vec3, coarse: f32) -> Option<Vec3>
where
    A: IntoIterator<Item = Vec3>,
    B: IntoIterator<Item = Vec3>,
{
    let mut grid = ProjectedGrid::new(direction, coarse);
    grid.extend(this);
    if grid.is_empty() {
        return None;
    }
    other
        .into_iter()
        .filter(|p| grid.contains_near(p))
        .min_by(|a, b| grid.along(a).total_cmp(&grid.along(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn block(origin: Vec3, size: i32, cell: f32) -> Vec<Vec3> {
        let mut out = Vec::new();
        for x in 0..size {
            for y in 0..size {
                for z in 0..size {
                    out.push(origin + Vec3::new(x as f32, y as f32, z as f32) * cell);
                }
            }
        }
        out
    }

    #[test]
    fn cell_centers_scale_with_cell_size() {
        let cell = CellPos::new(-3, 7, 12);
        assert_eq!(cell_to_local(&cell, 2.5), Vec3::new(-7.5, 17.5, 30.0));
    }

    #[test]
    fn plane_basis_is_orthonormal_and_line_canonical() {
        for dir in [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.3, -0.9, 0.1),
            Vec3::new(-0.2, 0.2, -5.0),
        ] {
            let (u, v) = plane_basis(&dir);
            let n = dir.normalize();
            assert_relative_eq!(u.norm(), 1.0, epsilon = 1.0e-5);
            assert_relative_eq!(v.norm(), 1.0, epsilon = 1.0e-5);
            assert_relative_eq!(u.dot(&v), 0.0, epsilon = 1.0e-5);
            assert_relative_eq!(u.dot(&n), 0.0, epsilon = 1.0e-5);
            assert_relative_eq!(v.dot(&n), 0.0, epsilon = 1.0e-5);

            let (nu, nv) = plane_basis(&-dir);
            assert_relative_eq!(u, nu);
            assert_relative_eq!(v, nv);
        }
    }

    #[test]
    fn grid_keeps_front_most_point_per_key() {
        let mut grid = ProjectedGrid::new(&Vec3::x(), 1.0);
        grid.insert(Vec3::new(5.0, 0.0, 0.0));
        grid.insert(Vec3::new(2.0, 0.0, 0.0));
        grid.insert(Vec3::new(9.0, 0.0, 0.0));
        assert_eq!(grid.len(), 1);
        assert_relative_eq!(
            grid.near(&Vec3::new(100.0, 0.0, 0.0)).unwrap(),
            Vec3::new(2.0, 0.0, 0.0)
        );
    }

    #[test]
    fn vehicles_in_line_collide_and_offset_ones_do_not() {
        let a = block(Vec3::zeros(), 3, 2.5);
        let ahead = block(Vec3::new(0.0, 0.0, -100.0), 3, 2.5);
        let beside = block(Vec3::new(20.0, 0.0, -100.0), 3, 2.5);
        let forward = -Vec3::z();

        assert!(rejection_collides(
            a.iter().copied(),
            ahead.iter().copied(),
            &forward,
            2.5
        ));
        assert!(!rejection_collides(
            a.iter().copied(),
            beside.iter().copied(),
            &forward,
            2.5
        ));
    }

    #[test]
    fn rejection_is_symmetric_under_swap_and_reverse() {
        let a = block(Vec3::new(0.3, -1.1, 0.0), 4, 0.5);
        let dirs = [
            Vec3::new(1.0, 0.2, 0.0),
            Vec3::new(-0.4, 0.7, 0.6),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        let others = [
            block(Vec3::new(40.0, 6.0, 1.0), 2, 2.5),
            block(Vec3::new(40.0, 1.0, -0.5), 2, 2.5),
            block(Vec3::new(-5.0, 30.0, 20.0), 3, 2.5),
        ];

        for dir in dirs {
            for b in &others {
                let forward = rejection_collides(a.iter().copied(), b.iter().copied(), &dir, 2.5);
                let backward =
                    rejection_collides(b.iter().copied(), a.iter().copied(), &-dir, 2.5);
                assert_eq!(forward, backward, "dir {dir:?}");
            }
        }
    }

    #[test]
    fn first_contact_is_nearest_along_travel() {
        let a = block(Vec3::zeros(), 2, 2.5);
        let mut b = block(Vec3::new(0.0, 0.0, -50.0), 2, 2.5);
        b.extend(block(Vec3::new(0.0, 0.0, -20.0), 2, 2.5));
        let hit = first_contact(a, b, &-Vec3::z(), 2.5).unwrap();
        assert_relative_eq!(hit.z, -17.5);
    }

    #[test]
    fn empty_vehicle_never_collides() {
        assert!(!rejection_collides(
            std::iter::empty(),
            [Vec3::zeros()],
            &Vec3::x(),
            1.0
        ));
    }
}
