//! Bed leveling correction
//!
//! Two correction models are supported:
//! - a plane, fitted by least squares over a probed grid or taken exactly
//!   through three points, applied as a rotation plus a Z shift
//! - a rectangular mesh of measured Z offsets, bilinearly interpolated and
//!   added to Z
//!
//! Corrections map a logical point to the physical point the nozzle has to
//! reach. [`BedLeveling::unapply`] is the exact inverse used when reading the
//! position back from the actuators.

use crate::mathutil::{
    lerp, matrix_identity, matrix_inverse, matrix_mul_vector, matrix_transpose, vector_cross,
    vector_normalize, vector_sub, Matrix3x3d, Vector3d,
};
use printcore_core::KinematicsError;
use serde::{Deserialize, Serialize};

/// Fractional grid positions closer than this to a grid line snap onto it.
const GRID_SNAP: f64 = 1e-9;

/// Plane `z = a·x + b·y + d`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneFit {
    pub a: f64,
    pub b: f64,
    pub d: f64,
}

impl PlaneFit {
    /// Height of the plane at (x, y)
    pub fn z_at(&self, x: f64, y: f64) -> f64 {
        self.a * x + self.b * y + self.d
    }

    /// Upward normal, not normalized
    pub fn normal(&self) -> Vector3d {
        [-self.a, -self.b, 1.0]
    }
}

/// Least squares plane through a set of (x, y, z) samples
///
/// Solves the 3x3 normal equations of `z = a·x + b·y + d`. Fails with
/// fewer than three samples or when the samples are collinear in XY.
pub fn fit_plane_least_squares(points: &[Vector3d]) -> Result<PlaneFit, KinematicsError> {
    if points.len() < 3 {
        return Err(KinematicsError::InsufficientSamples {
            needed: 3,
            got: points.len(),
        });
    }

    let mut ata = [[0.0; 3]; 3];
    let mut atz = [0.0; 3];
    for p in points {
        let row = [p[0], p[1], 1.0];
        for i in 0..3 {
            for j in 0..3 {
                ata[i][j] += row[i] * row[j];
            }
            atz[i] += row[i] * p[2];
        }
    }

    let inv = matrix_inverse(ata).ok_or_else(|| KinematicsError::DegenerateGeometry {
        reason: "probe points are collinear".to_string(),
    })?;
    let [a, b, d] = matrix_mul_vector(inv, atz);
    Ok(PlaneFit { a, b, d })
}

/// Exact plane through three points
pub fn plane_through_points(points: [Vector3d; 3]) -> Result<PlaneFit, KinematicsError> {
    let n = vector_cross(
        vector_sub(points[1], points[0]),
        vector_sub(points[2], points[0]),
    );
    if n[2].abs() < 1e-12 {
        return Err(KinematicsError::DegenerateGeometry {
            reason: "three point leveling points are collinear".to_string(),
        });
    }
    let a = -n[0] / n[2];
    let b = -n[1] / n[2];
    let d = points[0][2] - a * points[0][0] - b * points[0][1];
    Ok(PlaneFit { a, b, d })
}

/// Rotation aligning logical Z with the bed normal, plus the bed height at
/// the origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneCorrection {
    matrix: Matrix3x3d,
    z_shift: f64,
}

impl PlaneCorrection {
    pub fn identity() -> Self {
        Self {
            matrix: matrix_identity(),
            z_shift: 0.0,
        }
    }

    /// Correction for a fitted plane
    ///
    /// The columns of the matrix are the bed's own X, Y and normal axes
    /// expressed in machine coordinates.
    pub fn from_plane(plane: &PlaneFit) -> Result<Self, KinematicsError> {
        let degenerate = || KinematicsError::DegenerateGeometry {
            reason: "bed plane has no usable normal".to_string(),
        };
        let n = vector_normalize(plane.normal()).ok_or_else(degenerate)?;
        let ex = vector_normalize([1.0, 0.0, -n[0] / n[2]]).ok_or_else(degenerate)?;
        let ey = vector_normalize(vector_cross(n, ex)).ok_or_else(degenerate)?;
        Ok(Self {
            matrix: [
                [ex[0], ey[0], n[0]],
                [ex[1], ey[1], n[1]],
                [ex[2], ey[2], n[2]],
            ],
            z_shift: plane.d,
        })
    }

    pub fn matrix(&self) -> &Matrix3x3d {
        &self.matrix
    }

    pub fn apply(&self, logical: Vector3d) -> Vector3d {
        let mut p = matrix_mul_vector(self.matrix, logical);
        p[2] += self.z_shift;
        p
    }

    pub fn unapply(&self, physical: Vector3d) -> Vector3d {
        let shifted = [physical[0], physical[1], physical[2] - self.z_shift];
        matrix_mul_vector(matrix_transpose(self.matrix), shifted)
    }
}

/// Rectangular grid of bed height samples
///
/// Samples are stored row by row (`y` major). A sample may be missing until
/// it is probed or extrapolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshGrid {
    nx: usize,
    ny: usize,
    min: [f64; 2],
    max: [f64; 2],
    z: Vec<Option<f64>>,
}

impl MeshGrid {
    /// Empty grid of `nx` × `ny` points spanning `min..=max`
    pub fn new(nx: usize, ny: usize, min: [f64; 2], max: [f64; 2]) -> Result<Self, KinematicsError> {
        if nx < 2 || ny < 2 {
            return Err(KinematicsError::DegenerateGeometry {
                reason: format!("mesh needs at least 2x2 points, got {nx}x{ny}"),
            });
        }
        if !(min[0] < max[0] && min[1] < max[1]) {
            return Err(KinematicsError::DegenerateGeometry {
                reason: "mesh area is empty".to_string(),
            });
        }
        Ok(Self {
            nx,
            ny,
            min,
            max,
            z: vec![None; nx * ny],
        })
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn spacing(&self) -> [f64; 2] {
        [
            (self.max[0] - self.min[0]) / (self.nx - 1) as f64,
            (self.max[1] - self.min[1]) / (self.ny - 1) as f64,
        ]
    }

    /// X coordinate of grid column `ix`
    pub fn x_at(&self, ix: usize) -> f64 {
        if ix + 1 == self.nx {
            self.max[0]
        } else {
            self.min[0] + ix as f64 * self.spacing()[0]
        }
    }

    /// Y coordinate of grid row `iy`
    pub fn y_at(&self, iy: usize) -> f64 {
        if iy + 1 == self.ny {
            self.max[1]
        } else {
            self.min[1] + iy as f64 * self.spacing()[1]
        }
    }

    pub fn get(&self, ix: usize, iy: usize) -> Option<f64> {
        self.z.get(iy * self.nx + ix).copied().flatten()
    }

    pub fn set(&mut self, ix: usize, iy: usize, z: f64) {
        if ix < self.nx && iy < self.ny {
            self.z[iy * self.nx + ix] = Some(z);
        }
    }

    /// Every sample is known
    pub fn is_complete(&self) -> bool {
        self.z.iter().all(Option::is_some)
    }

    /// Continuous grid coordinate along X, clamped to the grid
    fn grid_x(&self, x: f64) -> f64 {
        snap(((x - self.min[0]) / self.spacing()[0]).clamp(0.0, (self.nx - 1) as f64))
    }

    fn grid_y(&self, y: f64) -> f64 {
        snap(((y - self.min[1]) / self.spacing()[1]).clamp(0.0, (self.ny - 1) as f64))
    }

    /// Index of the cell containing `x`, in `0..nx-1`
    pub fn cell_index_x(&self, x: f64) -> usize {
        (self.grid_x(x).floor() as usize).min(self.nx - 2)
    }

    /// Index of the cell containing `y`, in `0..ny-1`
    pub fn cell_index_y(&self, y: f64) -> usize {
        (self.grid_y(y).floor() as usize).min(self.ny - 2)
    }

    /// Bilinear height at (x, y)
    ///
    /// Positions outside the grid use the nearest edge. Missing samples read
    /// as zero.
    pub fn interpolate(&self, x: f64, y: f64) -> f64 {
        let gx = self.grid_x(x);
        let gy = self.grid_y(y);
        let ix = (gx.floor() as usize).min(self.nx - 2);
        let iy = (gy.floor() as usize).min(self.ny - 2);
        let rx = gx - ix as f64;
        let ry = gy - iy as f64;

        let z = |i: usize, j: usize| self.get(i, j).unwrap_or(0.0);
        let z1 = z(ix, iy);
        let z2 = z(ix, iy + 1);
        let z3 = z(ix + 1, iy);
        let z4 = z(ix + 1, iy + 1);
        lerp(lerp(z1, z2, ry), lerp(z3, z4, ry), rx)
    }

    /// Fill missing samples by linear extrapolation away from the center
    ///
    /// Each missing point takes the median of the estimates available from
    /// its two neighbors towards the center along X, along Y and along the
    /// diagonal. Points are visited from the center outwards so filled values
    /// feed the next ring. A point with no usable neighbors takes the mean of
    /// all known samples.
    pub fn extrapolate_missing(&mut self) {
        let cx = (self.nx - 1) as f64 / 2.0;
        let cy = (self.ny - 1) as f64 / 2.0;
        let mut order: Vec<(usize, usize)> = (0..self.ny)
            .flat_map(|iy| (0..self.nx).map(move |ix| (ix, iy)))
            .collect();
        order.sort_by(|a, b| {
            let da = (a.0 as f64 - cx).abs().max((a.1 as f64 - cy).abs());
            let db = (b.0 as f64 - cx).abs().max((b.1 as f64 - cy).abs());
            da.total_cmp(&db)
        });

        for (ix, iy) in order {
            if self.get(ix, iy).is_some() {
                continue;
            }
            let xdir = direction_towards(ix, cx);
            let ydir = direction_towards(iy, cy);
            let mut estimates = Vec::with_capacity(3);
            if xdir != 0 {
                estimates.extend(self.extrapolate_from(ix, iy, xdir, 0));
            }
            if ydir != 0 {
                estimates.extend(self.extrapolate_from(ix, iy, 0, ydir));
            }
            if xdir != 0 && ydir != 0 {
                estimates.extend(self.extrapolate_from(ix, iy, xdir, ydir));
            }
            let value = median(&mut estimates).or_else(|| self.mean_known());
            if let Some(value) = value {
                self.set(ix, iy, value);
            }
        }
    }

    fn extrapolate_from(&self, ix: usize, iy: usize, dx: isize, dy: isize) -> Option<f64> {
        let near = self.get_offset(ix, iy, dx, dy)?;
        let far = self.get_offset(ix, iy, 2 * dx, 2 * dy)?;
        Some(2.0 * near - far)
    }

    fn get_offset(&self, ix: usize, iy: usize, dx: isize, dy: isize) -> Option<f64> {
        let x = ix.checked_add_signed(dx)?;
        let y = iy.checked_add_signed(dy)?;
        if x >= self.nx || y >= self.ny {
            return None;
        }
        self.get(x, y)
    }

    fn mean_known(&self) -> Option<f64> {
        let known: Vec<f64> = self.z.iter().flatten().copied().collect();
        if known.is_empty() {
            None
        } else {
            Some(known.iter().sum::<f64>() / known.len() as f64)
        }
    }

    /// Grid rows for reporting, back row first
    pub fn rows(&self) -> Vec<Vec<Option<f64>>> {
        (0..self.ny)
            .rev()
            .map(|iy| (0..self.nx).map(|ix| self.get(ix, iy)).collect())
            .collect()
    }
}

fn snap(g: f64) -> f64 {
    let r = g.round();
    if (g - r).abs() < GRID_SNAP {
        r
    } else {
        g
    }
}

fn direction_towards(index: usize, center: f64) -> isize {
    let i = index as f64;
    if i < center - 0.5 {
        1
    } else if i > center + 0.5 {
        -1
    } else {
        0
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    values.sort_by(|a, b| a.total_cmp(b));
    match values.len() {
        0 => None,
        n if n % 2 == 1 => Some(values[n / 2]),
        n => Some((values[n / 2 - 1] + values[n / 2]) / 2.0),
    }
}

/// Active bed leveling model
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BedLevel {
    /// No correction
    #[default]
    Identity,
    /// Plane rotation
    Plane(PlaneCorrection),
    /// Mesh offsets added to Z
    Mesh(MeshGrid),
}

/// Bed leveling state: the model and whether it is applied (M420 S)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BedLeveling {
    model: BedLevel,
    enabled: bool,
}

impl BedLeveling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a model and enable it
    pub fn set(&mut self, model: BedLevel) {
        self.enabled = !matches!(model, BedLevel::Identity);
        self.model = model;
    }

    /// Back to identity
    pub fn reset(&mut self) {
        self.model = BedLevel::Identity;
        self.enabled = false;
    }

    pub fn model(&self) -> &BedLevel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut BedLevel {
        &mut self.model
    }

    /// Toggle an existing model; enabling identity is a no-op
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        self.enabled = enabled && !matches!(self.model, BedLevel::Identity);
        self.enabled
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !matches!(self.model, BedLevel::Identity)
    }

    /// Active mesh, if mesh leveling is in effect
    pub fn active_mesh(&self) -> Option<&MeshGrid> {
        match (&self.model, self.enabled) {
            (BedLevel::Mesh(mesh), true) => Some(mesh),
            _ => None,
        }
    }

    /// Logical to physical
    pub fn apply(&self, logical: Vector3d) -> Vector3d {
        if !self.enabled {
            return logical;
        }
        match &self.model {
            BedLevel::Identity => logical,
            BedLevel::Plane(plane) => plane.apply(logical),
            BedLevel::Mesh(mesh) => [
                logical[0],
                logical[1],
                logical[2] + mesh.interpolate(logical[0], logical[1]),
            ],
        }
    }

    /// Physical to logical
    pub fn unapply(&self, physical: Vector3d) -> Vector3d {
        if !self.enabled {
            return physical;
        }
        match &self.model {
            BedLevel::Identity => physical,
            BedLevel::Plane(plane) => plane.unapply(physical),
            BedLevel::Mesh(mesh) => [
                physical[0],
                physical[1],
                physical[2] - mesh.interpolate(physical[0], physical[1]),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_least_squares_recovers_exact_plane() {
        let plane = PlaneFit { a: 0.01, b: -0.02, d: 0.3 };
        let points: Vec<Vector3d> = [0.0, 50.0, 100.0]
            .iter()
            .flat_map(|x| [0.0, 50.0, 100.0].map(|y| [*x, y, plane.z_at(*x, y)]))
            .collect();
        let fit = fit_plane_least_squares(&points).unwrap();
        assert!((fit.a - plane.a).abs() < EPSILON);
        assert!((fit.b - plane.b).abs() < EPSILON);
        assert!((fit.d - plane.d).abs() < EPSILON);
    }

    #[test]
    fn test_least_squares_rejects_collinear() {
        let points = [[0.0, 0.0, 0.0], [1.0, 1.0, 0.1], [2.0, 2.0, 0.2]];
        assert!(matches!(
            fit_plane_least_squares(&points),
            Err(KinematicsError::DegenerateGeometry { .. })
        ));
        assert!(matches!(
            fit_plane_least_squares(&points[..2]),
            Err(KinematicsError::InsufficientSamples { needed: 3, got: 2 })
        ));
    }

    #[test]
    fn test_three_point_plane() {
        let fit = plane_through_points([[0.0, 0.0, 1.0], [10.0, 0.0, 2.0], [0.0, 10.0, 0.0]])
            .unwrap();
        assert!((fit.a - 0.1).abs() < EPSILON);
        assert!((fit.b + 0.1).abs() < EPSILON);
        assert!((fit.d - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_plane_correction_follows_bed() {
        let plane = PlaneFit { a: 0.01, b: 0.0, d: 0.5 };
        let correction = PlaneCorrection::from_plane(&plane).unwrap();
        let physical = correction.apply([100.0, 0.0, 0.0]);
        // A point on the logical bed lands on the physical bed surface.
        assert!((physical[2] - plane.z_at(physical[0], physical[1])).abs() < 1e-6);

        let back = correction.unapply(physical);
        assert!((back[0] - 100.0).abs() < EPSILON);
        assert!(back[1].abs() < EPSILON);
        assert!(back[2].abs() < EPSILON);
    }

    #[test]
    fn test_flat_plane_is_identity() {
        let correction = PlaneCorrection::from_plane(&PlaneFit { a: 0.0, b: 0.0, d: 0.0 }).unwrap();
        assert_eq!(correction, PlaneCorrection::identity());
    }

    fn sample_mesh() -> MeshGrid {
        let mut mesh = MeshGrid::new(3, 3, [0.0, 0.0], [100.0, 100.0]).unwrap();
        let values = [[0.1, 0.2, 0.3], [0.0, -0.1, 0.05], [0.4, 0.0, -0.2]];
        for (iy, row) in values.iter().enumerate() {
            for (ix, z) in row.iter().enumerate() {
                mesh.set(ix, iy, *z);
            }
        }
        mesh
    }

    #[test]
    fn test_mesh_exact_at_grid_points() {
        let mesh = sample_mesh();
        for iy in 0..3 {
            for ix in 0..3 {
                let expected = mesh.get(ix, iy).unwrap();
                assert_eq!(mesh.interpolate(mesh.x_at(ix), mesh.y_at(iy)), expected);
            }
        }
    }

    #[test]
    fn test_mesh_cell_center_is_mean_of_corners() {
        let mesh = sample_mesh();
        let expected = (0.1 + 0.2 + 0.0 - 0.1) / 4.0;
        assert!((mesh.interpolate(25.0, 25.0) - expected).abs() < EPSILON);
    }

    #[test]
    fn test_mesh_cell_index_clamped() {
        let mesh = sample_mesh();
        assert_eq!(mesh.cell_index_x(-10.0), 0);
        assert_eq!(mesh.cell_index_x(49.0), 0);
        assert_eq!(mesh.cell_index_x(51.0), 1);
        assert_eq!(mesh.cell_index_x(100.0), 1);
        assert_eq!(mesh.cell_index_y(500.0), 1);
    }

    #[test]
    fn test_extrapolation_fills_corners_linearly() {
        let mut mesh = MeshGrid::new(5, 5, [-50.0, -50.0], [50.0, 50.0]).unwrap();
        // A tilted plane probed only inside a disk.
        for iy in 0..5 {
            for ix in 0..5 {
                let (x, y) = (mesh.x_at(ix), mesh.y_at(iy));
                if x.hypot(y) <= 51.0 {
                    mesh.set(ix, iy, 0.001 * x + 0.002 * y);
                }
            }
        }
        assert!(!mesh.is_complete());
        mesh.extrapolate_missing();
        assert!(mesh.is_complete());
        let corner = mesh.get(4, 4).unwrap();
        assert!((corner - (0.001 * 50.0 + 0.002 * 50.0)).abs() < 1e-9);
    }

    #[test]
    fn test_bed_leveling_toggle() {
        let mut leveling = BedLeveling::new();
        assert!(!leveling.set_enabled(true));
        leveling.set(BedLevel::Mesh(sample_mesh()));
        assert!(leveling.is_active());
        assert_eq!(leveling.apply([0.0, 0.0, 1.0]), [0.0, 0.0, 1.1]);
        leveling.set_enabled(false);
        assert_eq!(leveling.apply([0.0, 0.0, 1.0]), [0.0, 0.0, 1.0]);
        leveling.reset();
        assert_eq!(leveling.model(), &BedLevel::Identity);
    }
}
