//! Grid boundary conditions handed to the time integrator.

/// Treatment of grid velocity on one face of the global domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BoundaryType {
    /// Velocity is left unconstrained.
    #[default]
    Free,
    /// Velocity is zeroed on the face.
    NoSlip,
}

/// Per-face boundary types plus the global node index range they apply to.
///
/// Faces are ordered `-x, -y, -z, +x, +y, +z`. The solver overwrites
/// `min`/`max` with the mesh's global node bounds at construction, so
/// callers only need to choose the face types.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BoundaryCondition {
    /// Boundary type per face.
    pub faces: [BoundaryType; 6],
    /// Lowest global node index of the domain, per dimension.
    pub min: [i64; 3],
    /// One past the highest global node index of the domain, per dimension.
    pub max: [i64; 3],
}

impl BoundaryCondition {
    /// All six faces with the same treatment.
    pub fn uniform(kind: BoundaryType) -> Self {
        Self {
            faces: [kind; 6],
            ..Self::default()
        }
    }

    /// Copy of `self` restricted to the given global node range.
    pub fn with_domain(mut self, min: [i64; 3], max: [i64; 3]) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Whether global node index `node` lies on a no-slip face.
    pub fn is_no_slip(&self, node: [i64; 3]) -> bool {
        (0..3).any(|d| {
            (node[d] <= self.min[d] && self.faces[d] == BoundaryType::NoSlip)
                || (node[d] >= self.max[d] - 1 && self.faces[d + 3] == BoundaryType::NoSlip)
        })
    }
}
