//! Particle field views and material parameters.

/// Number of `f64` values in one serialized particle record.
pub const RECORD_LEN: usize = 7;

/// Borrowed view of the particle fields written to output.
///
/// All three slices are indexed by local particle id and must have the
/// same length. The problem manager owns the storage; the solver only
/// ever reads through this view.
#[derive(Clone, Copy, Debug)]
pub struct ParticleFields<'a> {
    /// Particle positions.
    pub positions: &'a [[f64; 3]],
    /// Particle velocities.
    pub velocities: &'a [[f64; 3]],
    /// Determinant of the deformation gradient per particle.
    pub j: &'a [f64],
}

impl<'a> ParticleFields<'a> {
    /// Number of particles in the view (the shortest slice bounds it).
    pub fn len(&self) -> usize {
        self.positions
            .len()
            .min(self.velocities.len())
            .min(self.j.len())
    }

    /// Whether the view holds no particles.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over particles as flat records.
    pub fn records(&self) -> impl Iterator<Item = ParticleRecord> + 'a {
        let Self {
            positions,
            velocities,
            j,
        } = *self;
        positions
            .iter()
            .zip(velocities)
            .zip(j)
            .map(|((x, v), &j)| ParticleRecord {
                position: *x,
                velocity: *v,
                j,
            })
    }
}

/// Mutable view of the particle fields, for integrators.
#[derive(Debug)]
pub struct ParticleFieldsMut<'a> {
    /// Particle positions.
    pub positions: &'a mut [[f64; 3]],
    /// Particle velocities.
    pub velocities: &'a mut [[f64; 3]],
    /// Determinant of the deformation gradient per particle.
    pub j: &'a mut [f64],
}

impl ParticleFieldsMut<'_> {
    /// Read-only reborrow.
    pub fn as_fields(&self) -> ParticleFields<'_> {
        ParticleFields {
            positions: &*self.positions,
            velocities: &*self.velocities,
            j: &*self.j,
        }
    }
}

/// One particle's output state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleRecord {
    /// Position.
    pub position: [f64; 3],
    /// Velocity.
    pub velocity: [f64; 3],
    /// Deformation gradient determinant.
    pub j: f64,
}

impl ParticleRecord {
    /// Flatten into `[x, y, z, vx, vy, vz, j]`.
    pub fn to_array(&self) -> [f64; RECORD_LEN] {
        let [x, y, z] = self.position;
        let [vx, vy, vz] = self.velocity;
        [x, y, z, vx, vy, vz, self.j]
    }

    /// Inverse of [`to_array`](Self::to_array).
    pub fn from_array(a: [f64; RECORD_LEN]) -> Self {
        Self {
            position: [a[0], a[1], a[2]],
            velocity: [a[3], a[4], a[5]],
            j: a[6],
        }
    }

    /// Euclidean norm of the velocity.
    pub fn speed(&self) -> f64 {
        self.velocity.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

/// Equation-of-state parameters of a weakly compressible fluid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    /// Bulk modulus.
    pub bulk_modulus: f64,
    /// Reference density.
    pub density: f64,
    /// Tait exponent.
    pub gamma: f64,
    /// Artificial viscosity coefficient.
    pub kappa: f64,
}

impl Material {
    /// Sound speed at deformation gradient determinant `j`.
    ///
    /// From the Tait pressure `p = K (J^-gamma - 1)` with `rho = rho0 / J`,
    /// giving `c^2 = K gamma / rho0 * J^(1 - gamma)`.
    pub fn sound_speed(&self, j: f64) -> f64 {
        (self.bulk_modulus * self.gamma / self.density * j.powf(1.0 - self.gamma)).sqrt()
    }
}
