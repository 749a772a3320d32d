//! Collaborator seams around the external forward-modeling physics: mesh
//! generation, single-timestep solves, and the stacked space-time solve.

use std::error::Error;

use ertcore::data::geometry::SurveyGeometry;
use ertcore::data::snapshot::SurveySnapshot;
use serde::{Deserialize, Serialize};

/// Error type shared by collaborator implementations.
pub type CollaboratorError = Box<dyn Error + Send + Sync>;

/// Inversion mesh descriptor produced by a [`Mesher`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mesh {
    /// Number of model cells carrying one resistivity value each.
    pub cell_count: usize,
    /// Cells of the parameter domain used for downstream reporting.
    pub para_cells: Vec<usize>,
}

/// Builds an inversion mesh from the electrode layout.
pub trait Mesher {
    fn create_mesh(&self, geometry: &SurveyGeometry) -> Result<Mesh, CollaboratorError>;
}

/// Result of a single-timestep solve.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InversionOutcome {
    /// One resistivity value per mesh cell.
    pub model: Vec<f64>,
    /// Normalized data misfit.
    pub chi2: f64,
    /// Forward response of the final model, one value per quadrupole.
    pub response: Vec<f64>,
}

/// Regularization settings forwarded to the solver.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Regularization {
    pub lambda: f64,
    /// Weight of temporal against spatial smoothness in joint runs.
    pub time_scale: f64,
}

impl Default for Regularization {
    fn default() -> Self {
        Regularization { lambda: 20.0, time_scale: 1.0 }
    }
}

/// How the start model of each sequential timestep is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartStrategy {
    /// Timestep 0 starts from the configured uniform resistivity; every
    /// later timestep starts from timestep 0's result.
    FirstResult,
    /// Each timestep starts from the immediately preceding result.
    Previous,
    /// Every timestep starts from the configured uniform resistivity.
    /// Timesteps are independent and may be solved in parallel.
    Fixed,
}

impl Default for StartStrategy {
    fn default() -> Self {
        StartStrategy::FirstResult
    }
}

/// Settings for one inversion run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InversionConfig {
    /// Uniform start resistivity used where no model is available yet.
    pub start_resistivity: f64,
    pub strategy: StartStrategy,
    pub max_iter: usize,
    pub regularization: Regularization,
}

impl Default for InversionConfig {
    fn default() -> Self {
        InversionConfig {
            start_resistivity: 100.0,
            strategy: StartStrategy::default(),
            max_iter: 20,
            regularization: Regularization::default(),
        }
    }
}

impl InversionConfig {
    /// Defaults for a joint space-time run: a tighter iteration cap, since
    /// every iteration solves all timesteps at once.
    pub fn joint_defaults() -> Self {
        InversionConfig { max_iter: 10, ..Default::default() }
    }
}

/// Inverts one timestep snapshot. Implementations must be callable from
/// worker threads so independent timesteps can be solved concurrently.
pub trait Solver: Sync {
    fn invert(
        &self,
        snapshot: &SurveySnapshot,
        mesh: &Mesh,
        start_model: &[f64],
        config: &InversionConfig,
    ) -> Result<InversionOutcome, CollaboratorError>;
}

/// Flat stacked model returned by a joint space-time solve, timestep-major.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JointSolution {
    pub model: Vec<f64>,
    pub chi2: f64,
}

/// Owns the stacked multi-frame forward operator and its joint
/// space-and-time regularization; solves all timesteps in one system.
pub trait MultiFrameSolver {
    fn invert_all(
        &self,
        snapshots: &[SurveySnapshot],
        mesh: &Mesh,
        data: &[f64],
        error: &[f64],
        config: &InversionConfig,
    ) -> Result<JointSolution, CollaboratorError>;
}
