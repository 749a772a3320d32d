//! Sequential warm-started inversion and joint space-time inversion over a
//! timelapse dataset.

use log::{debug, info};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use ertcore::algorithm::temporal::{resolve, TimeQuery};
use ertcore::data::snapshot::{ErrorEstimator, SurveySnapshot};

use crate::data::dataset::TimelapseDataset;
use crate::error::{ErtError, Result};
use crate::inversion::solver::{
    InversionConfig, InversionOutcome, Mesher, MultiFrameSolver, Solver, StartStrategy,
};

/// Models and goodness-of-fit of a sequential run, in processing order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SequentialResult {
    /// Resolved timestep of each processed snapshot, in request order.
    pub time_indices: Vec<usize>,
    pub models: Vec<Vec<f64>>,
    pub chi2s: Vec<f64>,
    /// Forward response of each final model, for misfit reporting.
    pub responses: Vec<Vec<f64>>,
}

/// Stacked models of a joint run: row `i` holds timestep `i`'s cells.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JointResult {
    pub models: DMatrix<f64>,
    pub chi2: f64,
}

/// Context for one inversion run: the dataset plus the mesher and error
/// estimator collaborators, owned for the duration of the run. The mesh is
/// created from the current geometry on first use and reused afterwards.
pub struct InversionRun<'a> {
    dataset: &'a mut TimelapseDataset,
    mesher: &'a dyn Mesher,
    estimator: &'a dyn ErrorEstimator,
}

impl<'a> InversionRun<'a> {
    pub fn new(
        dataset: &'a mut TimelapseDataset,
        mesher: &'a dyn Mesher,
        estimator: &'a dyn ErrorEstimator,
    ) -> Self {
        InversionRun { dataset, mesher, estimator }
    }

    /// Invert the requested timesteps one after another (default: all, in
    /// ascending order).
    ///
    /// The start model of each solve follows the configured
    /// [`StartStrategy`]; with [`StartStrategy::Fixed`] the timesteps are
    /// independent and solved concurrently. Models, chi2 values and
    /// responses accumulate strictly in request order. A failing solve
    /// aborts the whole run and reports the failing timestep; nothing
    /// partial is returned.
    pub fn invert_sequential(
        &mut self,
        solver: &dyn Solver,
        times: Option<&TimeQuery>,
        config: &InversionConfig,
    ) -> Result<SequentialResult> {
        let estimator = self.estimator;
        let survey = self.dataset.survey();
        let indices: Vec<usize> = match times {
            Some(query) => resolve(survey.times(), query)?.into_vec(),
            None => (0..survey.n_timesteps()).collect(),
        };
        if indices.is_empty() {
            return Err(ErtError::EmptyRun);
        }
        let snapshots = indices
            .iter()
            .map(|&i| survey.choose_time(&TimeQuery::Index(i), estimator))
            .collect::<ertcore::error::Result<Vec<_>>>()?;

        let mesh = self.dataset.ensure_mesh(self.mesher)?;
        let start = vec![config.start_resistivity; mesh.cell_count];
        info!(
            "sequential inversion over {} timesteps ({:?})",
            snapshots.len(),
            config.strategy
        );

        let outcomes = match config.strategy {
            StartStrategy::Fixed => snapshots
                .par_iter()
                .map(|snapshot| {
                    solver
                        .invert(snapshot, &mesh, &start, config)
                        .map_err(|e| solver_error(snapshot, e))
                })
                .collect::<Result<Vec<_>>>()?,
            _ => {
                let mut start = start;
                let mut outcomes = Vec::with_capacity(snapshots.len());
                for (pos, snapshot) in snapshots.iter().enumerate() {
                    debug!(
                        "inverting timestep {} ({}/{})",
                        snapshot.time_index,
                        pos + 1,
                        snapshots.len()
                    );
                    let outcome = solver
                        .invert(snapshot, &mesh, &start, config)
                        .map_err(|e| solver_error(snapshot, e))?;
                    if pos == 0 || config.strategy == StartStrategy::Previous {
                        start = outcome.model.clone();
                    }
                    outcomes.push(outcome);
                }
                outcomes
            }
        };

        Ok(assemble(indices, outcomes))
    }

    /// Invert all timesteps in one joint space-time system.
    ///
    /// Every timestep's snapshot is built in ascending order, the value and
    /// error vectors are concatenated, and the stacked solve runs once; the
    /// flat result is reshaped into `[timestep count, cell count]` with row
    /// `i` belonging to timestep `i`. There is no warm-start chaining.
    pub fn invert_joint(
        &mut self,
        solver: &dyn MultiFrameSolver,
        config: &InversionConfig,
    ) -> Result<JointResult> {
        let estimator = self.estimator;
        let survey = self.dataset.survey();
        let n_timesteps = survey.n_timesteps();
        if n_timesteps == 0 {
            return Err(ErtError::EmptyRun);
        }
        let snapshots = (0..n_timesteps)
            .map(|i| survey.choose_time(&TimeQuery::Index(i), estimator))
            .collect::<ertcore::error::Result<Vec<_>>>()?;

        let mesh = self.dataset.ensure_mesh(self.mesher)?;
        let data: Vec<f64> = snapshots.iter().flat_map(|s| s.rhoa.iter().copied()).collect();
        let error: Vec<f64> = snapshots.iter().flat_map(|s| s.err.iter().copied()).collect();
        info!("joint inversion over {n_timesteps} timesteps, {} data values", data.len());

        let solution = solver
            .invert_all(&snapshots, &mesh, &data, &error, config)
            .map_err(|e| ErtError::JointSolve(e.to_string()))?;

        if solution.model.is_empty() || solution.model.len() % n_timesteps != 0 {
            return Err(ErtError::JointShape {
                len: solution.model.len(),
                timesteps: n_timesteps,
            });
        }
        let cells = solution.model.len() / n_timesteps;
        let models = DMatrix::from_row_slice(n_timesteps, cells, &solution.model);
        Ok(JointResult { models, chi2: solution.chi2 })
    }
}

fn solver_error(snapshot: &SurveySnapshot, e: crate::inversion::solver::CollaboratorError) -> ErtError {
    ErtError::Solver { time_index: snapshot.time_index, detail: e.to_string() }
}

fn assemble(time_indices: Vec<usize>, outcomes: Vec<InversionOutcome>) -> SequentialResult {
    let mut result = SequentialResult { time_indices, ..Default::default() };
    for outcome in outcomes {
        result.models.push(outcome.model);
        result.chi2s.push(outcome.chi2);
        result.responses.push(outcome.response);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inversion::solver::{CollaboratorError, JointSolution, Mesh};
    use std::result::Result;
    use chrono::{NaiveDate, NaiveDateTime};
    use ertcore::data::geometry::{Quadrupole, SurveyGeometry};
    use ertcore::data::snapshot::RelativeErrorModel;
    use ertcore::data::survey::TimelapseSurvey;
    use nalgebra::Point3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CELLS: usize = 4;

    fn stamp(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn dataset(n_timesteps: usize) -> TimelapseDataset {
        let geometry = SurveyGeometry::new(
            (0..4).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect(),
            vec![
                Quadrupole::new(0, 1, 2, 3, 100.0),
                Quadrupole::new(0, 2, 1, 3, 200.0),
            ],
        );
        let values = DMatrix::from_fn(2, n_timesteps, |r, c| 40.0 + (r + c) as f64);
        let times = (1..=n_timesteps as u32).map(stamp).collect();
        let survey = TimelapseSurvey::new(geometry, values, None, times).unwrap();
        TimelapseDataset::new("test", survey)
    }

    struct CountingMesher(AtomicUsize);

    impl Mesher for CountingMesher {
        fn create_mesh(&self, _geometry: &SurveyGeometry) -> Result<Mesh, CollaboratorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Mesh { cell_count: CELLS, para_cells: (0..CELLS).collect() })
        }
    }

    fn mesher() -> CountingMesher {
        CountingMesher(AtomicUsize::new(0))
    }

    /// Returns `start + 1` in every cell, so the start-model lineage is
    /// visible in the resulting models.
    struct StepSolver;

    impl Solver for StepSolver {
        fn invert(
            &self,
            snapshot: &SurveySnapshot,
            _mesh: &Mesh,
            start_model: &[f64],
            _config: &InversionConfig,
        ) -> Result<InversionOutcome, CollaboratorError> {
            Ok(InversionOutcome {
                model: start_model.iter().map(|v| v + 1.0).collect(),
                chi2: snapshot.time_index as f64,
                response: snapshot.rhoa.clone(),
            })
        }
    }

    struct FailingSolver {
        fail_at: usize,
    }

    impl Solver for FailingSolver {
        fn invert(
            &self,
            snapshot: &SurveySnapshot,
            _mesh: &Mesh,
            start_model: &[f64],
            _config: &InversionConfig,
        ) -> Result<InversionOutcome, CollaboratorError> {
            if snapshot.time_index == self.fail_at {
                return Err("singular system".into());
            }
            Ok(InversionOutcome {
                model: start_model.to_vec(),
                chi2: 1.0,
                response: snapshot.rhoa.clone(),
            })
        }
    }

    /// Stacked model with cell values `100 * t + c`.
    struct GridJointSolver;

    impl MultiFrameSolver for GridJointSolver {
        fn invert_all(
            &self,
            snapshots: &[SurveySnapshot],
            mesh: &Mesh,
            _data: &[f64],
            _error: &[f64],
            _config: &InversionConfig,
        ) -> Result<JointSolution, CollaboratorError> {
            let mut model = Vec::with_capacity(snapshots.len() * mesh.cell_count);
            for t in 0..snapshots.len() {
                for c in 0..mesh.cell_count {
                    model.push((100 * t + c) as f64);
                }
            }
            Ok(JointSolution { model, chi2: 1.3 })
        }
    }

    struct BadLengthJointSolver;

    impl MultiFrameSolver for BadLengthJointSolver {
        fn invert_all(
            &self,
            _snapshots: &[SurveySnapshot],
            _mesh: &Mesh,
            _data: &[f64],
            _error: &[f64],
            _config: &InversionConfig,
        ) -> Result<JointSolution, CollaboratorError> {
            Ok(JointSolution { model: vec![1.0; 7], chi2: 1.0 })
        }
    }

    fn first_cells(result: &SequentialResult) -> Vec<f64> {
        result.models.iter().map(|m| m[0]).collect()
    }

    #[test]
    fn test_first_result_strategy_reuses_first_model() {
        let mut dataset = dataset(3);
        let mesher = mesher();
        let estimator = RelativeErrorModel::default();
        let mut run = InversionRun::new(&mut dataset, &mesher, &estimator);
        let result = run
            .invert_sequential(&StepSolver, None, &InversionConfig::default())
            .unwrap();

        // t0 from the uniform 100, later timesteps from t0's result.
        assert_eq!(first_cells(&result), vec![101.0, 102.0, 102.0]);
        assert_eq!(result.models.len(), 3);
        assert_eq!(result.chi2s.len(), 3);
    }

    #[test]
    fn test_previous_strategy_chains_models() {
        let mut dataset = dataset(3);
        let mesher = mesher();
        let estimator = RelativeErrorModel::default();
        let mut run = InversionRun::new(&mut dataset, &mesher, &estimator);
        let config = InversionConfig {
            strategy: StartStrategy::Previous,
            ..Default::default()
        };
        let result = run.invert_sequential(&StepSolver, None, &config).unwrap();

        assert_eq!(first_cells(&result), vec![101.0, 102.0, 103.0]);
    }

    #[test]
    fn test_fixed_strategy_is_independent_and_ordered() {
        let mut dataset = dataset(4);
        let mesher = mesher();
        let estimator = RelativeErrorModel::default();
        let mut run = InversionRun::new(&mut dataset, &mesher, &estimator);
        let config = InversionConfig { strategy: StartStrategy::Fixed, ..Default::default() };
        let result = run.invert_sequential(&StepSolver, None, &config).unwrap();

        assert_eq!(first_cells(&result), vec![101.0, 101.0, 101.0, 101.0]);
        // Output order is the request order regardless of completion order.
        assert_eq!(result.time_indices, vec![0, 1, 2, 3]);
        assert_eq!(result.chi2s, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_requested_subset_keeps_request_order() {
        let mut dataset = dataset(4);
        let mesher = mesher();
        let estimator = RelativeErrorModel::default();
        let mut run = InversionRun::new(&mut dataset, &mesher, &estimator);
        let times = TimeQuery::from(vec![2usize, 0]);
        let result = run
            .invert_sequential(&StepSolver, Some(&times), &InversionConfig::default())
            .unwrap();

        assert_eq!(result.time_indices, vec![2, 0]);
        assert_eq!(result.chi2s, vec![2.0, 0.0]);
        assert_eq!(result.responses.len(), 2);
    }

    #[test]
    fn test_failure_aborts_run_and_names_timestep() {
        let mut dataset = dataset(3);
        let mesher = mesher();
        let estimator = RelativeErrorModel::default();
        let mut run = InversionRun::new(&mut dataset, &mesher, &estimator);
        let err = run
            .invert_sequential(&FailingSolver { fail_at: 1 }, None, &InversionConfig::default())
            .unwrap_err();

        match err {
            ErtError::Solver { time_index, detail } => {
                assert_eq!(time_index, 1);
                assert!(detail.contains("singular"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_mesh_is_created_once_and_reused() {
        let mut dataset = dataset(2);
        let mesher = mesher();
        let estimator = RelativeErrorModel::default();
        let mut run = InversionRun::new(&mut dataset, &mesher, &estimator);
        run.invert_sequential(&StepSolver, None, &InversionConfig::default()).unwrap();
        run.invert_sequential(&StepSolver, None, &InversionConfig::default()).unwrap();

        assert_eq!(mesher.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_request_fails() {
        let mut dataset = dataset(0);
        let mesher = mesher();
        let estimator = RelativeErrorModel::default();
        let mut run = InversionRun::new(&mut dataset, &mesher, &estimator);
        let err = run
            .invert_sequential(&StepSolver, None, &InversionConfig::default())
            .unwrap_err();
        assert!(matches!(err, ErtError::EmptyRun));
    }

    #[test]
    fn test_joint_reshape_is_timestep_major() {
        let mut dataset = dataset(3);
        let mesher = mesher();
        let estimator = RelativeErrorModel::default();
        let mut run = InversionRun::new(&mut dataset, &mesher, &estimator);
        let result = run
            .invert_joint(&GridJointSolver, &InversionConfig::joint_defaults())
            .unwrap();

        assert_eq!(result.models.shape(), (3, CELLS));
        for t in 0..3 {
            for c in 0..CELLS {
                assert_eq!(result.models[(t, c)], (100 * t + c) as f64);
            }
        }
        assert_eq!(result.chi2, 1.3);
    }

    #[test]
    fn test_joint_rejects_indivisible_model() {
        let mut dataset = dataset(3);
        let mesher = mesher();
        let estimator = RelativeErrorModel::default();
        let mut run = InversionRun::new(&mut dataset, &mesher, &estimator);
        let err = run
            .invert_joint(&BadLengthJointSolver, &InversionConfig::joint_defaults())
            .unwrap_err();
        assert!(matches!(err, ErtError::JointShape { len: 7, timesteps: 3 }));
    }
}
