use std::fmt;
use std::fmt::Formatter;

use chrono::NaiveDateTime;
use log::{debug, info};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::algorithm::index_set::symmetric_difference;
use crate::algorithm::masking;
use crate::algorithm::temporal::{resolve, resolve_single, TimeQuery};
use crate::data::geometry::SurveyGeometry;
use crate::error::{CoreError, Result};

/// Default apparent-resistivity bounds applied when a store with readings
/// is constructed.
pub const DEFAULT_RHOA_MIN: f64 = 0.1;
pub const DEFAULT_RHOA_MAX: f64 = 1.0e6;

/// Temporal and geometric filter settings. Every field is optional; an
/// absent trigger skips its axis entirely.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilterParams {
    /// First timestep to keep (default: the first column).
    pub tmin: Option<TimeQuery>,
    /// End of the kept range, exclusive (default: past the last column).
    pub tmax: Option<TimeQuery>,
    /// Timesteps combined with the kept range by symmetric difference.
    pub exclude: Option<TimeQuery>,
    /// Explicit keep-set; overrides `tmin`/`tmax`/`exclude`.
    pub select: Option<TimeQuery>,
    /// Keep only quadrupoles with `|k| < kmax`.
    pub kmax: Option<f64>,
}

impl FilterParams {
    fn wants_temporal(&self) -> bool {
        self.tmin.is_some() || self.tmax.is_some() || self.exclude.is_some() || self.select.is_some()
    }
}

/// In-memory store of a multi-timestep resistivity survey.
///
/// Rows of the value matrix are quadrupoles, columns are timesteps. The
/// error matrix (when present) and the mask share the value matrix shape,
/// and there is exactly one timestamp per column. All destructive
/// operations act on geometry, values, errors, mask and timestamps
/// together, so the shapes never drift apart.
#[derive(Clone, Debug)]
pub struct TimelapseSurvey {
    pub(crate) geometry: SurveyGeometry,
    pub(crate) values: DMatrix<f64>,
    pub(crate) errors: Option<DMatrix<f64>>,
    pub(crate) mask: DMatrix<bool>,
    pub(crate) times: Vec<NaiveDateTime>,
}

impl TimelapseSurvey {
    /// Build a store and validate all shape invariants. A store with
    /// readings is immediately masked with the default resistivity bounds.
    pub fn new(
        geometry: SurveyGeometry,
        values: DMatrix<f64>,
        errors: Option<DMatrix<f64>>,
        times: Vec<NaiveDateTime>,
    ) -> Result<Self> {
        if values.nrows() != geometry.len() {
            return Err(CoreError::GeometryMismatch {
                geometry: geometry.len(),
                rows: values.nrows(),
            });
        }
        if let Some(err) = &errors {
            if err.shape() != values.shape() {
                return Err(CoreError::ShapeMismatch {
                    name: "error",
                    got_rows: err.nrows(),
                    got_cols: err.ncols(),
                    rows: values.nrows(),
                    cols: values.ncols(),
                });
            }
        }
        if times.len() != values.ncols() {
            return Err(CoreError::TimeCountMismatch {
                count: times.len(),
                cols: values.ncols(),
            });
        }

        let mask = DMatrix::from_element(values.nrows(), values.ncols(), false);
        let mut survey = TimelapseSurvey { geometry, values, errors, mask, times };
        if survey.values.ncols() > 0 {
            survey.mask(DEFAULT_RHOA_MIN, DEFAULT_RHOA_MAX, None);
        }
        Ok(survey)
    }

    /// A store carrying geometry only, without any timestep columns.
    pub fn without_values(geometry: SurveyGeometry) -> Self {
        let rows = geometry.len();
        TimelapseSurvey {
            geometry,
            values: DMatrix::zeros(rows, 0),
            errors: None,
            mask: DMatrix::from_element(rows, 0, false),
            times: Vec::new(),
        }
    }

    pub fn geometry(&self) -> &SurveyGeometry {
        &self.geometry
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn errors(&self) -> Option<&DMatrix<f64>> {
        self.errors.as_ref()
    }

    pub fn mask_matrix(&self) -> &DMatrix<bool> {
        &self.mask
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    /// Number of quadrupoles (matrix rows).
    pub fn n_quadrupoles(&self) -> usize {
        self.values.nrows()
    }

    /// Number of timesteps (matrix columns).
    pub fn n_timesteps(&self) -> usize {
        self.values.ncols()
    }

    /// Number of currently masked entries.
    pub fn n_masked(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Mark readings outside `[rmin, rmax]` or non-finite as invalid; with
    /// `emax`, additionally mark entries whose relative error exceeds it.
    /// Marks accumulate and never change the numeric values.
    pub fn mask(&mut self, rmin: f64, rmax: f64, emax: Option<f64>) {
        if self.values.ncols() == 0 {
            return;
        }
        let invalid = masking::outside_or_nonfinite(&self.values, rmin, rmax);
        self.mask = masking::or(&self.mask, &invalid);
        if let (Some(emax), Some(errors)) = (emax, &self.errors) {
            let noisy = masking::error_exceeds(errors, emax);
            self.mask = masking::or(&self.mask, &noisy);
        }
        debug!(
            "mask [{rmin}, {rmax}] emax={emax:?}: {} of {} entries flagged",
            self.n_masked(),
            self.values.len()
        );
    }

    /// Remove timesteps and/or quadrupoles permanently.
    ///
    /// The temporal axis keeps either the explicit `select` set or the
    /// half-open resolved range `[tmin, tmax)`, combined with `exclude` by
    /// symmetric difference; values, errors, mask and timestamps shrink in
    /// lockstep. The geometric axis then drops every quadrupole with
    /// `|k| >= kmax` from geometry and all matrices. There is no undo.
    pub fn filter(&mut self, params: &FilterParams) -> Result<()> {
        if params.wants_temporal() && self.values.ncols() > 0 {
            let keep = self.temporal_keep_set(params)?;
            if let Some(&bad) = keep.iter().find(|&&i| i >= self.values.ncols()) {
                return Err(CoreError::TimeIndexOutOfRange {
                    index: bad,
                    count: self.values.ncols(),
                });
            }
            self.values = self.values.select_columns(&keep);
            self.mask = self.mask.select_columns(&keep);
            if let Some(errors) = self.errors.take() {
                self.errors = Some(errors.select_columns(&keep));
            }
            self.times = keep.iter().map(|&i| self.times[i]).collect();
            info!("temporal filter kept {} timesteps", keep.len());
        }

        if let Some(kmax) = params.kmax {
            let keep: Vec<usize> = self
                .geometry
                .quadrupoles
                .iter()
                .enumerate()
                .filter(|(_, q)| q.k.abs() < kmax)
                .map(|(i, _)| i)
                .collect();
            self.geometry = self.geometry.select(&keep);
            self.values = self.values.select_rows(&keep);
            self.mask = self.mask.select_rows(&keep);
            if let Some(errors) = self.errors.take() {
                self.errors = Some(errors.select_rows(&keep));
            }
            info!("geometric filter |k| < {kmax} kept {} quadrupoles", keep.len());
        }
        Ok(())
    }

    fn temporal_keep_set(&self, params: &FilterParams) -> Result<Vec<usize>> {
        if let Some(select) = &params.select {
            return Ok(resolve(&self.times, select)?.into_vec());
        }
        let lo = match &params.tmin {
            Some(query) => resolve_single(&self.times, query)?,
            None => 0,
        };
        let hi = match &params.tmax {
            Some(query) => resolve_single(&self.times, query)?,
            None => self.values.ncols(),
        };
        let range: Vec<usize> = (lo..hi).collect();
        match &params.exclude {
            Some(query) => {
                let excluded = resolve(&self.times, query)?.into_vec();
                Ok(symmetric_difference(&range, &excluded))
            }
            None => Ok(range),
        }
    }
}

impl fmt::Display for TimelapseSurvey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TimelapseSurvey(quadrupoles: {}, timesteps: {})",
            self.n_quadrupoles(),
            self.n_timesteps()
        )
    }
}
