use std::fmt;
use std::fmt::Formatter;

use chrono::NaiveDateTime;
use itertools::izip;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::algorithm::temporal::{resolve_single, TimeQuery};
use crate::algorithm::utility::median_finite_abs;
use crate::data::geometry::SurveyGeometry;
use crate::data::survey::TimelapseSurvey;
use crate::error::{CoreError, Result};

/// Relative error assigned to imputed entries so a solver keeps the row
/// but gives it no weight.
pub const MASKED_ERROR_SENTINEL: f64 = 1.0e8;

/// Imputation fallback for a column without a single finite reading.
const FALLBACK_RHOA: f64 = 1.0;

/// Per-quadrupole relative error assignment for a freshly extracted
/// snapshot.
pub trait ErrorEstimator {
    fn estimate(&self, geometry: &SurveyGeometry, rhoa: &[f64]) -> Vec<f64>;
}

/// Constant relative error fraction for every quadrupole.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RelativeErrorModel {
    pub relative: f64,
}

impl Default for RelativeErrorModel {
    fn default() -> Self {
        RelativeErrorModel { relative: 0.03 }
    }
}

impl ErrorEstimator for RelativeErrorModel {
    fn estimate(&self, _geometry: &SurveyGeometry, rhoa: &[f64]) -> Vec<f64> {
        vec![self.relative; rhoa.len()]
    }
}

/// One timestep of a timelapse survey materialized for inversion: the
/// geometry plus an imputed apparent-resistivity column and a matching
/// relative-error column.
#[derive(Clone, Debug)]
pub struct SurveySnapshot {
    pub time_index: usize,
    pub timestamp: NaiveDateTime,
    pub geometry: SurveyGeometry,
    pub rhoa: Vec<f64>,
    pub err: Vec<f64>,
    /// Rows whose reading was masked and replaced by the column median.
    pub imputed: Vec<bool>,
}

impl SurveySnapshot {
    /// Number of quadrupoles in the snapshot.
    pub fn len(&self) -> usize {
        self.rhoa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rhoa.is_empty()
    }
}

impl fmt::Display for SurveySnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SurveySnapshot(t: {}, quadrupoles: {}, imputed: {})",
            self.time_index,
            self.len(),
            self.imputed.iter().filter(|&&i| i).count()
        )
    }
}

impl TimelapseSurvey {
    /// Materialize one timestep as an immutable snapshot.
    ///
    /// The query resolves through the temporal index (integer indices pass
    /// through). The column's readings are taken as absolute values; masked
    /// entries are imputed with the median of the column's finite absolute
    /// values, which preserves the quadrupole count for later joint
    /// assembly. The estimator assigns a default relative error to every
    /// row, and originally-masked rows are then overwritten with
    /// [`MASKED_ERROR_SENTINEL`].
    pub fn choose_time(
        &self,
        t: &TimeQuery,
        estimator: &dyn ErrorEstimator,
    ) -> Result<SurveySnapshot> {
        let index = resolve_single(&self.times, t)?;
        if index >= self.values.ncols() {
            return Err(CoreError::TimeIndexOutOfRange {
                index,
                count: self.values.ncols(),
            });
        }

        let column: Vec<f64> = self.values.column(index).iter().map(|v| v.abs()).collect();
        let imputed: Vec<bool> = self.mask.column(index).iter().copied().collect();
        let median = median_finite_abs(&column).unwrap_or_else(|| {
            warn!("timestep {index} has no finite reading, imputing {FALLBACK_RHOA}");
            FALLBACK_RHOA
        });

        let rhoa: Vec<f64> = izip!(&column, &imputed)
            .map(|(&value, &masked)| if masked || !value.is_finite() { median } else { value })
            .collect();

        let mut err = estimator.estimate(&self.geometry, &rhoa);
        for (e, &masked) in izip!(&mut err, &imputed) {
            if masked {
                *e = MASKED_ERROR_SENTINEL;
            }
        }

        Ok(SurveySnapshot {
            time_index: index,
            timestamp: self.times[index],
            geometry: self.geometry.clone(),
            rhoa,
            err,
            imputed,
        })
    }
}
