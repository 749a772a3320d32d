//! Alignment of independently measured surveys into one timelapse store.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use ertcore::data::geometry::SurveyGeometry;
use log::{debug, warn};
use nalgebra::DMatrix;

use crate::error::{ErtError, Result};

/// One loaded survey before alignment: its own geometry, value/error
/// columns, and timestamps.
#[derive(Clone, Debug)]
pub struct RawSurvey {
    pub geometry: SurveyGeometry,
    pub values: DMatrix<f64>,
    pub errors: Option<DMatrix<f64>>,
    pub times: Vec<NaiveDateTime>,
}

/// Merges several independently measured surveys into one aligned store
/// with a consistent quadrupole row identity.
pub trait SurveyCombiner {
    fn combine(&self, parts: &[RawSurvey]) -> Result<RawSurvey>;
}

/// Default combiner: the quadrupole union in first-seen order, with
/// non-finite placeholders wherever a part did not measure a quadrupole.
/// Placeholders are masked at store construction. Electrode layout is
/// taken from the first part.
pub struct AlignedCombiner;

impl SurveyCombiner for AlignedCombiner {
    fn combine(&self, parts: &[RawSurvey]) -> Result<RawSurvey> {
        let first = parts.first().ok_or(ErtError::EmptyCombine)?;
        if parts.iter().any(|p| p.geometry.electrodes.len() != first.geometry.electrodes.len()) {
            warn!("combining surveys with differing electrode counts, keeping the first layout");
        }

        // Quadrupole union in first-seen order, keyed by electrode identity.
        let mut row_of: HashMap<(usize, usize, usize, usize), usize> = HashMap::new();
        let mut quadrupoles = Vec::new();
        for part in parts {
            for quad in &part.geometry.quadrupoles {
                row_of.entry(quad.identity()).or_insert_with(|| {
                    quadrupoles.push(*quad);
                    quadrupoles.len() - 1
                });
            }
        }

        let nrows = quadrupoles.len();
        let ncols: usize = parts.iter().map(|p| p.values.ncols()).sum();
        let has_errors = parts.iter().any(|p| p.errors.is_some());

        let mut values = DMatrix::from_element(nrows, ncols, f64::NAN);
        let mut errors = has_errors.then(|| DMatrix::from_element(nrows, ncols, f64::NAN));
        let mut times = Vec::with_capacity(ncols);

        let mut col_offset = 0;
        for part in parts {
            for (part_row, quad) in part.geometry.quadrupoles.iter().enumerate() {
                let row = row_of[&quad.identity()];
                for part_col in 0..part.values.ncols() {
                    values[(row, col_offset + part_col)] = part.values[(part_row, part_col)];
                    if let (Some(all), Some(own)) = (errors.as_mut(), part.errors.as_ref()) {
                        all[(row, col_offset + part_col)] = own[(part_row, part_col)];
                    }
                }
            }
            times.extend_from_slice(&part.times);
            col_offset += part.values.ncols();
        }

        debug!("combined {} surveys into {nrows}x{ncols}", parts.len());
        Ok(RawSurvey {
            geometry: SurveyGeometry::new(first.geometry.electrodes.clone(), quadrupoles),
            values,
            errors,
            times,
        })
    }
}
