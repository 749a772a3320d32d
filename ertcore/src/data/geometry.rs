use std::fmt;
use std::fmt::Formatter;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Four-electrode measurement configuration: current pair (a, b) and
/// potential pair (m, n) as indices into the electrode list, plus the
/// configuration-dependent geometric factor relating resistance to
/// apparent resistivity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quadrupole {
    pub a: usize,
    pub b: usize,
    pub m: usize,
    pub n: usize,
    pub k: f64,
}

impl Quadrupole {
    /// Creates a new `Quadrupole`.
    ///
    /// # Arguments
    ///
    /// * `a`, `b` - current electrode indices.
    /// * `m`, `n` - potential electrode indices.
    /// * `k` - geometric factor.
    ///
    /// # Examples
    ///
    /// ```
    /// use ertcore::data::geometry::Quadrupole;
    ///
    /// let quad = Quadrupole::new(0, 1, 2, 3, 120.5);
    /// assert_eq!(quad.k, 120.5);
    /// ```
    pub fn new(a: usize, b: usize, m: usize, n: usize, k: f64) -> Self {
        Quadrupole { a, b, m, n, k }
    }

    /// Electrode identity of the configuration, independent of the
    /// geometric factor. Two measurements of the same quadrupole across
    /// surveys share this key.
    pub fn identity(&self) -> (usize, usize, usize, usize) {
        (self.a, self.b, self.m, self.n)
    }
}

impl fmt::Display for Quadrupole {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Quadrupole(a: {}, b: {}, m: {}, n: {}, k: {})",
            self.a, self.b, self.m, self.n, self.k
        )
    }
}

/// Electrode layout and measurement scheme of a survey.
///
/// The quadrupole order defines the row identity shared by every timestep
/// column of a timelapse store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyGeometry {
    pub electrodes: Vec<Point3<f64>>,
    pub quadrupoles: Vec<Quadrupole>,
}

impl SurveyGeometry {
    pub fn new(electrodes: Vec<Point3<f64>>, quadrupoles: Vec<Quadrupole>) -> Self {
        SurveyGeometry { electrodes, quadrupoles }
    }

    /// Number of quadrupoles, i.e. rows of the associated value matrix.
    pub fn len(&self) -> usize {
        self.quadrupoles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quadrupoles.is_empty()
    }

    /// Geometric factors in row order.
    pub fn geometric_factors(&self) -> Vec<f64> {
        self.quadrupoles.iter().map(|q| q.k).collect()
    }

    /// New geometry keeping only the quadrupoles at `keep`, in the given
    /// order. The electrode list is left untouched.
    pub fn select(&self, keep: &[usize]) -> SurveyGeometry {
        let quadrupoles = keep.iter().map(|&i| self.quadrupoles[i]).collect();
        SurveyGeometry { electrodes: self.electrodes.clone(), quadrupoles }
    }
}

impl fmt::Display for SurveyGeometry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SurveyGeometry(electrodes: {}, quadrupoles: {})",
            self.electrodes.len(),
            self.quadrupoles.len()
        )
    }
}
