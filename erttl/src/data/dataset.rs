use std::fmt;
use std::fmt::Formatter;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime, Utc};
use log::{info, warn};
use nalgebra::DMatrix;
use serde::Serialize;
use walkdir::WalkDir;

use ertcore::algorithm::temporal::TimeQuery;
use ertcore::data::snapshot::{ErrorEstimator, SurveySnapshot};
use ertcore::data::survey::{FilterParams, TimelapseSurvey};

use crate::data::combine::{AlignedCombiner, RawSurvey, SurveyCombiner};
use crate::data::sidecar;
use crate::error::{ErtError, Result};
use crate::inversion::scheduler::SequentialResult;
use crate::inversion::solver::{InversionConfig, Mesh, Mesher};

/// A named timelapse dataset: the core store plus the inversion mesh and
/// persistence metadata.
#[derive(Debug)]
pub struct TimelapseDataset {
    name: String,
    survey: TimelapseSurvey,
    mesh: Option<Mesh>,
}

impl TimelapseDataset {
    /// Wrap an in-memory store under a dataset name.
    pub fn new(name: impl Into<String>, survey: TimelapseSurvey) -> Self {
        TimelapseDataset { name: name.into(), survey, mesh: None }
    }

    /// Load a dataset from `<base>.dat` plus optional sidecars, or merge
    /// several containers matched by a `*` pattern through the default
    /// combiner.
    pub fn load(path: &str) -> Result<Self> {
        if path.contains('*') {
            Self::load_glob(path, &AlignedCombiner)
        } else {
            Self::load_single(Path::new(path))
        }
    }

    fn load_single(path: &Path) -> Result<Self> {
        let raw = read_raw(path)?;
        let name = path.with_extension("").display().to_string();
        Self::from_raw(name, raw)
    }

    /// Load every container matching `pattern` and merge them through
    /// `combiner`. The pattern's `*` expands against file names in the
    /// parent directory.
    pub fn load_glob(pattern: &str, combiner: &dyn SurveyCombiner) -> Result<Self> {
        let paths = expand_glob(pattern)?;
        if paths.is_empty() {
            return Err(ErtError::EmptyGlob { pattern: pattern.to_string() });
        }
        info!("merging {} surveys matching {pattern}", paths.len());
        let parts = paths
            .iter()
            .map(|p| read_raw(p))
            .collect::<Result<Vec<_>>>()?;
        let merged = combiner.combine(&parts)?;
        let name = Path::new(pattern)
            .with_extension("")
            .display()
            .to_string()
            .replace('*', "All");
        Self::from_raw(name, merged)
    }

    fn from_raw(name: String, raw: RawSurvey) -> Result<Self> {
        let ncols = raw.values.ncols();
        let times = if raw.times.len() == ncols {
            raw.times
        } else {
            if !raw.times.is_empty() {
                warn!(
                    "{} timestamps for {ncols} timesteps, synthesizing one-per-day stamps",
                    raw.times.len()
                );
            }
            default_times(ncols)
        };
        let survey = TimelapseSurvey::new(raw.geometry, raw.values, raw.errors, times)?;
        info!("loaded {name}: {survey}");
        Ok(TimelapseDataset { name, survey, mesh: None })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn survey(&self) -> &TimelapseSurvey {
        &self.survey
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        self.mesh.as_ref()
    }

    /// Build (or rebuild) the inversion mesh from the current geometry.
    pub fn create_mesh(&mut self, mesher: &dyn Mesher) -> Result<&Mesh> {
        let mesh = mesher
            .create_mesh(self.survey.geometry())
            .map_err(|e| ErtError::Mesh(e.to_string()))?;
        info!("created mesh with {} cells", mesh.cell_count);
        Ok(self.mesh.insert(mesh))
    }

    /// Reuse the existing mesh or create one on first use.
    pub(crate) fn ensure_mesh(&mut self, mesher: &dyn Mesher) -> Result<Mesh> {
        match &self.mesh {
            Some(mesh) => Ok(mesh.clone()),
            None => Ok(self.create_mesh(mesher)?.clone()),
        }
    }

    /// Mark readings outside `[rmin, rmax]` or, with `emax`, readings with
    /// too large a relative error. Delegates to the core store.
    pub fn mask(&mut self, rmin: f64, rmax: f64, emax: Option<f64>) {
        self.survey.mask(rmin, rmax, emax);
    }

    /// Remove timesteps and/or quadrupoles permanently. Invalidates the
    /// mesh when the geometry shrinks.
    pub fn filter(&mut self, params: &FilterParams) -> Result<()> {
        let rows_before = self.survey.n_quadrupoles();
        self.survey.filter(params)?;
        if self.survey.n_quadrupoles() != rows_before {
            self.mesh = None;
        }
        Ok(())
    }

    /// Materialize one timestep for inversion.
    pub fn choose_time(
        &self,
        t: &TimeQuery,
        estimator: &dyn ErrorEstimator,
    ) -> Result<SurveySnapshot> {
        Ok(self.survey.choose_time(t, estimator)?)
    }

    /// Write the container and every present sidecar under `base` (default:
    /// the current name), which becomes the dataset's name.
    pub fn save(&mut self, base: Option<&str>) -> Result<()> {
        let base = base.unwrap_or(&self.name).to_string();
        let base_path = PathBuf::from(&base);

        sidecar::write_container(&base_path.with_extension("dat"), self.survey.geometry())?;
        if self.survey.n_timesteps() > 0 {
            sidecar::write_matrix(&base_path.with_extension("rhoa"), self.survey.values())?;
        }
        if let Some(errors) = self.survey.errors() {
            sidecar::write_matrix(&base_path.with_extension("err"), errors)?;
        }
        sidecar::write_times(&base_path.with_extension("times"), self.survey.times())?;

        info!("saved {base}");
        self.name = base;
        Ok(())
    }

    /// Export a sequential-run summary as `<name>-inv.json`.
    pub fn save_results(
        &self,
        result: &SequentialResult,
        config: &InversionConfig,
    ) -> Result<PathBuf> {
        #[derive(Serialize)]
        struct Summary<'a> {
            name: &'a str,
            times: Vec<String>,
            time_indices: &'a [usize],
            chi2s: &'a [f64],
            models: &'a [Vec<f64>],
            config: &'a InversionConfig,
        }

        let times = result
            .time_indices
            .iter()
            .map(|&i| self.survey.times()[i].format(sidecar::TIME_FORMAT).to_string())
            .collect();
        let summary = Summary {
            name: &self.name,
            times,
            time_indices: &result.time_indices,
            chi2s: &result.chi2s,
            models: &result.models,
            config,
        };

        let path = PathBuf::from(format!("{}-inv.json", self.name));
        serde_json::to_writer_pretty(File::create(&path)?, &summary)?;
        info!("wrote inversion summary to {}", path.display());
        Ok(path)
    }
}

impl fmt::Display for TimelapseDataset {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Timelapse ERT data {}: {}", self.name, self.survey)?;
        let times = self.survey.times();
        if let (Some(first), Some(last)) = (times.first(), times.last()) {
            write!(
                f,
                " from {} to {}",
                first.format(sidecar::TIME_FORMAT),
                last.format(sidecar::TIME_FORMAT)
            )?;
        }
        Ok(())
    }
}

/// Container plus sidecars as stored on disk, before alignment or time
/// synthesis.
fn read_raw(path: &Path) -> Result<RawSurvey> {
    if !path.is_file() {
        return Err(ErtError::MissingContainer { path: path.display().to_string() });
    }
    let geometry = sidecar::read_container(path)?;

    let rhoa_path = path.with_extension("rhoa");
    let values = if rhoa_path.is_file() {
        sidecar::read_matrix(&rhoa_path)?
    } else {
        warn!("no .rhoa sidecar for {}, loading geometry only", path.display());
        DMatrix::zeros(geometry.len(), 0)
    };

    let err_path = path.with_extension("err");
    let errors = if err_path.is_file() {
        Some(sidecar::read_matrix(&err_path)?)
    } else {
        None
    };

    let times_path = path.with_extension("times");
    let times = if times_path.is_file() {
        sidecar::read_times(&times_path)?
    } else {
        Vec::new()
    };

    Ok(RawSurvey { geometry, values, errors, times })
}

/// One-per-day timestamps starting now, used when no usable `.times`
/// sidecar exists.
fn default_times(count: usize) -> Vec<NaiveDateTime> {
    let start = Utc::now().naive_utc();
    (0..count).map(|i| start + Duration::days(i as i64)).collect()
}

/// Expand a single-`*` file pattern against its parent directory.
fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(pattern);
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_pattern = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (prefix, suffix) = match file_pattern.split_once('*') {
        Some(parts) => parts,
        None => (file_pattern.as_str(), ""),
    };

    let mut matches: Vec<PathBuf> = WalkDir::new(&dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.starts_with(prefix)
                && name.ends_with(suffix)
                && name.len() >= prefix.len() + suffix.len()
        })
        .map(|entry| entry.into_path())
        .collect();
    matches.sort();
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ertcore::data::geometry::{Quadrupole, SurveyGeometry};
    use nalgebra::Point3;
    use tempfile::tempdir;

    fn stamp(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, day)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn geometry() -> SurveyGeometry {
        SurveyGeometry::new(
            (0..4).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect(),
            vec![
                Quadrupole::new(0, 1, 2, 3, 150.0),
                Quadrupole::new(0, 2, 1, 3, 420.0),
            ],
        )
    }

    fn sample_dataset() -> TimelapseDataset {
        let values = DMatrix::from_row_slice(2, 3, &[10.0, 11.0, 12.0, 20.0, 21.0, 22.0]);
        let errors = DMatrix::from_element(2, 3, 0.04);
        let times = (1..=3).map(stamp).collect();
        let survey = TimelapseSurvey::new(geometry(), values, Some(errors), times).unwrap();
        TimelapseDataset::new("sample", survey)
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("field").display().to_string();

        let mut dataset = sample_dataset();
        dataset.save(Some(&base)).unwrap();
        let reloaded = TimelapseDataset::load(&format!("{base}.dat")).unwrap();

        assert_eq!(reloaded.survey().n_quadrupoles(), 2);
        assert_eq!(reloaded.survey().n_timesteps(), 3);
        assert_eq!(reloaded.survey().values(), dataset.survey().values());
        assert_eq!(reloaded.survey().errors(), dataset.survey().errors());
        assert_eq!(reloaded.survey().times(), dataset.survey().times());
        assert_eq!(reloaded.name(), base);
    }

    #[test]
    fn test_missing_container_is_fatal() {
        let err = TimelapseDataset::load("/nonexistent/survey.dat").unwrap_err();
        assert!(matches!(err, ErtError::MissingContainer { .. }));
    }

    #[test]
    fn test_missing_sidecars_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bare.dat");
        sidecar::write_container(&path, &geometry()).unwrap();

        let dataset = TimelapseDataset::load(&path.display().to_string()).unwrap();
        assert_eq!(dataset.survey().n_timesteps(), 0);
        assert!(dataset.survey().errors().is_none());
    }

    #[test]
    fn test_mismatched_times_are_synthesized() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("drift");
        sidecar::write_container(&base.with_extension("dat"), &geometry()).unwrap();
        sidecar::write_matrix(
            &base.with_extension("rhoa"),
            &DMatrix::from_element(2, 3, 42.0),
        )
        .unwrap();
        sidecar::write_times(&base.with_extension("times"), &[stamp(1)]).unwrap();

        let dataset =
            TimelapseDataset::load(&base.with_extension("dat").display().to_string()).unwrap();
        let times = dataset.survey().times();
        assert_eq!(times.len(), 3);
        // Synthesized stamps are one day apart.
        assert_eq!(times[1] - times[0], Duration::days(1));
    }

    #[test]
    fn test_glob_load_merges_and_renames() {
        let dir = tempdir().unwrap();
        for (index, day) in [1u32, 2].iter().enumerate() {
            let base = dir.path().join(format!("run{index}"));
            sidecar::write_container(&base.with_extension("dat"), &geometry()).unwrap();
            sidecar::write_matrix(
                &base.with_extension("rhoa"),
                &DMatrix::from_element(2, 1, 30.0 + *day as f64),
            )
            .unwrap();
            sidecar::write_times(&base.with_extension("times"), &[stamp(*day)]).unwrap();
        }

        let pattern = dir.path().join("run*.dat").display().to_string();
        let dataset = TimelapseDataset::load(&pattern).unwrap();

        assert_eq!(dataset.survey().n_quadrupoles(), 2);
        assert_eq!(dataset.survey().n_timesteps(), 2);
        assert_eq!(dataset.survey().values()[(0, 0)], 31.0);
        assert_eq!(dataset.survey().values()[(0, 1)], 32.0);
        assert!(dataset.name().ends_with("runAll"));
    }

    #[test]
    fn test_glob_without_matches_fails() {
        let dir = tempdir().unwrap();
        let pattern = dir.path().join("missing*.dat").display().to_string();
        let err = TimelapseDataset::load(&pattern).unwrap_err();
        assert!(matches!(err, ErtError::EmptyGlob { .. }));
    }

    #[test]
    fn test_filter_drops_mesh_only_on_geometry_change() {
        let mut dataset = sample_dataset();
        dataset.mesh = Some(Mesh { cell_count: 10, para_cells: vec![] });

        let temporal = FilterParams {
            tmin: Some(ertcore::algorithm::temporal::TimeQuery::Index(1)),
            ..Default::default()
        };
        dataset.filter(&temporal).unwrap();
        assert!(dataset.mesh().is_some());

        let geometric = FilterParams { kmax: Some(200.0), ..Default::default() };
        dataset.filter(&geometric).unwrap();
        assert!(dataset.mesh().is_none());
    }

    #[test]
    fn test_display_mentions_span() {
        let dataset = sample_dataset();
        let text = dataset.to_string();
        assert!(text.contains("sample"));
        assert!(text.contains("2024-04-01T09:00:00"));
        assert!(text.contains("2024-04-03T09:00:00"));
    }
}
