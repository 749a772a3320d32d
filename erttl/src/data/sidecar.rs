//! Whitespace-separated text formats: the `.dat` data container and the
//! `.rhoa`/`.err`/`.times` sidecars sharing its base name.

use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use ertcore::algorithm::temporal::parse_timestamp;
use ertcore::data::geometry::{Quadrupole, SurveyGeometry};
use nalgebra::{DMatrix, Point3};

use crate::error::{ErtError, Result};

/// Timestamp layout written to `.times` sidecars.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn malformed(what: &'static str, path: &Path, line: usize, detail: impl Into<String>) -> ErtError {
    ErtError::Malformed {
        what,
        path: path.display().to_string(),
        line,
        detail: detail.into(),
    }
}

/// Read a data container: electrode count and positions, then quadrupole
/// count and `a b m n k` rows with 0-based electrode indices.
pub fn read_container(path: &Path) -> Result<SurveyGeometry> {
    let content = fs::read_to_string(path)?;
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty() && !l.trim_start().starts_with('#'));

    let (line, text) = lines
        .next()
        .ok_or_else(|| malformed("container", path, 1, "missing electrode count"))?;
    let n_electrodes: usize = text
        .trim()
        .parse()
        .map_err(|_| malformed("container", path, line + 1, "invalid electrode count"))?;

    let mut electrodes = Vec::with_capacity(n_electrodes);
    for _ in 0..n_electrodes {
        let (line, text) = lines
            .next()
            .ok_or_else(|| malformed("container", path, 0, "truncated electrode list"))?;
        let coords: Vec<f64> = text
            .split_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| malformed("container", path, line + 1, "invalid electrode position"))?;
        if coords.len() != 3 {
            return Err(malformed(
                "container",
                path,
                line + 1,
                format!("expected 3 coordinates, got {}", coords.len()),
            ));
        }
        electrodes.push(Point3::new(coords[0], coords[1], coords[2]));
    }

    let (line, text) = lines
        .next()
        .ok_or_else(|| malformed("container", path, 0, "missing quadrupole count"))?;
    let n_quadrupoles: usize = text
        .trim()
        .parse()
        .map_err(|_| malformed("container", path, line + 1, "invalid quadrupole count"))?;

    let mut quadrupoles = Vec::with_capacity(n_quadrupoles);
    for _ in 0..n_quadrupoles {
        let (line, text) = lines
            .next()
            .ok_or_else(|| malformed("container", path, 0, "truncated quadrupole list"))?;
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() != 5 {
            return Err(malformed(
                "container",
                path,
                line + 1,
                format!("expected 'a b m n k', got {} tokens", tokens.len()),
            ));
        }
        let parse_index = |t: &str| -> Result<usize> {
            t.parse()
                .map_err(|_| malformed("container", path, line + 1, "invalid electrode index"))
        };
        let k: f64 = tokens[4]
            .parse()
            .map_err(|_| malformed("container", path, line + 1, "invalid geometric factor"))?;
        quadrupoles.push(Quadrupole::new(
            parse_index(tokens[0])?,
            parse_index(tokens[1])?,
            parse_index(tokens[2])?,
            parse_index(tokens[3])?,
            k,
        ));
    }

    Ok(SurveyGeometry::new(electrodes, quadrupoles))
}

/// Write a data container in the layout accepted by [`read_container`].
pub fn write_container(path: &Path, geometry: &SurveyGeometry) -> Result<()> {
    let mut out = String::new();
    out.push_str(&format!("{}\n", geometry.electrodes.len()));
    for e in &geometry.electrodes {
        out.push_str(&format!("{} {} {}\n", e.x, e.y, e.z));
    }
    out.push_str(&format!("{}\n", geometry.quadrupoles.len()));
    for q in &geometry.quadrupoles {
        out.push_str(&format!("{} {} {} {} {:6.2}\n", q.a, q.b, q.m, q.n, q.k));
    }
    fs::write(path, out)?;
    Ok(())
}

/// Read a whitespace-separated float matrix, one row per line. All rows
/// must have the same number of columns.
pub fn read_matrix(path: &Path) -> Result<DMatrix<f64>> {
    let content = fs::read_to_string(path)?;
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut ncols = 0;
    for (line, text) in content.lines().enumerate() {
        if text.trim().is_empty() {
            continue;
        }
        let row: Vec<f64> = text
            .split_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| malformed("matrix", path, line + 1, "invalid float"))?;
        if rows.is_empty() {
            ncols = row.len();
        } else if row.len() != ncols {
            return Err(malformed(
                "matrix",
                path,
                line + 1,
                format!("expected {} columns, got {}", ncols, row.len()),
            ));
        }
        rows.push(row);
    }
    let nrows = rows.len();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Ok(DMatrix::from_row_slice(nrows, ncols, &flat))
}

/// Write a float matrix with two decimal digits per entry.
pub fn write_matrix(path: &Path, matrix: &DMatrix<f64>) -> Result<()> {
    let mut out = String::new();
    for r in 0..matrix.nrows() {
        let row: Vec<String> = (0..matrix.ncols())
            .map(|c| format!("{:6.2}", matrix[(r, c)]))
            .collect();
        out.push_str(&row.join(" "));
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

/// Read one ISO-8601 timestamp per line.
pub fn read_times(path: &Path) -> Result<Vec<NaiveDateTime>> {
    let content = fs::read_to_string(path)?;
    let mut times = Vec::new();
    for (line, text) in content.lines().enumerate() {
        if text.trim().is_empty() {
            continue;
        }
        let time = parse_timestamp(text)
            .map_err(|e| malformed("times", path, line + 1, e.to_string()))?;
        times.push(time);
    }
    Ok(times)
}

/// Write one ISO-8601 timestamp per line.
pub fn write_times(path: &Path, times: &[NaiveDateTime]) -> Result<()> {
    let mut out = String::new();
    for time in times {
        out.push_str(&format!("{}\n", time.format(TIME_FORMAT)));
    }
    fs::write(path, out)?;
    Ok(())
}
