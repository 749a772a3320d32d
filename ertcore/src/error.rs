use thiserror::Error;

/// Errors raised by the core timelapse data structures and algorithms.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("geometry has {geometry} quadrupoles but value matrix has {rows} rows")]
    GeometryMismatch { geometry: usize, rows: usize },

    #[error("{name} matrix is {got_rows}x{got_cols}, expected {rows}x{cols}")]
    ShapeMismatch {
        name: &'static str,
        got_rows: usize,
        got_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("{count} timestamps for {cols} timestep columns")]
    TimeCountMismatch { count: usize, cols: usize },

    #[error("timestep index {index} out of range for {count} timesteps")]
    TimeIndexOutOfRange { index: usize, count: usize },

    #[error("cannot parse '{text}' as a timestamp")]
    TimeParse { text: String },

    #[error("time query resolved to {count} indices where a single index was expected")]
    NotScalar { count: usize },

    #[error("no timestamps available to resolve a time query")]
    EmptyTimeAxis,
}

pub type Result<T> = std::result::Result<T, CoreError>;
