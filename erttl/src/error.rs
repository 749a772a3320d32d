use ertcore::error::CoreError;
use thiserror::Error;

/// Errors raised while loading, combining, persisting, or inverting
/// timelapse datasets.
#[derive(Error, Debug)]
pub enum ErtError {
    #[error("data container not found: {path}")]
    MissingContainer { path: String },

    #[error("malformed {what} in {path}, line {line}: {detail}")]
    Malformed {
        what: &'static str,
        path: String,
        line: usize,
        detail: String,
    },

    #[error("no files match pattern {pattern}")]
    EmptyGlob { pattern: String },

    #[error("nothing to combine")]
    EmptyCombine,

    #[error("mesh generation failed: {0}")]
    Mesh(String),

    #[error("inversion failed at timestep {time_index}: {detail}")]
    Solver { time_index: usize, detail: String },

    #[error("joint inversion failed: {0}")]
    JointSolve(String),

    #[error("joint model of length {len} does not divide into {timesteps} timesteps")]
    JointShape { len: usize, timesteps: usize },

    #[error("no timesteps to invert")]
    EmptyRun,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ErtError>;
