//! Error types shared by every stage of a study: input reading, graph
//! building, subproblem solving and output writing.

use crate::graph::GraphBuildingError;
use crate::solver::{HighsModelStatus, HighsStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SddpError {
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphBuildingError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Subproblem of node {node_id} finished with status {status:?}")]
    Solver {
        node_id: usize,
        status: HighsModelStatus,
    },

    #[error("HiGHS call failed with status {0:?}")]
    SolverCall(HighsStatus),

    #[error("Risk measure kind {0} not supported")]
    UnsupportedRiskMeasure(String),

    #[error("Invalid distribution: {0}")]
    Distribution(String),

    #[error("Invalid cut file: {0}")]
    CutFile(String),
}

impl SddpError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<HighsStatus> for SddpError {
    fn from(status: HighsStatus) -> Self {
        Self::SolverCall(status)
    }
}

pub type Result<T> = std::result::Result<T, SddpError>;
