//! Error taxonomy, organized by kind rather than by failure source.

use crate::tag::Tag;
use thiserror::Error;

/// Invalid configuration supplied to a constructor or `resize`. Failing
/// the call leaves the existing state untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DAG capacity must be at least 1, got {0}")]
    InvalidCapacity(usize),

    #[error("cannot resize DAG to capacity {new} while it holds {current} live nodes")]
    ResizeBelowCurrentSize { current: usize, new: usize },
}

/// A task's closure failed to produce its value. Returned from
/// [`crate::Task::fetch`].
#[derive(Debug, Error, Clone)]
pub enum TaskError {
    #[error("task {tag} (\"{label}\") panicked")]
    Panicked { tag: Tag, label: String },

    #[error("task {tag} was never scheduled because predecessor {predecessor} failed")]
    PredecessorFailed { tag: Tag, predecessor: Tag },

    #[error("task {tag} was cancelled")]
    Cancelled { tag: Tag },
}

/// Top-level error for `TaskGraph`-level operations.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("task failed: {0}")]
    Task(#[from] TaskError),

    #[error("graph is wedged by a prior unrecovered failure; call empty!() to reset")]
    Wedged,
}
