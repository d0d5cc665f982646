use std::time::Duration;

use thiserror::Error;

/// Everything that can stop a load. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Please provide the IP of the database VM as the only argument")]
    Usage,

    #[error("Copying {path} to remote failed: {reason}")]
    Transfer { path: String, reason: String },

    #[error("Could not ssh to '{username}@{host}': {reason}")]
    Connect {
        username: String,
        host: String,
        reason: String,
    },

    /// Remote shell did not answer the way we expect, we can't trust its output anymore
    #[error("Remote shell out of sync: {0}")]
    Protocol(String),

    #[error("Error loading file {file} (exit code {exit_code}): \n{output}")]
    Load {
        file: String,
        exit_code: i32,
        output: String,
    },
}

impl LoadError {
    pub fn timeout(waiting_for: &str, after: Duration) -> LoadError {
        LoadError::Protocol(format!(
            "no {waiting_for} after {}s",
            after.as_secs_f32().round()
        ))
    }
}
