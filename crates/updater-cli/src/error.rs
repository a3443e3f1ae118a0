//! Error types for updaterctl

use thiserror::Error;
use updater_core::UpdateError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Update phase failed: {0}")]
    PhaseFailed(#[source] UpdateError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::PhaseFailed(_) => 1,
            CliError::InvalidConfiguration(_) => 2,
            CliError::InvalidPackage(_) => 3,
            CliError::InvalidRequest(_) => 4,
        }
    }
}

/// Exit code for any command error; plumbing failures map to 1.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let errors = [
            CliError::PhaseFailed(UpdateError::ResourceExtract("x".to_string())),
            CliError::InvalidConfiguration("x".to_string()),
            CliError::InvalidPackage("x".to_string()),
            CliError::InvalidRequest("x".to_string()),
        ];
        let codes: Vec<u8> = errors.iter().map(CliError::exit_code).collect();
        assert_eq!(codes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn untyped_errors_exit_with_one() {
        assert_eq!(exit_code(&anyhow::anyhow!("disk on fire")), 1);
        assert_eq!(
            exit_code(&CliError::InvalidRequest("busy".to_string()).into()),
            4
        );
    }
}
