//! Device Factory error types

use contracts::ContractError;
use thiserror::Error;

/// Device Factory specific error
#[derive(Debug, Error)]
pub enum FactoryError {
    /// A required connection parameter is missing for the driver kind
    #[error("device '{device_id}' is missing connection parameter '{param}'")]
    MissingParam { device_id: String, param: String },

    /// The binary was built without the requested driver kind
    #[error("device '{device_id}' needs the '{feature}' feature, which this build does not include")]
    DriverUnavailable {
        device_id: String,
        feature: &'static str,
    },

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl FactoryError {
    /// Create missing-parameter error
    pub fn missing_param(device_id: impl Into<String>, param: impl Into<String>) -> Self {
        Self::MissingParam {
            device_id: device_id.into(),
            param: param.into(),
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, FactoryError>;
