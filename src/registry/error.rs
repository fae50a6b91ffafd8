use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Connection to registry failed: {0}")]
    Connect(String),

    #[error("Gave up reconnecting to registry after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Malformed registry message: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
