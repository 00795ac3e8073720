use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Identifier is empty")]
    Empty,

    #[error("Identifier {0:?} must start with '{1}'")]
    MissingSigil(String, char),

    #[error("Identifier {0:?} has no server name")]
    MissingServerName(String),
}

/// A single event could not be normalised. Always local to that event.
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Event is not a JSON object")]
    NotAnObject,

    #[error("Missing field `{0}`")]
    MissingField(&'static str),

    #[error("Invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid identifier: {0}")]
    Identifier(#[from] IdentifierError),
}

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("Object is not signable")]
    NotAnObject,

    #[error("No signature from {user_id} with key {key_id}")]
    MissingSignature { user_id: String, key_id: String },

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid key or signature bytes")]
    InvalidKeyBytes,

    #[error("Signature verification failed")]
    VerificationFailed,
}
