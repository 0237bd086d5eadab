use crate::backup::result_error::WithMsg;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Encrypt(#[from] age::EncryptError),
    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error(transparent)]
    Glob(#[from] globset::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error("configuration document {path:?} is corrupt:\n{}", indent::indent_all_with("  ", source.to_string()))]
    ConfigCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("decryption failed: {reason}")]
    CipherFailure { reason: String },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl From<age::DecryptError> for Error {
    fn from(value: age::DecryptError) -> Self {
        Self::CipherFailure {
            reason: value.to_string(),
        }
    }
}

impl Error {
    /// True for errors raised by decryption/authentication rather than plain I/O.
    pub fn is_cipher_failure(&self) -> bool {
        match self {
            Error::CipherFailure { .. } => true,
            Error::WithMsg { error, .. } => error.is_cipher_failure(),
            _ => false,
        }
    }
}
