use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("unknown profile {0:?}")]
    UnknownProfile(String),

    #[error("unknown slice {0:?}")]
    UnknownSlice(String),

    #[error("invalid modifier {0:?}")]
    InvalidModifier(String),

    #[error("invalid slice name {0:?}")]
    InvalidSliceName(String),

    #[error("no enabled slices")]
    NoEnabledSlices,

    #[error("root {}: {reason}", path.display())]
    Root { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("resolve root {}: {source}", root.display())]
    Root {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

#[derive(Debug, Error)]
pub enum TruncateError {
    #[error("{0}")]
    Unreadable(#[from] io::Error),

    #[error("invalid utf-8")]
    InvalidEncoding,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("format bundle: {0}")]
    Format(#[from] std::fmt::Error),

    #[error("{0}")]
    Other(String),
}

/// Raised when a [`CancelFlag`](crate::domain::models::CancelFlag) is observed between files or steps.
#[derive(Debug, Error)]
#[error("cancelled")]
pub struct Cancelled;

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("render: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}
