//! Classified error taxonomy for environment operations.
//!
//! Every error crossing a component boundary is tagged as a user error
//! (the caller's revision is invalid: bad config, missing charts, chart
//! execution failure) or a system error (infrastructure fault: DB,
//! cluster, blob store, transport). The tag survives wrapping, so
//! telemetry and user-facing reports stay correctly attributed no matter
//! how many layers add context.

use qaenv_state::StorageError;

type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of an operation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    User,
    System,
    Unclassified,
}

/// An operation error carrying its classification and cause chain.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct EnvError {
    message: String,
    class: ErrorClass,
    #[source]
    source: Option<BoxedCause>,
}

impl EnvError {
    /// Tag an error as a user error, preserving its cause chain. Re-tags
    /// an already classified error.
    pub fn user(err: impl Into<BoxedCause>) -> Self {
        Self::tag(ErrorClass::User, err.into())
    }

    /// Tag an error as a system error, preserving its cause chain. Re-tags
    /// an already classified error.
    pub fn system(err: impl Into<BoxedCause>) -> Self {
        Self::tag(ErrorClass::System, err.into())
    }

    /// A user error from a bare message.
    pub fn user_msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: ErrorClass::User,
            source: None,
        }
    }

    /// A system error from a bare message.
    pub fn system_msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: ErrorClass::System,
            source: None,
        }
    }

    /// An unclassified error, preserving the cause chain.
    pub fn unclassified(err: impl Into<BoxedCause>) -> Self {
        let cause = err.into();
        match cause.downcast::<EnvError>() {
            Ok(e) => *e,
            Err(cause) => Self {
                message: cause.to_string(),
                class: ErrorClass::Unclassified,
                source: Some(cause),
            },
        }
    }

    fn tag(class: ErrorClass, cause: BoxedCause) -> Self {
        match cause.downcast::<EnvError>() {
            Ok(e) => {
                let mut e = *e;
                e.class = class;
                e
            }
            Err(cause) => Self {
                message: cause.to_string(),
                class,
                source: Some(cause),
            },
        }
    }

    /// Wrap with a human-readable message, keeping the classification and
    /// the original as the source.
    pub fn wrap(self, message: impl std::fmt::Display) -> Self {
        Self {
            message: format!("{message}: {self}"),
            class: self.class,
            source: Some(Box::new(self)),
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn is_user(&self) -> bool {
        self.class == ErrorClass::User
    }

    pub fn is_system(&self) -> bool {
        self.class == ErrorClass::System
    }
}

// DB failures are system errors everywhere in the manager.
impl From<StorageError> for EnvError {
    fn from(err: StorageError) -> Self {
        EnvError::system(err)
    }
}

impl From<std::io::Error> for EnvError {
    fn from(err: std::io::Error) -> Self {
        EnvError::system(err)
    }
}

/// Result type for environment operations.
pub type Result<T> = std::result::Result<T, EnvError>;
