use crate::models::{PackageAction, PackageSource};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    ParseFailure,
    Timeout,
    ProcessFailure,
    NetworkFailure,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub origin: Option<PackageSource>,
    pub action: Option<PackageAction>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            origin: None,
            action: None,
            kind,
            message: message.into(),
        }
    }

    pub fn origin(mut self, origin: PackageSource) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn action(mut self, action: PackageAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::StorageFailure, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Internal, message)
    }
}
