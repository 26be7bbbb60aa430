use thiserror::Error;

/// Reasons a requested edit of the tag tree was refused.
///
/// None of these leave the tree or the displayed rows modified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    /// A tag or item ordinal does not resolve at the expected scope.
    #[error("not found: {0}")]
    NotFound(String),

    /// The proposed value cannot be encoded for the element's VR.
    #[error("invalid value for VR {vr}: {reason}")]
    InvalidValue { vr: String, reason: String },

    /// The selected row and the requested change do not fit together.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The tag is excluded from editing by the active policy.
    #[error("{tag} {name} is protected and cannot be changed")]
    StructuralGuard { tag: String, name: String },
}

impl EditError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_value(vr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            vr: vr.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation(reason.into())
    }
}
