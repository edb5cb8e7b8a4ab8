//! Error types for the component container

use crate::lifecycle::CreationState;
use thiserror::Error;

/// Errors that can occur while defining, creating, wiring or invoking components
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// No descriptor (or parent descriptor) is registered under the name
    #[error("No component definition named '{name}'")]
    DefinitionNotFound { name: String },

    /// A descriptor is invalid or could not be merged with its parent
    #[error("Invalid definition '{name}': {reason}")]
    DefinitionMerge { name: String, reason: String },

    /// Explicitly declared dependencies form a cycle
    #[error("Circular depends-on relationship: {}", chain.join(" -> "))]
    CircularDependsOn { chain: Vec<String> },

    /// A component was requested again while it was still being created and
    /// no early reference could satisfy the request
    #[error("Component '{name}' is currently in creation: {}", chain.join(" -> "))]
    ReentrantCreation { name: String, chain: Vec<String> },

    /// Creation of a component aborted; wraps the underlying failure
    #[error("Failed to create '{name}' (reached {state}): {source}")]
    Construction {
        name: String,
        state: CreationState,
        #[source]
        source: Box<DiError>,
    },

    /// Several constructors or factory methods matched equally well
    #[error("Ambiguous constructor for '{name}': {}", candidates.join(", "))]
    AmbiguousConstructor { name: String, candidates: Vec<String> },

    /// A parameter or property could not be bound
    #[error("Unsatisfied dependency of '{name}' through {target}: {reason}")]
    UnsatisfiedDependency {
        name: String,
        target: String,
        reason: String,
    },

    /// A single instance of a type was required but several qualified
    #[error("Expected a single instance of {type_name} but found {}: {}", candidates.len(), candidates.join(", "))]
    NoUniqueInstance {
        type_name: String,
        candidates: Vec<String>,
    },

    /// A value did not match (and could not be converted to) the declared type
    #[error("Type mismatch at {context}: expected {expected}, found {actual}")]
    TypeMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    /// A descriptor names a property the component type does not declare
    #[error("Component '{name}' has no settable property '{property}'")]
    UnknownProperty { name: String, property: String },

    /// A proxy was configured without advisors and without a target,
    /// or a frozen configuration was modified
    #[error("Invalid proxy configuration: {0}")]
    InvalidProxyConfig(String),

    /// An early raw reference was handed out but the final instance differs
    #[error(
        "Raw instance of '{name}' was injected into [{}] during a circular reference, but the final instance is a different (wrapped) object",
        dependents.join(", ")
    )]
    RawReferenceLeak {
        name: String,
        dependents: Vec<String>,
    },

    /// A custom scope was used with no active context on this thread
    #[error("Scope '{scope}' has no active context on this thread")]
    ScopeNotActive { scope: String },

    /// A component method or callback reported a failure
    #[error("Method '{method}' failed: {reason}")]
    MethodFailed { method: String, reason: String },

    /// Internal error
    #[error("Internal container error: {0}")]
    Internal(String),
}

impl DiError {
    /// Create a DefinitionNotFound error
    #[inline]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::DefinitionNotFound { name: name.into() }
    }

    /// Create a DefinitionMerge error
    #[inline]
    pub fn invalid_definition(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DefinitionMerge {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a TypeMismatch error
    #[inline]
    pub fn type_mismatch(
        context: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            context: context.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an UnsatisfiedDependency error
    #[inline]
    pub fn unsatisfied(
        name: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnsatisfiedDependency {
            name: name.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a MethodFailed error; handy inside component method bodies
    #[inline]
    pub fn method_failed(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MethodFailed {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// The innermost error, looking through `Construction` wrappers.
    pub fn root_cause(&self) -> &DiError {
        let mut current = self;
        while let Self::Construction { source, .. } = current {
            current = source;
        }
        current
    }

    /// Names of every component whose creation this error aborted, outermost first.
    pub fn creation_path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = self;
        while let Self::Construction { name, source, .. } = current {
            path.push(name.as_str());
            current = source;
        }
        path
    }

    /// Tag an error with the component whose creation it aborted.
    pub(crate) fn tag(self, name: &str, state: CreationState) -> Self {
        match self {
            Self::Construction { name: ref inner, .. } if inner == name => self,
            other => Self::Construction {
                name: name.to_string(),
                state,
                source: Box::new(other),
            },
        }
    }
}

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, DiError>;
