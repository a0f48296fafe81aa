//! Domain-specific errors for graph resolution and installation.

use keel_schema::manifest::ManifestError;
use keel_schema::{Blake3Hash, RefError};
use thiserror::Error;

/// Fatal errors during graph construction. A graph with an unresolved
/// shape cannot safely be installed, so these abort the whole operation.
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// No recipe for the reference exists in the cache or on any remote.
    #[error("Recipe '{0}' not found in cache or remotes")]
    NotFound(String),

    /// Two requirements resolved the same name to incompatible references.
    #[error("Conflicting requirements for '{name}': '{first_requester}' requires {first}, '{second_requester}' requires {second}")]
    Conflict {
        /// The contested package name.
        name: String,
        /// Reference of the node that placed the first resolution.
        first_requester: String,
        /// The first resolved reference.
        first: String,
        /// Reference of the node whose requirement conflicts.
        second_requester: String,
        /// The conflicting reference.
        second: String,
    },

    /// A requirement edge closes a cycle in the graph.
    #[error("Circular dependency detected: '{0}' is required by one of its own dependencies")]
    Cycle(String),

    /// No version in the candidate set satisfies a range requirement.
    #[error("No version of '{name}' satisfies range '{range}'")]
    NoMatchingVersion {
        /// The requested package name.
        name: String,
        /// The unsatisfied range expression.
        range: String,
    },
}

/// Errors raised by the resolution and installation core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Graph construction failed; nothing was installed.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Fetched or re-verified content does not match its manifest.
    #[error("Integrity check failed for '{reference}': expected {expected}, got {got}")]
    Integrity {
        /// The package reference whose content mismatched.
        reference: String,
        /// Summary hash announced by the manifest.
        expected: Blake3Hash,
        /// Summary hash recomputed from the received content.
        got: Blake3Hash,
    },

    /// The external package/build callback failed for one node.
    #[error("Build of '{reference}' failed: {message}")]
    Build {
        /// The node being built.
        reference: String,
        /// Failure detail from the callback.
        message: String,
    },

    /// A package folder already exists and no overwrite was requested.
    #[error("Package folder for '{0}' already exists. Use force to overwrite it")]
    AlreadyExists(String),

    /// Malformed recipe, unresolvable option, or invalid request input.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A remote boundary operation reported failure.
    #[error("Remote '{remote}' failed: {message}")]
    Remote {
        /// Name of the remote that failed.
        remote: String,
        /// Failure detail.
        message: String,
    },

    /// Manifest scanning or persistence failure.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Reference parsing failure.
    #[error(transparent)]
    Ref(#[from] RefError),

    /// Filesystem failure in the cache layout.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Shorthand for remote boundary failures.
    pub fn remote(remote: &str, message: impl Into<String>) -> Self {
        Self::Remote {
            remote: remote.to_string(),
            message: message.into(),
        }
    }
}
