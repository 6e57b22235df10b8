//! Error types for the cephalon operator
//!
//! Errors are structured with fields so that a failed reconcile pass can say
//! which command, secret or resource was involved. The variants follow the
//! failure categories the controllers act on: validation failures wait for a
//! spec change, command and decode failures are retried with backoff,
//! ownership conflicts need operator intervention, and timeouts get a longer
//! backoff than hard failures.

use thiserror::Error;

/// Main error type for cephalon operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Declared resource is malformed
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// A cluster admin command failed or could not be started
    #[error("command `{command}` failed: {message}")]
    Command {
        /// Verb hierarchy and target of the command (e.g. "fs get myfs")
        command: String,
        /// Failure output or wrapped cause
        message: String,
    },

    /// A command succeeded but its output could not be decoded
    #[error("failed to decode output of `{command}`: {message}")]
    Decode {
        /// Command whose output was malformed
        command: String,
        /// Decoder error
        message: String,
    },

    /// The cluster snapshot is internally inconsistent or lacks an expected entry
    #[error("unexpected cluster state [{context}]: {message}")]
    ClusterState {
        /// What was being resolved (e.g. "mds rank", "pool id")
        context: String,
        /// Description of the inconsistency
        message: String,
    },

    /// A secret exists at the target name but belongs to something else
    #[error("secret {secret} ownership conflict: {message}")]
    OwnershipConflict {
        /// Namespaced name of the contested secret
        secret: String,
        /// Who owns it and why that blocks the write
        message: String,
    },

    /// A bounded wait elapsed before the cluster reached the expected state
    #[error("timed out waiting for {operation}: {message}")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// Last observed state
        message: String,
    },

    /// Serialization/deserialization of a local payload failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "reconciler", "executor")
        context: String,
    },
}

impl Error {
    /// Create a validation error for the named resource
    pub fn validation(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a command error for the given argument list
    pub fn command(args: &[String], msg: impl Into<String>) -> Self {
        Self::Command {
            command: args.join(" "),
            message: msg.into(),
        }
    }

    /// Create a decode error for the given command
    pub fn decode(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Decode {
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create a cluster state error
    pub fn cluster_state(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ClusterState {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create an ownership conflict error for a secret
    pub fn ownership_conflict(secret: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::OwnershipConflict {
            secret: secret.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Wrap a command-level error with additional context.
    ///
    /// Command and decode errors keep their command but get `context`
    /// prefixed to the message; other variants are returned unchanged.
    pub fn with_context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Self::Command { command, message } => Self::Command {
                command,
                message: format!("{context}: {message}"),
            },
            Self::Decode { command, message } => Self::Decode {
                command,
                message: format!("{context}: {message}"),
            },
            other => other,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                // Stale resource version: retry with a fresh read
                kube::Error::Api(ae) if ae.code == 409 => true,
                kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Command { .. } => true,
            Error::Decode { .. } => true,
            Error::ClusterState { .. } => true,
            Error::OwnershipConflict { .. } => false,
            Error::Timeout { .. } => true,
            Error::Serialization(_) => false,
            Error::Internal { .. } => true,
        }
    }

    /// True if a bounded wait elapsed
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// True if the object store reported the object as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// True if the object store rejected a write with a stale resource version
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// True if a command failed because its target does not exist
    pub fn is_enoent(&self) -> bool {
        match self {
            Error::Command { message, .. } => {
                message.contains("ENOENT") || message.contains("does not exist")
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    // ==========================================================================
    // Story Tests: How failures steer the reconcile loop
    // ==========================================================================

    /// Story: a user declares a client without any capabilities
    ///
    /// Validation errors name the resource and are never retried, because
    /// only a spec change can fix them.
    #[test]
    fn story_validation_errors_wait_for_spec_change() {
        let err = Error::validation("app-client", "at least one capability is required");
        assert!(err.to_string().contains("app-client"));
        assert!(err.to_string().contains("capability"));
        assert!(!err.is_retryable());
    }

    /// Story: the cluster rejects a command mid-transition
    ///
    /// Command failures carry the verb hierarchy so that operators can tell
    /// which step of a multi-step teardown failed, and they are retried.
    #[test]
    fn story_command_failures_carry_the_verb_and_are_retried() {
        let err = Error::command(&args(&["fs", "rm", "myfs"]), "EBUSY");
        assert_eq!(err.to_string(), "command `fs rm myfs` failed: EBUSY");
        assert!(err.is_retryable());

        let err = Error::decode("fs dump", "expected value at line 1");
        assert!(err.is_retryable());
    }

    /// Story: a listing fails and the caller adds filesystem context
    #[test]
    fn story_context_is_prefixed_onto_command_errors() {
        let err = Error::command(&args(&["fs", "subvolumegroup", "ls", "myfs"]), "boom")
            .with_context("failed to list subvolumegroups in filesystem \"myfs\"");
        let msg = err.to_string();
        assert!(msg.contains("failed to list subvolumegroups in filesystem \"myfs\""));
        assert!(msg.contains("boom"));

        // Non-command errors are left alone
        let err = Error::validation("x", "y").with_context("ignored");
        assert!(!err.to_string().contains("ignored"));
    }

    /// Story: two writers race on the same secret
    ///
    /// A stale resource version (409) must be retried with a fresh read,
    /// while other client errors such as 403 are not.
    #[test]
    fn story_stale_writes_are_retryable_conflicts() {
        let conflict = api_error(409);
        assert!(conflict.is_conflict());
        assert!(conflict.is_retryable());

        let forbidden = api_error(403);
        assert!(!forbidden.is_retryable());

        let not_found = api_error(404);
        assert!(not_found.is_not_found());

        let server = api_error(503);
        assert!(server.is_retryable());
    }

    /// Story: a secret belongs to another client
    #[test]
    fn story_ownership_conflicts_are_not_retried_blindly() {
        let err = Error::ownership_conflict("rook/app", "owned by CephClient other");
        assert!(err.to_string().contains("rook/app"));
        assert!(!err.is_retryable());
    }

    /// Story: standbys never drain before the deadline
    #[test]
    fn story_timeouts_are_distinct_from_hard_failures() {
        let err = Error::timeout("standbys of myfs", "still present after 30s");
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert!(!Error::command(&args(&["fs", "dump"]), "x").is_timeout());
    }

    #[test]
    fn test_enoent_detection() {
        let err = Error::command(
            &args(&["auth", "del", "client.gone"]),
            "Error ENOENT: entity client.gone does not exist",
        );
        assert!(err.is_enoent());
        assert!(!Error::command(&args(&["auth", "del", "x"]), "EACCES").is_enoent());
    }
}
