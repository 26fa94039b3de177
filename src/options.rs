//! Configuration options for the sandbox engine.

use crate::environment::Globals;
use crate::error::{ErrorKind, ScriptError};
use crate::object::DeniedMembers;
use crate::validator::AllowedNodes;

/// Resource limits enforced while a script runs.
///
/// # Example
///
/// ```
/// use sbx::ExecutionOptions;
///
/// let options = ExecutionOptions {
///     max_iterations: Some(10_000),
///     ..ExecutionOptions::default()
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Maximum number of loop iterations across the whole run (if Some).
    ///
    /// Set to `None` for unlimited iterations (be careful with untrusted code!).
    ///
    /// Default: 1_000_000
    pub max_iterations: Option<usize>,

    /// Longest string, list or materialised range a script may build.
    ///
    /// Default: 10_000_000
    pub max_sequence_len: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_iterations: Some(1_000_000),
            max_sequence_len: 10_000_000,
        }
    }
}

impl ExecutionOptions {
    pub fn check_len(&self, len: usize) -> Result<(), ScriptError> {
        if len > self.max_sequence_len {
            return Err(ScriptError::new(
                ErrorKind::ResourceExceeded,
                format!(
                    "sequence of length {} exceeds the limit of {}",
                    len, self.max_sequence_len
                ),
            ));
        }
        Ok(())
    }
}

/// Configuration for an [`Engine`](crate::Engine).
///
/// All sets are fixed once the engine is built.
///
/// # Example
///
/// ```
/// use sbx::{AllowedNodes, EngineOptions, NodeKind};
///
/// let options = EngineOptions {
///     allowed_nodes: AllowedNodes::default().without(NodeKind::While),
///     ..EngineOptions::default()
/// };
/// ```
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Syntax elements a script may use.
    pub allowed_nodes: AllowedNodes,

    /// Builtin names visible to scripts.
    pub globals: Globals,

    /// Context members that are never readable.
    pub denied_members: DeniedMembers,

    /// Limits applied to every run.
    pub execution: ExecutionOptions,
}
