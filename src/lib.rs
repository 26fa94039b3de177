// Sandboxed script evaluation engine
//
// Hosts compile short, untrusted scripts in a small indentation-based
// language, check them against a grammar allowlist, and run them against a
// read-only context object to obtain a single `result` value.

// Public modules
pub mod ast;
pub mod builtins;
pub mod diagnostic;
pub mod engine;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod format;
pub mod lexer;
pub mod methods;
pub mod object;
pub mod operators;
pub mod options;
pub mod parser;
pub mod runner;
pub mod validator;
pub mod value;

// Re-export commonly used items
pub use ast::{NodeKind, Program};
pub use diagnostic::{ContextLine, Diagnostic, SourceText};
pub use engine::{CompiledScript, Engine, Sandbox};
pub use environment::{Globals, Inputs, CONTEXT_NAME, RESULT_NAME, TYPE_OBJECT_NAME};
pub use error::{CompileError, Error, ErrorKind, RuntimeError, ScriptError, Span};
pub use object::{DeniedMembers, ReadOnlyView, Record, ScriptObject};
pub use options::{EngineOptions, ExecutionOptions};
pub use parser::MAX_NESTING;
pub use validator::AllowedNodes;
pub use value::{Dict, Value};
