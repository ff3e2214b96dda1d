//! Error types.
//!
//! Faults fall in two families: [`ProgramError`] is raised while compiling a
//! rule and means the program itself is invalid; [`EvalError`] is raised by a
//! running join task and is recorded as the failure cause of the stratum.

use thiserror::Error;

/// A rule that cannot be compiled into canonical form
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    /// Head variables that no body literal binds
    #[error("Unbound variables {vars} in head of rule:\n{rule}")]
    UnboundHeadVariables {
        /// Rule text
        rule: String,
        /// Comma separated variable names
        vars: String,
    },

    /// Two constructor applications with different symbols were unified
    #[error("Problem simplifying this rule:\n{rule}\nUnsatisfiable unification conjunct: {conjunct}")]
    UnsatisfiableUnification {
        /// Rule text
        rule: String,
        /// The offending conjunct
        conjunct: String,
    },

    /// A negated unification whose sides are not both bound
    #[error("Problem simplifying this rule:\n{rule}\nNegated unification over unbound variables: {conjunct}")]
    NegatedUnificationUnbound {
        /// Rule text
        rule: String,
        /// The offending conjunct
        conjunct: String,
    },

    /// A unification whose unbound side is neither a variable nor a constructor
    #[error("Problem simplifying this rule:\n{rule}\nCannot invert unification conjunct: {conjunct}")]
    NonInvertibleUnification {
        /// Rule text
        rule: String,
        /// The offending conjunct
        conjunct: String,
    },

    /// A negated atom that would have to bind a variable
    #[error("Problem simplifying this rule:\n{rule}\nNegated atom binds variables: {atom}")]
    UnsafeNegation {
        /// Rule text
        rule: String,
        /// The offending atom
        atom: String,
    },

    /// An atom whose argument count differs from its relation's arity
    #[error("Atom {atom} has {found} arguments but its relation has arity {expected}")]
    ArityMismatch {
        /// The offending atom
        atom: String,
        /// Arity of the relation
        expected: usize,
        /// Number of arguments supplied
        found: usize,
    },

    /// A rule that cannot run under the fixpoint engine (e.g. top-down head)
    #[error("Rule cannot be evaluated bottom-up:\n{rule}\nReason: {reason}")]
    Unsupported {
        /// Rule text
        rule: String,
        /// Why it was rejected
        reason: String,
    },

    /// A fact that still contains variables or calls
    #[error("Fact is not ground: {atom}")]
    NonGroundFact {
        /// The offending atom
        atom: String,
    },

    /// Per-position index data that does not line up with the rule body
    #[error("Index data for rule has {found} positions but the body has {expected}:\n{rule}")]
    IndexShape {
        /// Rule text
        rule: String,
        /// Body length
        expected: usize,
        /// Supplied length
        found: usize,
    },
}

/// A fault raised while evaluating rules
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A variable had no binding where a ground term was required
    #[error("Variable {0} is unbound")]
    UnboundVariable(String),

    /// A call to a function nobody registered
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// A call with the wrong number of arguments
    #[error("Function {name} expects {expected} arguments, got {found}")]
    FunctionArity {
        /// Function name
        name: String,
        /// Declared arity
        expected: usize,
        /// Supplied arguments
        found: usize,
    },

    /// A function rejected its arguments
    #[error("Function {name} failed: {message}")]
    Function {
        /// Function name
        name: String,
        /// What went wrong
        message: String,
    },

    /// The constraint solver reported an error
    #[error("Solver error: {0}")]
    Solver(String),

    /// The constraint solver could not decide a query that needs an answer
    #[error("Solver returned unknown for: {0}")]
    SolverUnknown(String),

    /// A task panicked; the payload message is kept
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// The worker pool could not be started
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Wraps a fault with the literal that raised it
    #[error("Exception raised while evaluating the literal: {literal}\n\n{source}")]
    InLiteral {
        /// Literal text
        literal: String,
        /// The underlying fault
        source: Box<EvalError>,
    },

    /// Wraps a fault with the rule that raised it
    #[error("Exception raised while evaluating the rule:\n{rule}\n\n{source}")]
    InRule {
        /// Rule text
        rule: String,
        /// The underlying fault
        source: Box<EvalError>,
    },
}

impl EvalError {
    /// Attaches the literal being evaluated
    #[must_use]
    pub fn in_literal(self, literal: &impl std::fmt::Display) -> Self {
        Self::InLiteral {
            literal: literal.to_string(),
            source: Box::new(self),
        }
    }

    /// Attaches the rule being evaluated
    #[must_use]
    pub fn in_rule(self, rule: &impl std::fmt::Display) -> Self {
        Self::InRule {
            rule: rule.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost fault, with all rule and literal context stripped
    #[must_use]
    pub fn root_cause(&self) -> &EvalError {
        match self {
            Self::InLiteral { source, .. } | Self::InRule { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Errors surfaced by the multi-stratum [`Engine`](crate::Engine)
#[derive(Error, Debug)]
pub enum EngineError {
    /// A rule or fact was rejected
    #[error(transparent)]
    Program(#[from] ProgramError),

    /// A stratum's evaluation failed; evaluation stopped there
    #[error("Evaluation of stratum {stratum} failed: {source}")]
    Stratum {
        /// Index of the failing stratum
        stratum: usize,
        /// First recorded fault of that stratum
        source: EvalError,
    },

    /// The worker pool could not be started
    #[error("Worker pool unavailable: {0}")]
    Pool(EvalError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_strips_context() {
        let err = EvalError::UnboundVariable("x".to_string())
            .in_literal(&"p(x)")
            .in_rule(&"q(x) :- p(x).");
        assert_eq!(
            err.root_cause(),
            &EvalError::UnboundVariable("x".to_string())
        );
        let text = err.to_string();
        assert!(text.contains("q(x) :- p(x)."));
        assert!(text.contains("p(x)"));
        assert!(text.contains("Variable x is unbound"));
    }
}
