//! Structured error handling for the rule engine core (spec.md §7),
//! mirroring the shape of `bingo_core::error::BingoError`: one `thiserror`
//! variant per error kind, each carrying the structured context a caller or
//! listener needs rather than a bare string.

use crate::node::NodeId;
use thiserror::Error;

/// Result alias used across the public API, matching the teacher's
/// `BingoResult<T>` naming.
pub type RuleEngineResult<T> = Result<T, RuleEngineError>;

/// Comprehensive error type for rule engine operations (spec.md §7).
#[derive(Error, Debug, Clone)]
pub enum RuleEngineError {
    /// "a rule lacks an RHS action, or its LHS references a variable with
    /// no binding source — detected at network construction."
    #[error("invalid rule {rule_name:?}: {message}")]
    InvalidRule { rule_name: Option<String>, message: String },

    /// "querying by a name or reference that is not in the rulebase."
    #[error("invalid query {query:?}: not found in rulebase")]
    InvalidQuery { query: String },

    /// "using an accumulator in a position whose bindings cannot be
    /// resolved."
    #[error("invalid accumulator usage in {context}: {message}")]
    InvalidAccumulatorUsage { context: String, message: String },

    /// "any exception raised by a user RHS propagates out of `fire-rules`
    /// with a wrapping error that identifies the rule and token." `token`
    /// is the firing token's `Debug` rendering (captured by the caller,
    /// which knows the concrete `Schema`) rather than the token itself, so
    /// this error type stays schema-independent.
    #[error("rule {rule_name} raised an exception while firing on token {token}: {message}")]
    RhsException { rule_name: String, node: NodeId, token: String, message: String },

    /// Internal invariant violation (a dangling node id, a malformed DAG
    /// reference produced by network construction). Not reachable through
    /// normal use of the public construction API; surfaced rather than
    /// panicking so embedding callers can decide how to fail.
    #[error("internal rule engine error in {component}: {message}")]
    Internal { component: String, message: String },
}

impl RuleEngineError {
    pub fn invalid_rule(rule_name: impl Into<Option<String>>, message: impl Into<String>) -> Self {
        RuleEngineError::InvalidRule { rule_name: rule_name.into(), message: message.into() }
    }

    pub fn invalid_query(query: impl Into<String>) -> Self {
        RuleEngineError::InvalidQuery { query: query.into() }
    }

    pub fn invalid_accumulator_usage(context: impl Into<String>, message: impl Into<String>) -> Self {
        RuleEngineError::InvalidAccumulatorUsage { context: context.into(), message: message.into() }
    }

    pub fn rhs_exception(rule_name: impl Into<String>, node: NodeId, token: impl Into<String>, message: impl Into<String>) -> Self {
        RuleEngineError::RhsException { rule_name: rule_name.into(), node, token: token.into(), message: message.into() }
    }

    pub fn internal(component: impl Into<String>, message: impl Into<String>) -> Self {
        RuleEngineError::Internal { component: component.into(), message: message.into() }
    }

    /// Error category, used by listeners/logging to group metrics without
    /// matching on the full variant (mirrors `BingoError::category`).
    pub fn category(&self) -> &'static str {
        match self {
            RuleEngineError::InvalidRule { .. } => "invalid_rule",
            RuleEngineError::InvalidQuery { .. } => "invalid_query",
            RuleEngineError::InvalidAccumulatorUsage { .. } => "invalid_accumulator_usage",
            RuleEngineError::RhsException { .. } => "rhs_exception",
            RuleEngineError::Internal { .. } => "internal",
        }
    }
}
