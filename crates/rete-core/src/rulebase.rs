//! Rule and query identity plus their static metadata (spec.md §4.8-§4.9,
//! §5's salience/no-loop/activation-group fields). Grounded on the shape of
//! a production node's declared attributes rather than any one teacher
//! file, since the teacher compiles rules from a DSL this engine has no
//! counterpart for. `Serialize`/`Deserialize` on these metadata structs
//! mirror `bingo-core::types::Rule`'s wire-format derive, so an embedding
//! host can log or persist compiled rule/query attributes with
//! `serde_json` the same way the teacher serializes its own rule structs.

use rete_types::Symbol;
use serde::{Deserialize, Serialize};

/// Stable id for a compiled production, assigned at network-build time.
pub type RuleId = usize;

/// Stable id for a compiled query, assigned at network-build time.
pub type QueryId = usize;

/// Static attributes of a compiled rule (spec.md §5): salience orders
/// activation groups, `no_loop` suppresses a rule re-activating itself from
/// facts its own RHS inserted in the same firing. Derives `Serialize`/
/// `Deserialize` so a host embedding this crate can persist or transmit
/// rule metadata the same way `bingo-core::types::Rule` does, independent
/// of whatever compiled closures the session attaches to the rule id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMeta {
    pub name: String,
    pub salience: i64,
    pub activation_group: Option<String>,
    pub no_loop: bool,
}

impl RuleMeta {
    pub fn new(name: impl Into<String>) -> Self {
        RuleMeta { name: name.into(), salience: 0, activation_group: None, no_loop: false }
    }

    pub fn with_salience(mut self, salience: i64) -> Self {
        self.salience = salience;
        self
    }

    pub fn with_activation_group(mut self, group: impl Into<String>) -> Self {
        self.activation_group = Some(group.into());
        self
    }

    pub fn with_no_loop(mut self, no_loop: bool) -> Self {
        self.no_loop = no_loop;
        self
    }
}

/// Static attributes of a compiled query: its name and the declared order
/// of parameter symbols a caller must supply to `Session::query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMeta {
    pub name: String,
    pub params: Vec<Symbol>,
}

impl QueryMeta {
    pub fn new(name: impl Into<String>, params: Vec<Symbol>) -> Self {
        QueryMeta { name: name.into(), params }
    }
}
