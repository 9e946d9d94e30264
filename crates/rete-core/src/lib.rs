//! Rete Core
//!
//! A forward-chaining, Rete-style production rule engine: a compiled
//! discrimination network (alpha network + beta network), working memory
//! with truth maintenance, a priority-grouped activation scheduler, and an
//! immutable-looking session API built on top.
//!
//! Surface syntax, an ahead-of-time rule compiler, concrete accumulator
//! bodies, and distributed execution are out of scope here — this crate is
//! the runtime a code generator or embedding application targets, not a
//! rule language.

pub mod alpha;
pub mod bindings;
pub mod builder;
pub mod dnf;
pub mod error;
pub mod listener;
pub mod memory;
pub mod network;
pub mod node;
pub mod nodes;
pub mod rhs;
pub mod rulebase;
pub mod scheduler;
pub mod schema;
pub mod session;
pub mod token;

pub use bindings::{Bindings, JoinKey};
pub use builder::{Atom, RulebaseBuilder};
pub use dnf::{Formula, Signed};
pub use error::{RuleEngineError, RuleEngineResult};
pub use listener::{Listener, SharedListener};
pub use network::{Dir, ProductionEvent, Rulebase};
pub use node::NodeId;
pub use nodes::AccumulatorSpec;
pub use rhs::RhsContext;
pub use rulebase::{QueryId, QueryMeta, RuleId, RuleMeta};
pub use schema::Schema;
pub use session::{Components, PersistentSession, RhsFn, SessionOptions, TransientSession};
pub use token::{Element, Matched, Token};

pub use rete_types::Symbol;
