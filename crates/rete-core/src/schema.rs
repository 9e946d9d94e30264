//! The `Schema` trait parameterizes the whole network over a caller's fact
//! type, binding-value type, and evaluation environment.
//!
//! spec.md treats facts as opaque caller values and binding values as
//! "fact-derived"; associating them on one trait (rather than threading
//! three independent generic parameters through every node, memory and
//! session type) keeps signatures readable while still letting one engine
//! crate serve any caller fact type. See DESIGN.md for the rationale.

use rete_types::{Fact, Value};

/// One caller's fact/value/env triple. Implement this once per application
/// (usually a zero-sized marker type) and every other type in this crate is
/// generic over `S: Schema`.
pub trait Schema: Sized + 'static {
    /// The opaque fact type asserted into and retracted from a session.
    type Fact: Fact;
    /// The type of value a condition's constraint expressions bind to a
    /// [`rete_types::Symbol`].
    type Value: Value;
    /// Caller-supplied evaluation environment threaded into every alpha
    /// condition (spec.md §9: "implementers should thread `env` through
    /// explicitly").
    type Env: Clone;
    /// The type tag returned by the caller's `fact_type_fn` (spec.md §4.1).
    /// Left abstract rather than `String` so callers can use a cheap
    /// enum/interned symbol; only equality, hashing and cloning are
    /// required for routing.
    type Type: TypeTag;
}

/// Bound alias for [`Schema::Type`].
pub trait TypeTag: Clone + Eq + std::hash::Hash + std::fmt::Debug {}
impl<T: Clone + Eq + std::hash::Hash + std::fmt::Debug> TypeTag for T {}
