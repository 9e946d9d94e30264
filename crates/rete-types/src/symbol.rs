use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// A small interned identifier for a rule variable (surface syntax marks
/// these with a leading `?`; the core only cares that they compare and hash
/// cheaply and clone without allocating).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Symbol(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Symbols introduced internally by DNF/negation normalization carry
    /// this prefix so query results can strip them (spec.md §4.9).
    pub const GENERATED_PREFIX: &'static str = "?__gen-";

    pub fn is_generated(&self) -> bool {
        self.0.starts_with(Self::GENERATED_PREFIX)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cheap_clone_shares_storage() {
        let a = Symbol::new("?t");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "?t");
    }

    #[test]
    fn generated_prefix_detected() {
        let gensym = Symbol::new(format!("{}42", Symbol::GENERATED_PREFIX));
        assert!(gensym.is_generated());
        assert!(!Symbol::new("?t").is_generated());
    }
}
