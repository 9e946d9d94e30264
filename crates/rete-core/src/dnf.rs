//! DNF normalization of a rule's LHS (spec.md §4.10): push `not` inward via
//! De Morgan's laws, flatten nested `and`, distribute `and` over `or`, and
//! unwrap single-child composites, producing one conjunction of signed
//! atoms per "production variant" — each variant compiles to its own join
//! chain ending in the same shared production node.
//!
//! Kept generic over the atom type `L` (rather than tied to `Schema`)
//! because normalization is pure propositional logic; the network builder
//! is what turns an atom into a concrete alpha condition, join, or
//! negation node.

/// A boolean combinator over LHS atoms.
#[derive(Debug, Clone)]
pub enum Formula<L> {
    Atom(L),
    Not(Box<Formula<L>>),
    And(Vec<Formula<L>>),
    Or(Vec<Formula<L>>),
}

impl<L> Formula<L> {
    pub fn and(parts: impl IntoIterator<Item = Formula<L>>) -> Self {
        Formula::And(parts.into_iter().collect())
    }

    pub fn or(parts: impl IntoIterator<Item = Formula<L>>) -> Self {
        Formula::Or(parts.into_iter().collect())
    }

    pub fn not(inner: Formula<L>) -> Self {
        Formula::Not(Box::new(inner))
    }
}

/// An atom together with whether it is negated, after `not` has been pushed
/// all the way down to the leaves.
#[derive(Debug, Clone)]
pub enum Signed<L> {
    Pos(L),
    Neg(L),
}

impl<L> Signed<L> {
    pub fn atom(&self) -> &L {
        match self {
            Signed::Pos(a) | Signed::Neg(a) => a,
        }
    }

    pub fn is_negated(&self) -> bool {
        matches!(self, Signed::Neg(_))
    }

    pub fn into_atom(self) -> L {
        match self {
            Signed::Pos(a) | Signed::Neg(a) => a,
        }
    }
}

/// Push `Not` to the leaves via De Morgan's laws, eliminating double
/// negation along the way.
fn push_negation<L: Clone>(f: Formula<L>, negate: bool) -> Formula<L> {
    match f {
        Formula::Atom(a) => {
            if negate {
                Formula::Not(Box::new(Formula::Atom(a)))
            } else {
                Formula::Atom(a)
            }
        }
        Formula::Not(inner) => push_negation(*inner, !negate),
        Formula::And(parts) => {
            let pushed = parts.into_iter().map(|p| push_negation(p, negate));
            if negate { Formula::Or(pushed.collect()) } else { Formula::And(pushed.collect()) }
        }
        Formula::Or(parts) => {
            let pushed = parts.into_iter().map(|p| push_negation(p, negate));
            if negate { Formula::And(pushed.collect()) } else { Formula::Or(pushed.collect()) }
        }
    }
}

/// Flatten directly-nested `And`/`Or` of the same kind into one level, and
/// unwrap single-child composites (spec.md §4.10).
fn flatten<L>(f: Formula<L>) -> Formula<L> {
    match f {
        Formula::And(parts) => {
            let mut flat = Vec::new();
            for p in parts.into_iter().map(flatten) {
                match p {
                    Formula::And(inner) => flat.extend(inner),
                    other => flat.push(other),
                }
            }
            if flat.len() == 1 { flat.pop().unwrap() } else { Formula::And(flat) }
        }
        Formula::Or(parts) => {
            let mut flat = Vec::new();
            for p in parts.into_iter().map(flatten) {
                match p {
                    Formula::Or(inner) => flat.extend(inner),
                    other => flat.push(other),
                }
            }
            if flat.len() == 1 { flat.pop().unwrap() } else { Formula::Or(flat) }
        }
        Formula::Not(inner) => Formula::Not(Box::new(flatten(*inner))),
        atom @ Formula::Atom(_) => atom,
    }
}

/// Distribute `And` over `Or` until the formula is a top-level `Or` of
/// `And`s of (possibly negated) atoms.
fn distribute<L: Clone>(f: Formula<L>) -> Formula<L> {
    match flatten(f) {
        Formula::And(parts) => {
            let parts: Vec<Formula<L>> = parts.into_iter().map(distribute).collect();
            // Cartesian-product the Or branches of each conjunct.
            let mut disjuncts: Vec<Vec<Formula<L>>> = vec![Vec::new()];
            for part in parts {
                let branches: Vec<Formula<L>> = match part {
                    Formula::Or(inner) => inner,
                    other => vec![other],
                };
                let mut next = Vec::with_capacity(disjuncts.len() * branches.len());
                for existing in &disjuncts {
                    for branch in &branches {
                        let mut combo = existing.clone();
                        combo.push(branch.clone());
                        next.push(combo);
                    }
                }
                disjuncts = next;
            }
            let ors: Vec<Formula<L>> = disjuncts.into_iter().map(Formula::And).collect();
            flatten(Formula::Or(ors))
        }
        Formula::Or(parts) => flatten(Formula::Or(parts.into_iter().map(distribute).collect())),
        other => other,
    }
}

/// Normalize `f` into disjunctive normal form: a list of conjunctions, each
/// a `Vec<Signed<L>>` of (possibly negated) atoms, ORed together.
pub fn to_dnf<L: Clone>(f: Formula<L>) -> Vec<Vec<Signed<L>>> {
    let pushed = push_negation(f, false);
    let distributed = distribute(pushed);
    let top = match distributed {
        Formula::Or(parts) => parts,
        other => vec![other],
    };
    top.into_iter()
        .map(|conjunct| {
            let atoms = match conjunct {
                Formula::And(parts) => parts,
                other => vec![other],
            };
            atoms
                .into_iter()
                .map(|a| match a {
                    Formula::Atom(x) => Signed::Pos(x),
                    Formula::Not(inner) => match *inner {
                        Formula::Atom(x) => Signed::Neg(x),
                        _ => unreachable!("negation fully pushed to leaves by push_negation"),
                    },
                    _ => unreachable!("and/or fully distributed by distribute"),
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demorgan_pushes_not_over_and() {
        let f = Formula::not(Formula::and([Formula::Atom("a"), Formula::Atom("b")]));
        let dnf = to_dnf(f);
        // not(a and b) == (not a) or (not b)
        assert_eq!(dnf.len(), 2);
        assert!(dnf.iter().any(|c| c.len() == 1 && matches!(c[0], Signed::Neg("a"))));
        assert!(dnf.iter().any(|c| c.len() == 1 && matches!(c[0], Signed::Neg("b"))));
    }

    #[test]
    fn double_negation_cancels() {
        let f = Formula::not(Formula::not(Formula::Atom("a")));
        let dnf = to_dnf(f);
        assert_eq!(dnf.len(), 1);
        assert!(matches!(dnf[0][0], Signed::Pos("a")));
    }

    #[test]
    fn distributes_and_over_or() {
        // a and (b or c) == (a and b) or (a and c)
        let f = Formula::and([Formula::Atom("a"), Formula::or([Formula::Atom("b"), Formula::Atom("c")])]);
        let dnf = to_dnf(f);
        assert_eq!(dnf.len(), 2);
        for conjunct in &dnf {
            assert_eq!(conjunct.len(), 2);
            assert!(matches!(conjunct[0], Signed::Pos("a")));
        }
    }

    #[test]
    fn single_child_composites_unwrap() {
        let f = Formula::and([Formula::Atom("a")]);
        let dnf = to_dnf(f);
        assert_eq!(dnf.len(), 1);
        assert_eq!(dnf[0].len(), 1);
    }
}
