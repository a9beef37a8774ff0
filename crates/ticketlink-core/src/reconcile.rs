//! Reconciliation of the commit history against the persisted link index.
//!
//! Both sides are compared purely on `(ticket, sha)`. Timestamps and row ids
//! never take part in identity, so an already-indexed link is left untouched
//! even if its commit time differs.

use std::collections::HashSet;

/// Natural identity of a commit/ticket link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkKey<'a> {
    pub ticket: &'a str,
    pub sha: &'a str,
}

impl<'a> LinkKey<'a> {
    #[must_use]
    pub const fn new(ticket: &'a str, sha: &'a str) -> Self {
        Self { ticket, sha }
    }
}

/// Anything that carries a reconciliation key.
pub trait Linked {
    fn key(&self) -> LinkKey<'_>;
}

/// A persisted link row with its storage identity.
pub trait Persisted: Linked {
    fn row_id(&self) -> i64;
}

/// Changes needed to bring the index in line with the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<A> {
    /// Authoritative records with no persisted counterpart, in input order.
    pub to_insert: Vec<A>,
    /// Row ids of persisted links that are no longer in the history.
    pub to_delete: Vec<i64>,
}

impl<A> Delta<A> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty()
    }
}

/// Compute the symmetric difference between `authoritative` and `persisted`.
///
/// A key repeated in `authoritative` is inserted once. Every persisted row
/// whose key is missing from `authoritative` is deleted, so an empty history
/// tears the whole repository index down.
pub fn reconcile<A, P>(authoritative: Vec<A>, persisted: &[P]) -> Delta<A>
where
    A: Linked,
    P: Persisted,
{
    let persisted_keys: HashSet<LinkKey<'_>> = persisted.iter().map(Linked::key).collect();

    let (keep, to_delete) = {
        let authoritative_keys: HashSet<LinkKey<'_>> =
            authoritative.iter().map(Linked::key).collect();

        let to_delete: Vec<i64> = persisted
            .iter()
            .filter(|row| !authoritative_keys.contains(&row.key()))
            .map(Persisted::row_id)
            .collect();

        let mut scheduled = HashSet::with_capacity(authoritative.len());
        let keep: Vec<bool> = authoritative
            .iter()
            .map(|record| {
                let key = record.key();
                !persisted_keys.contains(&key) && scheduled.insert(key)
            })
            .collect();

        (keep, to_delete)
    };

    let to_insert = authoritative
        .into_iter()
        .zip(keep)
        .filter_map(|(record, keep)| keep.then_some(record))
        .collect();

    Delta {
        to_insert,
        to_delete,
    }
}
