//! Persistent name-to-address environment.
//!
//! Environments are forked on every path split, so `Env` is a cheap-to-clone
//! wrapper around a shared insertion-ordered map. Cloning copies one `Arc`;
//! the first write after a fork copies the table once and subsequent writes
//! mutate in place.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::heap::Addr;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Env {
    table: Arc<IndexMap<String, Addr>>,
}

impl Env {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get_id(&self, name: &str) -> Option<Addr> {
        self.table.get(name).copied()
    }

    #[must_use]
    pub fn has_id(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Binds `name` to `addr`, returning the updated environment.
    #[must_use]
    pub fn set_id(&self, name: impl Into<String>, addr: Addr) -> Self {
        let mut out = self.clone();
        Arc::make_mut(&mut out.table).insert(name.into(), addr);
        out
    }

    #[must_use]
    pub fn remove_id(&self, name: &str) -> Self {
        let mut out = self.clone();
        Arc::make_mut(&mut out.table).shift_remove(name);
        out
    }

    /// Pulls bindings from `other` into this environment.
    ///
    /// Only addresses at or above zero transfer: negative addresses are
    /// pre-allocated built-ins already visible everywhere. Used when merging
    /// imported-module bindings into the caller.
    #[must_use]
    pub fn merge_addr(&self, other: &Self) -> Self {
        let mut out = self.clone();
        let table = Arc::make_mut(&mut out.table);
        for (name, addr) in other.iter() {
            if !addr.is_builtin() {
                table.insert(name.to_owned(), addr);
            }
        }
        out
    }

    /// Rewrites every non-negative address by `delta`.
    #[must_use]
    pub fn add_offset(&self, delta: i64) -> Self {
        let table = self
            .table
            .iter()
            .map(|(name, addr)| (name.clone(), addr.offset(delta)))
            .collect();
        Self { table: Arc::new(table) }
    }

    /// Keeps only the bindings whose name satisfies the predicate.
    #[must_use]
    pub fn filter(&self, mut pred: impl FnMut(&str, Addr) -> bool) -> Self {
        let table = self
            .table
            .iter()
            .filter(|(name, addr)| pred(name, **addr))
            .map(|(name, addr)| (name.clone(), *addr))
            .collect();
        Self { table: Arc::new(table) }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Addr)> {
        self.table.iter().map(|(name, addr)| (name.as_str(), *addr))
    }

    /// Addresses of every binding, used as GC roots.
    pub fn addrs(&self) -> impl Iterator<Item = Addr> + '_ {
        self.table.values().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_does_not_mutate_the_original() {
        let base = Env::new().set_id("x", Addr::new(1));
        let derived = base.set_id("y", Addr::new(2));
        assert_eq!(base.get_id("y"), None);
        assert_eq!(derived.get_id("x"), Some(Addr::new(1)));
        assert_eq!(derived.get_id("y"), Some(Addr::new(2)));
    }

    #[test]
    fn merge_skips_builtin_addresses() {
        let module = Env::new().set_id("helper", Addr::new(40)).set_id("print", Addr::new(-2));
        let caller = Env::new().set_id("x", Addr::new(1));
        let merged = caller.merge_addr(&module);
        assert_eq!(merged.get_id("helper"), Some(Addr::new(40)));
        assert_eq!(merged.get_id("print"), None);
        assert_eq!(merged.get_id("x"), Some(Addr::new(1)));
    }

    #[test]
    fn offset_preserves_builtins_and_order() {
        let env = Env::new().set_id("a", Addr::new(3)).set_id("b", Addr::new(-1)).set_id("c", Addr::new(0));
        let moved = env.add_offset(10);
        let collected: Vec<_> = moved.iter().collect();
        assert_eq!(
            collected,
            vec![("a", Addr::new(13)), ("b", Addr::new(-1)), ("c", Addr::new(10))]
        );
    }

    #[test]
    fn filter_keeps_matching_bindings() {
        let env = Env::new().set_id("keep", Addr::new(1)).set_id("drop", Addr::new(2));
        let filtered = env.filter(|name, _| name == "keep");
        assert_eq!(filtered.len(), 1);
        assert!(filtered.has_id("keep"));
    }
}
