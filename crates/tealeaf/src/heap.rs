//! Persistent address-to-value heap.
//!
//! Every path fork snapshots the whole machine state, so the heap is built
//! for cheap cloning: cells live in fixed-size pages behind `Arc`, cloning
//! copies only the page spine, and a write copies just the page it touches.
//! Negative addresses hold pre-allocated built-ins shared by every heap and
//! immune to offsetting.

use std::{fmt, sync::Arc};

use ahash::{AHashMap, AHashSet};

use crate::{parse::CodeRange, value::Value};

/// Number of cells per page. Small enough that copy-on-write of one page is
/// cheap, large enough that the spine stays short.
const PAGE_SIZE: usize = 64;

/// An integer tag identifying a cell in a heap.
///
/// Negative addresses are reserved for built-ins and never change under
/// offsetting; addresses at or above zero are allocated by `malloc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Addr(i64);

impl Addr {
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whether this address lives in the pre-allocated built-in region.
    #[must_use]
    pub const fn is_builtin(self) -> bool {
        self.0 < 0
    }

    /// Adds `delta` unless the address is a built-in.
    #[must_use]
    pub const fn offset(self, delta: i64) -> Self {
        if self.is_builtin() { self } else { Self(self.0 + delta) }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Page = Arc<Vec<Option<Value>>>;

/// Persistent mapping from [`Addr`] to [`Value`] plus the allocation counter.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    /// Positive-address cells, paged. Address `a` lives at
    /// `pages[a / PAGE_SIZE][a % PAGE_SIZE]`.
    pages: Vec<Page>,
    /// Next address to hand out; monotonically increasing.
    next: i64,
    /// Built-in cells at negative addresses, shared by all heaps of a session.
    builtins: Arc<AHashMap<i64, Value>>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a built-in value at a negative address.
    ///
    /// Only used while seeding the built-in environment, before any fork.
    ///
    /// # Panics
    /// Panics when `addr` is not negative.
    #[must_use]
    pub fn set_builtin(&self, addr: Addr, value: Value) -> Self {
        assert!(addr.is_builtin(), "built-in cells must use negative addresses");
        let mut out = self.clone();
        Arc::make_mut(&mut out.builtins).insert(addr.raw(), value);
        out
    }

    /// Allocates a fresh positive address holding `Undef`.
    #[must_use]
    pub fn malloc(&self, span: Option<CodeRange>) -> (Addr, Self) {
        let _ = span;
        let addr = Addr::new(self.next);
        let mut out = self.clone();
        out.next += 1;
        let (page_idx, slot) = split_addr(addr);
        if page_idx == out.pages.len() {
            out.pages.push(Arc::new(Vec::with_capacity(PAGE_SIZE)));
        }
        let page = Arc::make_mut(&mut out.pages[page_idx]);
        debug_assert_eq!(page.len(), slot);
        page.push(Some(Value::Undef));
        (addr, out)
    }

    /// Allocation plus initialization in one step.
    #[must_use]
    pub fn alloc_new(&self, value: Value, span: Option<CodeRange>) -> (Addr, Self) {
        let (addr, heap) = self.malloc(span);
        (addr, heap.set_val(addr, value))
    }

    /// Replaces the value at an existing address.
    ///
    /// Writes to unknown addresses are ignored (asserted in debug builds):
    /// the contract is that callers only write to addresses they obtained
    /// from `malloc` or the built-in table.
    #[must_use]
    pub fn set_val(&self, addr: Addr, value: Value) -> Self {
        let mut out = self.clone();
        if addr.is_builtin() {
            debug_assert!(out.builtins.contains_key(&addr.raw()), "set_val on unknown built-in {addr}");
            Arc::make_mut(&mut out.builtins).insert(addr.raw(), value);
            return out;
        }
        let (page_idx, slot) = split_addr(addr);
        let Some(page) = out.pages.get_mut(page_idx) else {
            debug_assert!(false, "set_val on unallocated address {addr}");
            return out;
        };
        let page = Arc::make_mut(page);
        match page.get_mut(slot) {
            Some(cell) => *cell = Some(value),
            None => debug_assert!(false, "set_val on unallocated address {addr}"),
        }
        out
    }

    #[must_use]
    pub fn get_val(&self, addr: Addr) -> Option<&Value> {
        if addr.is_builtin() {
            return self.builtins.get(&addr.raw());
        }
        let (page_idx, slot) = split_addr(addr);
        self.pages.get(page_idx)?.get(slot)?.as_ref()
    }

    /// Follows `Addr` indirections until a non-address value.
    ///
    /// Chains are finite by invariant; the depth guard turns a violated
    /// invariant into a miss instead of a hang.
    #[must_use]
    pub fn follow(&self, addr: Addr) -> Option<&Value> {
        let mut current = addr;
        for _ in 0..64 {
            match self.get_val(current)? {
                Value::Addr(next) => current = *next,
                value => return Some(value),
            }
        }
        None
    }

    /// Number of addresses handed out so far.
    #[must_use]
    pub fn alloc_count(&self) -> i64 {
        self.next
    }

    /// Number of live (non-freed) positive cells.
    #[must_use]
    pub fn live_cells(&self) -> usize {
        self.pages.iter().map(|page| page.iter().flatten().count()).sum()
    }

    /// Rewrites every positive address, both as cell key and inside every
    /// reachable value, by `delta`. Built-ins are untouched.
    #[must_use]
    pub fn add_offset(&self, delta: i64) -> Self {
        if delta == 0 {
            return self.clone();
        }
        let mut out = Self {
            pages: Vec::new(),
            next: 0,
            builtins: Arc::clone(&self.builtins),
        };
        // Reserve the shifted prefix as freed cells so page geometry stays
        // aligned with raw addresses.
        if delta > 0 {
            out.reserve_empty(delta as usize);
        }
        for (raw, value) in self.cells() {
            let target = raw + delta;
            if target < 0 {
                continue;
            }
            out.place(target, value.add_offset(delta));
        }
        out.next = (self.next + delta).max(0);
        out
    }

    /// Copies every positive cell of `other`, offset past this heap's
    /// allocations, and returns the applied delta with the merged heap.
    /// Used when pulling an imported module's store into the importer.
    #[must_use]
    pub fn merge(&self, other: &Self) -> (i64, Self) {
        let delta = self.next;
        let shifted = other.add_offset(delta);
        let mut out = self.clone();
        for (raw, value) in shifted.cells() {
            if raw >= delta {
                out.place(raw, value.clone());
            }
        }
        out.next = shifted.next.max(out.next);
        (delta, out)
    }

    /// Mark-sweep collection from the given roots.
    ///
    /// Marks transitively through object attributes, subscripts and captured
    /// environments; frees every unmarked positive cell. Built-ins are
    /// always live.
    #[must_use]
    pub fn run_gc(&self, roots: impl IntoIterator<Item = Addr>) -> Self {
        let mut marked: AHashSet<i64> = AHashSet::new();
        let mut work: Vec<Addr> = roots.into_iter().collect();
        while let Some(addr) = work.pop() {
            if addr.is_builtin() || !marked.insert(addr.raw()) {
                continue;
            }
            if let Some(value) = self.get_val(addr) {
                let mut found = Vec::new();
                value.collect_addrs(&mut found);
                work.extend(found);
            }
        }

        let mut out = self.clone();
        for (page_idx, page) in out.pages.iter_mut().enumerate() {
            let base = (page_idx * PAGE_SIZE) as i64;
            let any_dead = page
                .iter()
                .enumerate()
                .any(|(slot, cell)| cell.is_some() && !marked.contains(&(base + slot as i64)));
            if !any_dead {
                continue;
            }
            let page = Arc::make_mut(page);
            for (slot, cell) in page.iter_mut().enumerate() {
                if cell.is_some() && !marked.contains(&(base + slot as i64)) {
                    *cell = None;
                }
            }
        }
        out
    }

    /// Iterates over live positive cells as `(raw address, value)`.
    pub fn cells(&self) -> impl Iterator<Item = (i64, &Value)> {
        self.pages.iter().enumerate().flat_map(|(page_idx, page)| {
            let base = (page_idx * PAGE_SIZE) as i64;
            page.iter()
                .enumerate()
                .filter_map(move |(slot, cell)| cell.as_ref().map(|value| (base + slot as i64, value)))
        })
    }

    fn reserve_empty(&mut self, count: usize) {
        for _ in 0..count {
            let idx = self.next as usize;
            let (page_idx, slot) = (idx / PAGE_SIZE, idx % PAGE_SIZE);
            if page_idx == self.pages.len() {
                self.pages.push(Arc::new(Vec::with_capacity(PAGE_SIZE)));
            }
            let page = Arc::make_mut(&mut self.pages[page_idx]);
            debug_assert_eq!(page.len(), slot);
            page.push(None);
            self.next += 1;
        }
    }

    /// Installs `value` at raw address `raw`, growing pages as needed.
    fn place(&mut self, raw: i64, value: Value) {
        let idx = raw as usize;
        let (page_idx, slot) = (idx / PAGE_SIZE, idx % PAGE_SIZE);
        while page_idx >= self.pages.len() {
            self.pages.push(Arc::new(vec![None; PAGE_SIZE]));
        }
        let page = Arc::make_mut(&mut self.pages[page_idx]);
        if page.len() <= slot {
            page.resize(slot + 1, None);
        }
        page[slot] = Some(value);
        if raw >= self.next {
            self.next = raw + 1;
        }
    }
}

fn split_addr(addr: Addr) -> (usize, usize) {
    let idx = addr.raw() as usize;
    (idx / PAGE_SIZE, idx % PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::Env,
        value::{ObjGen, Object},
    };

    #[test]
    fn malloc_then_set_then_get() {
        let heap = Heap::new();
        let (addr, heap) = heap.malloc(None);
        assert_eq!(heap.get_val(addr), Some(&Value::Undef));
        let heap = heap.set_val(addr, Value::int(7, None));
        assert_eq!(heap.get_val(addr), Some(&Value::int(7, None)));
    }

    #[test]
    fn persistence_across_snapshots() {
        let heap = Heap::new();
        let (addr, heap) = heap.alloc_new(Value::int(1, None), None);
        let forked = heap.set_val(addr, Value::int(2, None));
        assert_eq!(heap.get_val(addr), Some(&Value::int(1, None)));
        assert_eq!(forked.get_val(addr), Some(&Value::int(2, None)));
    }

    #[test]
    fn follow_chases_address_chains() {
        let heap = Heap::new();
        let (a, heap) = heap.alloc_new(Value::int(5, None), None);
        let (b, heap) = heap.alloc_new(Value::Addr(a), None);
        assert_eq!(heap.follow(b), Some(&Value::int(5, None)));
    }

    #[test]
    fn offset_round_trips_on_positive_addresses() {
        let heap = Heap::new();
        let (a, heap) = heap.alloc_new(Value::int(1, None), None);
        let (b, heap) = heap.alloc_new(Value::Addr(a), None);
        let shifted = heap.add_offset(3);
        assert_eq!(shifted.get_val(a.offset(3)), Some(&Value::int(1, None)));
        assert_eq!(shifted.get_val(b.offset(3)), Some(&Value::Addr(a.offset(3))));
        let back = shifted.add_offset(-3);
        assert_eq!(back.get_val(a), heap.get_val(a));
        assert_eq!(back.get_val(b), heap.get_val(b));
    }

    #[test]
    fn builtins_survive_offset_and_gc() {
        let heap = Heap::new().set_builtin(Addr::new(-1), Value::string("print", None));
        let shifted = heap.add_offset(10);
        assert_eq!(shifted.get_val(Addr::new(-1)), Some(&Value::string("print", None)));
        let collected = heap.run_gc([]);
        assert_eq!(collected.get_val(Addr::new(-1)), Some(&Value::string("print", None)));
    }

    #[test]
    fn gc_frees_unreachable_cells() {
        let r#gen = ObjGen::new();
        let heap = Heap::new();
        let (kept_inner, heap) = heap.alloc_new(Value::int(3, None), None);
        let (kept, heap) = heap.alloc_new(
            Value::Object(Box::new(
                Object::new(r#gen.fresh(), Addr::new(1)).with_attr("inner", Value::Addr(kept_inner)),
            )),
            None,
        );
        let (dropped, heap) = heap.alloc_new(Value::int(9, None), None);
        let env = Env::new().set_id("root", kept);
        let collected = heap.run_gc(env.addrs());
        assert_eq!(collected.get_val(dropped), None);
        assert!(collected.get_val(kept).is_some());
        assert!(collected.get_val(kept_inner).is_some());
        assert_eq!(collected.alloc_count(), heap.alloc_count());
    }

    #[test]
    fn merge_offsets_the_imported_heap() {
        let base = Heap::new();
        let (a, base) = base.alloc_new(Value::int(1, None), None);
        let module = Heap::new();
        let (m, module) = module.alloc_new(Value::int(2, None), None);
        let (delta, merged) = base.merge(&module);
        assert_eq!(delta, 1);
        assert_eq!(merged.get_val(a), Some(&Value::int(1, None)));
        assert_eq!(merged.get_val(m.offset(delta)), Some(&Value::int(2, None)));
    }
}
