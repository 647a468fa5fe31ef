use std::cell::RefCell;
use std::rc::Rc;

use crate::heap::{CellData, Heap, HeapStats};
use crate::symbol::{SymbolTable, WellKnown};
use crate::value::Value;

/// Shared context for one interpreter instance: the cell heap, the symbol
/// table and the permanent handles (nil and the true value). The compiler
/// and the virtual machine both borrow a `Runtime`; all allocation,
/// interning and root registration route through it.
pub struct Runtime {
    heap: Rc<RefCell<Heap>>,
    symbols: RefCell<SymbolTable>,
    nil: Value,
    truth: Value,
    pub syms: WellKnown,
}

impl Runtime {
    pub fn new() -> Runtime {
        let heap = Rc::new(RefCell::new(Heap::new()));
        let mut table = SymbolTable::new();
        let syms = WellKnown::intern_all(&heap, &mut table);
        let nil = syms.nil.clone();
        {
            let id = nil.cell();
            heap.borrow_mut().set_nil(id);
        }
        // The canonical true value: what `t` compiles to and what the
        // comparison instructions push.
        let truth = {
            let id = heap.borrow_mut().alloc(CellData::Integer(1));
            Value::from_cell(&heap, id)
        };
        Runtime {
            heap,
            symbols: RefCell::new(table),
            nil,
            truth,
            syms,
        }
    }

    /// A fresh handle to the nil sentinel.
    pub fn nil(&self) -> Value {
        self.nil.clone()
    }

    /// A fresh handle to the shared integer-1 cell used for true results.
    pub fn true_value(&self) -> Value {
        self.truth.clone()
    }

    /// Allocate an integer cell.
    pub fn integer(&self, value: i64) -> Value {
        let id = self.heap.borrow_mut().alloc(CellData::Integer(value));
        Value::from_cell(&self.heap, id)
    }

    /// Intern a symbol name, returning the canonical cell for it.
    pub fn intern(&self, name: &str) -> Value {
        self.symbols.borrow_mut().intern(&self.heap, name)
    }

    /// The name of a symbol value.
    pub fn symbol_name(&self, value: &Value) -> String {
        self.symbols.borrow().name(value.symbol_key()).to_string()
    }

    /// Build a proper list from a slice of values.
    pub fn list(&self, items: &[Value]) -> Value {
        let mut acc = self.nil();
        for item in items.iter().rev() {
            acc = Value::cons(item, &acc);
        }
        acc
    }

    /// Run a collection cycle now rather than waiting for exhaustion.
    pub fn gc_collect(&self) {
        self.heap.borrow_mut().collect();
    }

    pub fn gc_stats(&self) -> HeapStats {
        self.heap.borrow().stats()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_the_interned_nil_symbol() {
        let rt = Runtime::new();
        assert!(rt.nil().is_symbol());
        assert!(rt.nil().is_nil());
        assert_eq!(rt.symbol_name(&rt.nil()), "nil");
    }

    #[test]
    fn true_value_is_the_integer_one() {
        let rt = Runtime::new();
        assert!(rt.true_value().is_integer());
        assert_eq!(rt.true_value().as_integer(), 1);
        // One shared cell, handed out by handle.
        assert_eq!(rt.true_value(), rt.true_value());
    }

    #[test]
    fn collect_accounts_for_reachable_cells() {
        let rt = Runtime::new();
        let keep = rt.list(&[rt.integer(1), rt.integer(2)]);
        let _discard = rt.list(&[rt.integer(3)]);
        drop(_discard);
        rt.gc_collect();
        let stats = rt.gc_stats();
        // Everything reachable from a root is counted live; the dropped
        // list is not.
        assert!(stats.live_objects > 0);
        assert_eq!(stats.allocations, 0);
        assert_eq!(keep.car().as_integer(), 1);
    }

    #[test]
    fn stats_report_bank_growth() {
        let rt = Runtime::new();
        let mut pinned = Vec::new();
        for i in 0..2500 {
            pinned.push(rt.integer(i));
        }
        assert!(rt.gc_stats().banks >= 3);
    }
}
