use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use string_interner::{DefaultBackend, DefaultSymbol, StringInterner};

use crate::heap::{CellData, Heap};
use crate::value::Value;

/// Interned symbol table. Each unique name maps to a unique heap cell, so
/// symbol equality is cell identity. The table owns the name strings (via
/// the string interner) and holds a handle per symbol cell, which keeps
/// every interned symbol rooted for as long as the table lives.
pub struct SymbolTable {
    names: StringInterner<DefaultBackend>,
    cells: HashMap<DefaultSymbol, Value>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            names: StringInterner::new(),
            cells: HashMap::new(),
        }
    }

    /// Intern a name. Returns a handle to the existing cell if the name is
    /// already known, or allocates the canonical cell for it.
    pub fn intern(&mut self, heap: &Rc<RefCell<Heap>>, name: &str) -> Value {
        let key = self.names.get_or_intern(name);
        if let Some(value) = self.cells.get(&key) {
            return value.clone();
        }
        let id = heap.borrow_mut().alloc(CellData::Symbol(key));
        let value = Value::from_cell(heap, id);
        self.cells.insert(key, value.clone());
        value
    }

    /// Look up a symbol's name by its interner key.
    pub fn name(&self, key: DefaultSymbol) -> &str {
        self.names.resolve(key).expect("unresolved symbol key")
    }

    /// Total number of interned symbols.
    pub fn count(&self) -> usize {
        self.cells.len()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

/// Handles to the symbols the compiler treats specially, interned once at
/// startup. `nil` doubles as the heap's distinguished sentinel and `t` is
/// the surface name of truth (it compiles to the integer 1).
pub struct WellKnown {
    pub nil: Value,
    pub t: Value,
    pub quote: Value,
    pub if_: Value,
    pub lambda: Value,
    pub defun: Value,
    pub let_: Value,
    pub letrec: Value,
    pub progn: Value,
    pub apply: Value,
    pub cons: Value,
    pub car: Value,
    pub cdr: Value,
    pub consp: Value,
    pub print: Value,
    pub read: Value,
    pub add: Value,
    pub sub: Value,
    pub mul: Value,
    pub div: Value,
    pub eq: Value,
    pub lt: Value,
    pub gt: Value,
}

impl WellKnown {
    pub fn intern_all(heap: &Rc<RefCell<Heap>>, table: &mut SymbolTable) -> WellKnown {
        WellKnown {
            nil: table.intern(heap, "nil"),
            t: table.intern(heap, "t"),
            quote: table.intern(heap, "quote"),
            if_: table.intern(heap, "if"),
            lambda: table.intern(heap, "lambda"),
            defun: table.intern(heap, "defun"),
            let_: table.intern(heap, "let"),
            letrec: table.intern(heap, "letrec"),
            progn: table.intern(heap, "progn"),
            apply: table.intern(heap, "apply"),
            cons: table.intern(heap, "cons"),
            car: table.intern(heap, "car"),
            cdr: table.intern(heap, "cdr"),
            consp: table.intern(heap, "consp"),
            print: table.intern(heap, "print"),
            read: table.intern(heap, "read"),
            add: table.intern(heap, "+"),
            sub: table.intern(heap, "-"),
            mul: table.intern(heap, "*"),
            div: table.intern(heap, "/"),
            eq: table.intern(heap, "eq"),
            lt: table.intern(heap, "<"),
            gt: table.intern(heap, ">"),
        }
    }
}
