use std::cell::RefCell;
use std::rc::Rc;

use string_interner::DefaultSymbol;

use crate::error::{Error, Result};
use crate::heap::{CellData, CellId, CellKind, Heap};
use crate::heap::RootSlot;

/// An exterior, owning reference to one heap cell.
///
/// The handle acts both as a smart pointer that registers its storage slot
/// with the collector's root set and as a checked accessor to the contents
/// of the underlying cell. Cloning a handle produces an independent root
/// registration for the same cell; dropping it deregisters. As long as a
/// handle is alive, its cell survives every collection cycle.
///
/// Equality is cell identity. Because symbols are interned, two symbol
/// handles are equal exactly when their names are equal.
pub struct Value {
    heap: Rc<RefCell<Heap>>,
    slot: RootSlot,
}

impl Value {
    pub(crate) fn from_cell(heap: &Rc<RefCell<Heap>>, cell: CellId) -> Value {
        let slot = heap.borrow_mut().add_root(cell);
        Value {
            heap: Rc::clone(heap),
            slot,
        }
    }

    /// Allocate a fresh cons cell.
    pub fn cons(car: &Value, cdr: &Value) -> Value {
        let (car_id, cdr_id) = (car.cell(), cdr.cell());
        let id = car.heap.borrow_mut().alloc(CellData::Cons {
            car: car_id,
            cdr: cdr_id,
        });
        Value::from_cell(&car.heap, id)
    }

    /// Allocate a fresh closure pairing `body` with a captured environment.
    pub fn closure(body: &Value, env: &Value) -> Value {
        let (body_id, env_id) = (body.cell(), env.cell());
        let id = body.heap.borrow_mut().alloc(CellData::Closure {
            body: body_id,
            env: env_id,
        });
        Value::from_cell(&body.heap, id)
    }

    pub(crate) fn cell(&self) -> CellId {
        self.heap.borrow().root_target(self.slot)
    }

    pub(crate) fn symbol_key(&self) -> DefaultSymbol {
        let id = self.cell();
        self.heap.borrow().symbol(id)
    }

    pub fn kind(&self) -> CellKind {
        let id = self.cell();
        self.heap.borrow().kind(id)
    }

    pub fn is_integer(&self) -> bool {
        self.kind() == CellKind::Integer
    }

    pub fn is_symbol(&self) -> bool {
        self.kind() == CellKind::Symbol
    }

    pub fn is_cons(&self) -> bool {
        self.kind() == CellKind::Cons
    }

    pub fn is_closure(&self) -> bool {
        self.kind() == CellKind::Closure
    }

    pub fn is_nil(&self) -> bool {
        let id = self.cell();
        self.heap.borrow().is_nil(id)
    }

    /// Anything other than nil and the integer 0 counts as true.
    pub fn is_truthy(&self) -> bool {
        !(self.is_nil() || (self.is_integer() && self.as_integer() == 0))
    }

    /// The numeric payload. Misuse on a non-integer is a programmer error.
    pub fn as_integer(&self) -> i64 {
        let id = self.cell();
        self.heap.borrow().integer(id)
    }

    /// The first reference of a cons cell. Misuse is a programmer error;
    /// use [`Value::try_car`] where the kind is not known.
    pub fn car(&self) -> Value {
        let id = self.cell();
        let car = self.heap.borrow().car(id);
        Value::from_cell(&self.heap, car)
    }

    pub fn cdr(&self) -> Value {
        let id = self.cell();
        let cdr = self.heap.borrow().cdr(id);
        Value::from_cell(&self.heap, cdr)
    }

    /// The code body of a closure.
    pub fn body(&self) -> Value {
        let id = self.cell();
        let body = self.heap.borrow().body(id);
        Value::from_cell(&self.heap, body)
    }

    /// The captured environment of a closure.
    pub fn env(&self) -> Value {
        let id = self.cell();
        let env = self.heap.borrow().env(id);
        Value::from_cell(&self.heap, env)
    }

    /// Overwrite the car of a cons cell in place.
    pub fn set_car(&self, value: &Value) {
        let (id, v) = (self.cell(), value.cell());
        self.heap.borrow_mut().set_car(id, v);
    }

    /// Overwrite the cdr of a cons cell in place.
    pub fn set_cdr(&self, value: &Value) {
        let (id, v) = (self.cell(), value.cell());
        self.heap.borrow_mut().set_cdr(id, v);
    }

    /// Checked car: a type error instead of a panic on a non-cons.
    pub fn try_car(&self) -> Result<Value> {
        if self.is_cons() {
            Ok(self.car())
        } else {
            Err(Error::Type(format!(
                "cannot take the car of {}",
                self.kind_name()
            )))
        }
    }

    /// Checked cdr: a type error instead of a panic on a non-cons.
    pub fn try_cdr(&self) -> Result<Value> {
        if self.is_cons() {
            Ok(self.cdr())
        } else {
            Err(Error::Type(format!(
                "cannot take the cdr of {}",
                self.kind_name()
            )))
        }
    }

    /// Human-readable kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        if self.is_nil() {
            return "nil";
        }
        match self.kind() {
            CellKind::Integer => "an integer",
            CellKind::Symbol => "a symbol",
            CellKind::Cons => "a cons cell",
            CellKind::Closure => "a closure",
        }
    }
}

impl Clone for Value {
    fn clone(&self) -> Value {
        Value::from_cell(&self.heap, self.cell())
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        self.heap.borrow_mut().remove_root(self.slot);
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.heap, &other.heap) && self.cell() == other.cell()
    }
}

impl Eq for Value {}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Value({:?}, {:?})", self.cell(), self.kind())
    }
}
