use string_interner::DefaultSymbol;

/// Number of cells in one bank, the unit of heap growth.
pub(crate) const BANK_SIZE: usize = 1000;

/// Index of a cell in the heap. Banks are only ever appended, so a flat
/// index is stable for the lifetime of the cell: bank = id / BANK_SIZE,
/// slot within the bank = id % BANK_SIZE.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CellId(pub(crate) u32);

impl std::fmt::Debug for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CellId({})", self.0)
    }
}

/// The kind of a live cell.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CellKind {
    Integer,
    Symbol,
    Cons,
    Closure,
}

/// Payload of a cell. `Free` doubles as the free-list link: a free cell
/// carries the index of the next free cell, `None` ending the list.
#[derive(Clone, Copy)]
pub(crate) enum CellData {
    Integer(i64),
    Symbol(DefaultSymbol),
    Cons { car: CellId, cdr: CellId },
    Closure { body: CellId, env: CellId },
    Free { next: Option<CellId> },
}

#[derive(Clone, Copy)]
struct Cell {
    marked: bool,
    data: CellData,
}

/// Status of a cell as the collector sees it. `Marked` only exists during
/// a collection cycle.
#[cfg(test)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum CellStatus {
    Used,
    Marked,
    Free,
}

/// A fixed-size array of cells. Banks are appended when the free list runs
/// dry and are never returned to the OS.
struct Bank {
    cells: Box<[Cell]>,
}

/// Key into the root set, held by a live `Value` handle.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RootSlot(u32);

/// Counters reported by [`Heap::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Cells handed out since the last collection cycle.
    pub allocations: u64,
    /// Cells reachable from the roots as of the last collection cycle.
    pub live_objects: u64,
    /// Banks currently backing the heap.
    pub banks: usize,
    /// Total root registrations and deregistrations so far.
    pub root_changes: u64,
}

/// The cell heap: bank storage, the free list, the root set and the
/// mark-sweep collector. All mutator access goes through `Value` handles;
/// the handles register their storage slot here so the collector can see
/// every exterior reference.
pub(crate) struct Heap {
    banks: Vec<Bank>,
    free_head: Option<CellId>,
    roots: Vec<Option<CellId>>,
    vacant_roots: Vec<u32>,
    nil: Option<CellId>,
    allocations: u64,
    live_objects: u64,
    root_changes: u64,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            banks: Vec::new(),
            free_head: None,
            roots: Vec::new(),
            vacant_roots: Vec::new(),
            nil: None,
            allocations: 0,
            live_objects: 0,
            root_changes: 0,
        }
    }

    /// Pop the head of the free list and stamp it with `data`. Runs a
    /// collection cycle first if the free list is empty; the collector
    /// guarantees at least one free cell on return.
    pub fn alloc(&mut self, data: CellData) -> CellId {
        debug_assert!(
            !matches!(data, CellData::Free { .. }),
            "cannot allocate a free cell"
        );
        let id = match self.free_head {
            Some(id) => id,
            None => {
                self.collect();
                self.free_head.expect("collector must leave a free cell")
            }
        };
        let next = match self.cell(id).data {
            CellData::Free { next } => next,
            _ => panic!("corrupted free list: head is not a free cell"),
        };
        self.free_head = next;
        *self.cell_mut(id) = Cell {
            marked: false,
            data,
        };
        self.allocations += 1;
        id
    }

    /// Run a full mark-sweep cycle. Marks everything reachable from the
    /// root set, returns every unmarked live cell to the free list, and
    /// appends a fresh bank if sweeping recovered nothing.
    pub fn collect(&mut self) {
        // Mark.
        let mut worklist: Vec<CellId> = self.roots.iter().flatten().copied().collect();
        let mut live: u64 = 0;
        while let Some(id) = worklist.pop() {
            let cell = self.cell_mut(id);
            if let CellData::Free { .. } = cell.data {
                panic!("free cell {:?} reached from a live reference", id);
            }
            if cell.marked {
                continue;
            }
            cell.marked = true;
            live += 1;
            match cell.data {
                CellData::Cons { car, cdr } => {
                    worklist.push(car);
                    worklist.push(cdr);
                }
                CellData::Closure { body, env } => {
                    worklist.push(body);
                    worklist.push(env);
                }
                // Integers and symbols have no outgoing references.
                _ => {}
            }
        }

        // Sweep: marked cells survive into the next cycle, unmarked live
        // cells are prepended to the free list, free cells are left alone.
        let mut recovered: u64 = 0;
        for bank_idx in 0..self.banks.len() {
            for slot in 0..BANK_SIZE {
                let id = CellId((bank_idx * BANK_SIZE + slot) as u32);
                let cell = &mut self.banks[bank_idx].cells[slot];
                if let CellData::Free { .. } = cell.data {
                    continue;
                }
                if cell.marked {
                    cell.marked = false;
                } else {
                    cell.data = CellData::Free {
                        next: self.free_head,
                    };
                    self.free_head = Some(id);
                    recovered += 1;
                }
            }
        }

        self.live_objects = live;
        tracing::debug!(
            allocations = self.allocations,
            live,
            recovered,
            "collection cycle"
        );

        if self.free_head.is_none() {
            self.append_bank();
        }
        self.allocations = 0;
    }

    fn append_bank(&mut self) {
        let base = (self.banks.len() * BANK_SIZE) as u32;
        let mut cells = Vec::with_capacity(BANK_SIZE);
        for i in 0..BANK_SIZE {
            // Chain each cell to its neighbour; the last cell picks up
            // whatever free list already exists.
            let next = if i + 1 < BANK_SIZE {
                Some(CellId(base + i as u32 + 1))
            } else {
                self.free_head
            };
            cells.push(Cell {
                marked: false,
                data: CellData::Free { next },
            });
        }
        self.banks.push(Bank {
            cells: cells.into_boxed_slice(),
        });
        self.free_head = Some(CellId(base));
        tracing::info!(banks = self.banks.len(), "appended a new cell bank");
    }

    // ------------------------------------------------------------------
    // Root set
    // ------------------------------------------------------------------

    pub fn add_root(&mut self, target: CellId) -> RootSlot {
        self.root_changes += 1;
        match self.vacant_roots.pop() {
            Some(slot) => {
                debug_assert!(self.roots[slot as usize].is_none());
                self.roots[slot as usize] = Some(target);
                RootSlot(slot)
            }
            None => {
                self.roots.push(Some(target));
                RootSlot((self.roots.len() - 1) as u32)
            }
        }
    }

    pub fn remove_root(&mut self, slot: RootSlot) {
        let prev = self.roots[slot.0 as usize].take();
        assert!(prev.is_some(), "removing a root that is not registered");
        self.vacant_roots.push(slot.0);
        self.root_changes += 1;
    }

    pub fn root_target(&self, slot: RootSlot) -> CellId {
        self.roots[slot.0 as usize].expect("reading a vacant root slot")
    }

    // ------------------------------------------------------------------
    // Cell access
    // ------------------------------------------------------------------

    fn cell(&self, id: CellId) -> &Cell {
        &self.banks[id.0 as usize / BANK_SIZE].cells[id.0 as usize % BANK_SIZE]
    }

    fn cell_mut(&mut self, id: CellId) -> &mut Cell {
        &mut self.banks[id.0 as usize / BANK_SIZE].cells[id.0 as usize % BANK_SIZE]
    }

    pub fn kind(&self, id: CellId) -> CellKind {
        match self.cell(id).data {
            CellData::Integer(_) => CellKind::Integer,
            CellData::Symbol(_) => CellKind::Symbol,
            CellData::Cons { .. } => CellKind::Cons,
            CellData::Closure { .. } => CellKind::Closure,
            CellData::Free { .. } => panic!("free cell {:?} reached through a handle", id),
        }
    }

    #[cfg(test)]
    pub(crate) fn status(&self, id: CellId) -> CellStatus {
        let cell = self.cell(id);
        if let CellData::Free { .. } = cell.data {
            CellStatus::Free
        } else if cell.marked {
            CellStatus::Marked
        } else {
            CellStatus::Used
        }
    }

    pub fn integer(&self, id: CellId) -> i64 {
        match self.cell(id).data {
            CellData::Integer(i) => i,
            _ => panic!("accessing numeric value of non-integer cell"),
        }
    }

    pub fn symbol(&self, id: CellId) -> DefaultSymbol {
        match self.cell(id).data {
            CellData::Symbol(key) => key,
            _ => panic!("accessing name of non-symbol cell"),
        }
    }

    pub fn car(&self, id: CellId) -> CellId {
        match self.cell(id).data {
            CellData::Cons { car, .. } => car,
            _ => panic!("accessing car of non-cons cell"),
        }
    }

    pub fn cdr(&self, id: CellId) -> CellId {
        match self.cell(id).data {
            CellData::Cons { cdr, .. } => cdr,
            _ => panic!("accessing cdr of non-cons cell"),
        }
    }

    pub fn body(&self, id: CellId) -> CellId {
        match self.cell(id).data {
            CellData::Closure { body, .. } => body,
            _ => panic!("accessing body of non-closure cell"),
        }
    }

    pub fn env(&self, id: CellId) -> CellId {
        match self.cell(id).data {
            CellData::Closure { env, .. } => env,
            _ => panic!("accessing environment of non-closure cell"),
        }
    }

    pub fn set_car(&mut self, id: CellId, value: CellId) {
        match &mut self.cell_mut(id).data {
            CellData::Cons { car, .. } => *car = value,
            _ => panic!("setting car of non-cons cell"),
        }
    }

    pub fn set_cdr(&mut self, id: CellId, value: CellId) {
        match &mut self.cell_mut(id).data {
            CellData::Cons { cdr, .. } => *cdr = value,
            _ => panic!("setting cdr of non-cons cell"),
        }
    }

    // ------------------------------------------------------------------
    // Distinguished nil
    // ------------------------------------------------------------------

    pub fn set_nil(&mut self, id: CellId) {
        self.nil = Some(id);
    }

    pub fn is_nil(&self, id: CellId) -> bool {
        self.nil == Some(id)
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            allocations: self.allocations,
            live_objects: self.live_objects,
            banks: self.banks.len(),
            root_changes: self.root_changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_with_no_roots_frees_every_cell() {
        let mut heap = Heap::new();
        for i in 0..10 {
            heap.alloc(CellData::Integer(i));
        }
        heap.collect();
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn roots_pin_cells_across_collection() {
        let mut heap = Heap::new();
        let kept = heap.alloc(CellData::Integer(7));
        let slot = heap.add_root(kept);
        let dropped = heap.alloc(CellData::Integer(8));
        heap.collect();
        assert_eq!(heap.status(kept), CellStatus::Used);
        assert_eq!(heap.status(dropped), CellStatus::Free);
        assert_eq!(heap.stats().live_objects, 1);

        heap.remove_root(slot);
        heap.collect();
        assert_eq!(heap.status(kept), CellStatus::Free);
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn cons_children_are_marked_through_the_parent() {
        let mut heap = Heap::new();
        let a = heap.alloc(CellData::Integer(1));
        let b = heap.alloc(CellData::Integer(2));
        let pair = heap.alloc(CellData::Cons { car: a, cdr: b });
        let _slot = heap.add_root(pair);
        heap.collect();
        assert_eq!(heap.status(a), CellStatus::Used);
        assert_eq!(heap.status(b), CellStatus::Used);
        assert_eq!(heap.stats().live_objects, 3);
    }

    #[test]
    fn unreachable_cycles_are_collected() {
        let mut heap = Heap::new();
        let seed = heap.alloc(CellData::Integer(0));
        let x = heap.alloc(CellData::Cons {
            car: seed,
            cdr: seed,
        });
        let y = heap.alloc(CellData::Cons { car: x, cdr: x });
        heap.set_car(x, y);
        heap.collect();
        assert_eq!(heap.status(x), CellStatus::Free);
        assert_eq!(heap.status(y), CellStatus::Free);
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn a_fully_live_heap_grows_a_new_bank() {
        let mut heap = Heap::new();
        let mut slots = Vec::new();
        for i in 0..BANK_SIZE {
            let id = heap.alloc(CellData::Integer(i as i64));
            slots.push(heap.add_root(id));
        }
        assert_eq!(heap.stats().banks, 1);
        // Every cell in the first bank is live, so this allocation has to
        // append a second bank.
        let extra = heap.alloc(CellData::Integer(-1));
        assert_eq!(heap.stats().banks, 2);
        assert_eq!(heap.status(extra), CellStatus::Used);
        assert_eq!(heap.stats().live_objects, BANK_SIZE as u64);
    }

    #[test]
    fn freed_cells_are_reused_before_the_heap_grows() {
        let mut heap = Heap::new();
        let kept = heap.alloc(CellData::Integer(1));
        let _slot = heap.add_root(kept);
        for i in 0..(BANK_SIZE * 3) {
            heap.alloc(CellData::Integer(i as i64));
        }
        // Churning through three banks' worth of garbage must not grow the
        // heap beyond its first bank.
        assert_eq!(heap.stats().banks, 1);
        assert_eq!(heap.integer(kept), 1);
    }

    #[test]
    fn root_changes_count_registrations_and_removals() {
        let mut heap = Heap::new();
        let id = heap.alloc(CellData::Integer(1));
        let before = heap.stats().root_changes;
        let slot = heap.add_root(id);
        heap.remove_root(slot);
        assert_eq!(heap.stats().root_changes, before + 2);
    }

    #[test]
    #[should_panic(expected = "removing a root that is not registered")]
    fn removing_a_vacant_root_panics() {
        let mut heap = Heap::new();
        let id = heap.alloc(CellData::Integer(1));
        let slot = heap.add_root(id);
        heap.remove_root(slot);
        heap.remove_root(slot);
    }
}
