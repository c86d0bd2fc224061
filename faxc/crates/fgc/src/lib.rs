//! fgc - Value Representation & Garbage-Collected Heap
//!
//! ============================================================================
//! VALUE REPRESENTATION THEORY
//! ============================================================================
//!
//! A dynamically-typed VM needs one representation wide enough to hold any
//! runtime value — nil, a bool, a number, or a reference to something on
//! the heap — and cheap enough to push/pop/compare millions of times a
//! second.
//!
//! TWO CLASSIC STRATEGIES:
//! ------------------------
//! 1. NaN-BOXING: steal the unused bit patterns inside an IEEE-754 double's
//!    NaN space to smuggle a pointer or a small tag through a single
//!    8-byte word. One word per value, no branch to tell "is this a
//!    number" from "is this a pointer" beyond a bitmask — but it requires
//!    unsafe transmutation between `f64` and `u64` and a pointer stuffed
//!    into 48 of those bits, so the compiler can no longer catch a
//!    forgotten type check for you.
//! 2. TAGGED UNION: an explicit enum with one variant per value kind. One
//!    extra discriminant word of overhead versus NaN-boxing, paid back in
//!    full by the borrow checker and exhaustive `match` — a missing case
//!    is a compile error, not a wrong bit pattern at 2am.
//!
//! `Value` here is the tagged union. NaN-boxing is a legitimate choice
//! this crate's design docs record as rejected, not unconsidered — the
//! tradeoff is real, it was just decided the other way.
//!
//! ```text
//! enum Value {
//!     Nil,
//!     Bool(bool),
//!     Number(f64),
//!     Obj(ObjHandle),
//! }
//! ```
//!
//! EQUALITY:
//! ---------
//! `valuesEqual` is reflexive, symmetric and transitive over `Value` by
//! construction: `match`ing both tags together means a `Number` and an
//! `ObjString` holding the digit "1" can never compare equal by accident,
//! the way a bit-punned representation could if a mask were ever wrong.
//!
//! ============================================================================
//! HEAP OBJECT MODEL
//! ============================================================================
//!
//! Every heap value — string, function, closure, class, instance, bound
//! method, upvalue, native — is an `Object` variant stored behind an
//! `ObjHandle(u32)`, an index into the heap's slot arena rather than a raw
//! pointer. A handle is Copy, fits in a register, and stays valid for the
//! referent's entire lifetime: the arena never relocates a live object, so
//! no fix-up pass is needed after a collection the way a moving/compacting
//! collector would require.
//!
//! This arena *is* the "every object ever allocated" list a pointer-linked
//! heap would thread through object headers: slot order takes the place of
//! the intrusive `next` pointer, and a slot's own `marked` flag takes the
//! place of a flag living inside a shared object header. A freed slot's
//! index is pushed onto a free list and handed back out to the next
//! allocation, so handles for dead objects are never silently reused while
//! one is still reachable.
//!
//! ============================================================================
//! HASH TABLE THEORY
//! ============================================================================
//!
//! `Table` is an open-addressed hash table: every entry lives directly in
//! the backing array (no separate bucket chains), and a collision is
//! resolved by **linear probing** — walking forward from the ideal slot
//! until an empty one, or the matching key, is found.
//!
//! DELETION VS. TOMBSTONES:
//! -------------------------
//! Naively clearing a deleted slot to empty would break every probe
//! sequence that passed through it looking for a later key, since an
//! empty slot is the probe's stopping condition. Instead a deleted entry
//! becomes a **tombstone** — a slot marked "deleted" that a probe treats
//! as occupied-but-skippable for lookups, and as reusable for insertions.
//! `find_string` and friends therefore probe *past* tombstones on read but
//! may reclaim one on write.
//!
//! LOAD FACTOR AND GROWTH:
//! ------------------------
//! The table grows (doubling capacity) once `count / capacity` would
//! exceed 0.75; past that point probe sequences start degrading toward
//! O(n). Growth rehashes every live entry into a fresh array and drops
//! tombstones entirely, which is also the only point at which a
//! tombstone's slot is reclaimed for good.
//!
//! This one structure backs four distinct uses with the same code: the
//! interned-string set, global variables, instance fields, and class
//! method tables — interning in particular depends on `find_string`
//! comparing by hash-then-bytes so that two equal string contents always
//! resolve to the same heap object.
//!
//! ============================================================================
//! GARBAGE COLLECTION THEORY
//! ============================================================================
//!
//! The collector is a **precise, non-moving, stop-the-world, tri-color
//! mark-and-sweep** collector — the textbook approach for a heap where the
//! VM can enumerate every root without a write barrier or concurrent
//! mutator to race against.
//!
//! TRI-COLOR INVARIANT:
//! ----------------------
//! Every object is conceptually:
//! - WHITE: not yet visited this cycle (candidate for collection).
//! - GRAY: visited, but its own references haven't been traced yet.
//! - BLACK: visited and fully traced (everything it points to is at least
//!   gray).
//!
//! The invariant the algorithm maintains: no black object ever points
//! directly at a white one without a gray object in between still to be
//! traced. Since this collector stops the world, that invariant can never
//! be violated mid-cycle by a concurrent mutator write, which is what lets
//! it skip a write barrier a concurrent collector would need.
//!
//! ALGORITHM:
//! ----------
//! ```text
//! mark_roots():       push every VM root (stack slots, globals, open
//!                     upvalues, call-frame closures) onto the gray
//!                     worklist, marking each black-bound-for-gray.
//! trace_references():  pop the gray worklist until empty; for each
//!                     object popped, mark everything *it* references
//!                     gray (pushing them onto the worklist) and consider
//!                     the popped object itself black.
//! remove_white():      interned strings that are still white after
//!                     tracing are weak references — drop them from the
//!                     intern table before sweeping so a dead string's
//!                     table entry doesn't resurrect it.
//! sweep():             walk the slot arena; any slot still white is
//!                     freed and returned to the free list; every
//!                     surviving slot's `marked` flag is reset for the
//!                     next cycle.
//! ```
//!
//! WHEN IT RUNS:
//! -------------
//! Allocation-triggered: a collection runs when `bytes_allocated` would
//! cross `next_gc`, after which `next_gc` is set to
//! `bytes_allocated * grow_factor` so the heap gets proportionally more
//! room to grow between collections as the live set grows. A `stress_gc`
//! debug mode collects before *every* allocation instead, trading
//! throughput for maximum odds of catching a missing root.
//!
//! A collection-triggering allocation that happens mid-expression (for
//! example, while concatenating two strings) must not see its own
//! just-built-but-not-yet-rooted operands swept out from under it — every
//! call site that allocates while other values are only reachable via the
//! VM's value stack pushes the new object before popping its inputs, so
//! the stack itself keeps everything live across the collection.

pub mod chunk;
pub mod heap;
pub mod object;
pub mod table;
pub mod value;

pub use chunk::{Chunk, OpCode, MAX_CONSTANTS, MAX_JUMP};
pub use heap::Heap;
pub use object::{
    FunctionKind, NativeFn, Object, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjHandle,
    ObjInstance, ObjNative, ObjString, ObjUpvalue, UpvalueDesc, UpvalueState,
};
pub use table::Table;
pub use value::Value;
