use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Integer clock tick. Absolute time values are nonnegative by construction;
/// relative offsets may be negative.
pub type Tick = i64;

static GLOBAL_TICKS: AtomicI64 = AtomicI64::new(0);

/// A monotonic counter handing out timestamps.
///
/// The process-wide source backs every graph by default and stamps through an
/// atomic fetch-increment, so concurrent instrumentation threads never hand
/// out the same tick. Tests rebind graphs to a fresh local source so their
/// clocks start at zero and stay isolated.
#[derive(Debug, Clone)]
pub struct TimeSource {
    inner: SourceInner,
}

#[derive(Debug, Clone)]
enum SourceInner {
    Global,
    Local(Rc<Cell<Tick>>),
}

impl TimeSource {
    /// Handle on the process-wide clock.
    pub fn global() -> Self {
        TimeSource {
            inner: SourceInner::Global,
        }
    }

    /// A fresh local clock starting at tick 0.
    pub fn new() -> Self {
        TimeSource {
            inner: SourceInner::Local(Rc::new(Cell::new(0))),
        }
    }

    /// The current tick, i.e. the value the next stamp will take.
    pub fn now(&self) -> Tick {
        match &self.inner {
            SourceInner::Global => GLOBAL_TICKS.load(Ordering::SeqCst),
            SourceInner::Local(cell) => cell.get(),
        }
    }

    /// Returns the current tick and advances the clock.
    pub fn stamp_and_increment(&self) -> Tick {
        match &self.inner {
            SourceInner::Global => GLOBAL_TICKS.fetch_add(1, Ordering::SeqCst),
            SourceInner::Local(cell) => {
                let t = cell.get();
                cell.set(t + 1);
                t
            }
        }
    }

    /// Whether two handles observe the same underlying counter.
    pub fn same_source(&self, other: &TimeSource) -> bool {
        match (&self.inner, &other.inner) {
            (SourceInner::Global, SourceInner::Global) => true,
            (SourceInner::Local(a), SourceInner::Local(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        TimeSource::global()
    }
}
