//! Thin wrappers around `parking_lot` locks that trace acquisition at `trace`
//! level. Contention on these locks is rare by design (see the concurrency
//! model in the client crate), so the tracing overhead is negligible, and it
//! turns "the engine seems stuck" reports into a lock name and a call site.

pub use parking_lot::{Mutex, RwLock};

/// Acquire a read lock, logging the call site at `trace` level first.
#[macro_export]
macro_rules! trace_read_lock {
    ($lock:expr) => {{
        log::trace!("read lock {} at {}:{}", stringify!($lock), file!(), line!());
        $lock.read()
    }};
}

/// Acquire a write lock, logging the call site at `trace` level first.
#[macro_export]
macro_rules! trace_write_lock {
    ($lock:expr) => {{
        log::trace!(
            "write lock {} at {}:{}",
            stringify!($lock),
            file!(),
            line!()
        );
        $lock.write()
    }};
}
