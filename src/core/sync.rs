//! Lock acquisition helpers
//!
//! Every queue, consumer and registry map in the broker sits behind a std
//! lock. A panic while one is held poisons it; these helpers turn that into a
//! caller-visible error instead of propagating the panic to every later caller.

use std::sync::{LockResult, MutexGuard, RwLockReadGuard, RwLockWriteGuard};

/// Map a poisoned `Mutex::lock()` onto an application error
///
/// # Examples
/// ```
/// use std::sync::Mutex;
/// use routemq::core::sync::handle_mutex_poison;
/// use routemq::broker::BrokerError;
///
/// let depth = Mutex::new(3usize);
/// let guard = handle_mutex_poison(depth.lock(), |message| BrokerError::Internal { message })
///     .unwrap();
/// assert_eq!(*guard, 3);
/// ```
pub fn handle_mutex_poison<'a, T, E>(
    result: LockResult<MutexGuard<'a, T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<MutexGuard<'a, T>, E> {
    result.map_err(|_| error_constructor(poisoned("mutex")))
}

/// Map a poisoned `RwLock::read()` onto an application error
pub fn handle_rwlock_read<'a, T, E>(
    result: LockResult<RwLockReadGuard<'a, T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<RwLockReadGuard<'a, T>, E> {
    result.map_err(|_| error_constructor(poisoned("rwlock (read)")))
}

/// Map a poisoned `RwLock::write()` onto an application error
pub fn handle_rwlock_write<'a, T, E>(
    result: LockResult<RwLockWriteGuard<'a, T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<RwLockWriteGuard<'a, T>, E> {
    result.map_err(|_| error_constructor(poisoned("rwlock (write)")))
}

fn poisoned(lock: &str) -> String {
    format!(
        "broker state is unusable: a thread panicked while holding a {} and poisoned it",
        lock
    )
}
