//! Thread-local scoped connection.
//!
//! Code that cannot thread a connection through every call can run inside
//! [`with_connection`] and fetch the handle with [`current_connection`].
//! Scopes nest; leaving one, normally or by unwinding, restores the outer
//! scope. Nothing is global: other threads never see the scope.

use std::cell::RefCell;
use std::sync::Arc;

use unisql_core::{Error, Result};

use crate::connection::Connection;

thread_local! {
    static SCOPE: RefCell<Vec<Arc<Connection>>> = const { RefCell::new(Vec::new()) };
}

/// Pops the scope entry on drop, including during unwinding.
struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Run `f` with `conn` as the current connection of this thread.
pub fn with_connection<R>(conn: Arc<Connection>, f: impl FnOnce() -> R) -> R {
    SCOPE.with(|stack| stack.borrow_mut().push(conn));
    let _guard = ScopeGuard;
    f()
}

/// The innermost scoped connection.
///
/// Fails with [`Error::Config`] outside any [`with_connection`] call.
pub fn current_connection() -> Result<Arc<Connection>> {
    SCOPE
        .with(|stack| stack.borrow().last().cloned())
        .ok_or_else(|| Error::config("no connection in scope; wrap the call in with_connection"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use unisql_core::DatabaseConfig;

    use crate::driver::Driver;

    fn memory() -> Arc<Connection> {
        Arc::new(Driver::embedded(&DatabaseConfig::sqlite_memory()).unwrap())
    }

    #[test]
    fn test_no_scope() {
        assert!(matches!(current_connection(), Err(Error::Config(_))));
    }

    #[test]
    fn test_nested_scopes() {
        let outer = memory();
        let inner = memory();

        with_connection(Arc::clone(&outer), || {
            assert!(Arc::ptr_eq(&current_connection().unwrap(), &outer));
            let value = with_connection(Arc::clone(&inner), || {
                assert!(Arc::ptr_eq(&current_connection().unwrap(), &inner));
                5
            });
            assert_eq!(value, 5);
            assert!(Arc::ptr_eq(&current_connection().unwrap(), &outer));
        });
        assert!(current_connection().is_err());
    }

    #[test]
    fn test_scope_restored_after_panic() {
        let outer = memory();
        with_connection(Arc::clone(&outer), || {
            let result = std::panic::catch_unwind(|| {
                with_connection(memory(), || panic!("boom"));
            });
            assert!(result.is_err());
            assert!(Arc::ptr_eq(&current_connection().unwrap(), &outer));
        });
        assert!(current_connection().is_err());
    }

    #[test]
    fn test_scope_is_per_thread() {
        let conn = memory();
        with_connection(conn, || {
            let seen = std::thread::spawn(|| current_connection().is_ok())
                .join()
                .unwrap();
            assert!(!seen);
        });
    }
}
