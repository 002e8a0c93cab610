//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

/// A shared event log captured by activities.
pub type Recorder<T> = Rc<RefCell<Vec<T>>>;

pub fn recorder<T>() -> Recorder<T> {
    Rc::new(RefCell::new(Vec::new()))
}

/// Initialize tracing output for tests (once per binary).
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
