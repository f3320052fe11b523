use parking_lot::Mutex;
use std::sync::Arc;

/// Handle to state shared between the session tasks and the HTTP layer.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
