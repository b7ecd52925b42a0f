use std::sync::Arc;

use tokio::sync::Notify;

/// Condition evaluated on every state change of a test double.
pub type Condition<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Pending conditions, each released through its [`Notify`] once it holds.
pub struct Conditions<T> {
    pending: Vec<(Condition<T>, Arc<Notify>)>,
}

impl<T> Default for Conditions<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<T> Conditions<T> {
    /// Registers `condition`, notifying immediately if it already holds for `state`.
    pub fn register<F>(&mut self, state: &T, condition: F) -> Arc<Notify>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        if condition(state) {
            notify.notify_one();
        } else {
            self.pending.push((Box::new(condition), notify.clone()));
        }

        notify
    }

    pub fn check(&mut self, state: &T) {
        self.pending.retain(|(condition, notify)| {
            let should_retain = !condition(state);
            if !should_retain {
                notify.notify_one();
            }
            should_retain
        });
    }
}
