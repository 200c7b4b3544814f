//! One-shot timer with cancel-and-replace semantics.
//!
//! Every debounce site in the engine (popup expiry, idle detection, the
//! unlock settle safety net) goes through this abstraction so that no two
//! generations of the same timer can both fire.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

/// A single logical one-shot timer.
///
/// Arming always cancels the previous generation first; dropping the
/// handle cancels any armed timer.
#[derive(Debug, Default)]
pub struct Debounce {
    handle: Option<JoinHandle<()>>,
}

impl Debounce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer: run `f` after `delay`, replacing any armed timer.
    pub fn arm<F>(&mut self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            sleep(delay).await;
            f();
        }));
    }

    /// Cancel the armed timer, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// True while a timer is armed and has not fired.
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Debounce {
    fn drop(&mut self) {
        self.cancel();
    }
}
