use std::{fmt, sync::Arc, time::Duration};

use log::*;
use parking_lot::{Condvar, Mutex};

use super::BlameInfo;

#[derive(Default)]
struct Shared {
    result: Mutex<Option<Arc<BlameInfo>>>,
    ready: Condvar,
}

/// The eventual `BlameInfo` of one blame computation.
///
/// Clones share the computation; all of them observe the same `Arc<BlameInfo>`.
/// Waiters block their threads until the computation resolves it.
/// # Examples
/// ```
/// use git_blame_cache::blame::{BlameFuture, BlameInfo};
///
/// let future = BlameFuture::new();
/// let clone = future.clone();
/// std::thread::spawn(move || clone.resolve(BlameInfo::blank()));
/// assert!(future.wait().is_blank());
/// ```
#[derive(Clone, Default)]
pub struct BlameFuture {
    shared: Arc<Shared>,
}

impl BlameFuture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the result and wake up all waiters.
    /// Only the first call has effects.
    pub fn resolve(&self, info: BlameInfo) {
        {
            let mut result = self.shared.result.lock();
            if result.is_some() {
                debug!("resolve: already resolved, ignored");
                return;
            }
            *result = Some(Arc::new(info));
        }
        self.shared.ready.notify_all();
    }

    pub fn is_ready(&self) -> bool {
        self.shared.result.lock().is_some()
    }

    /// Get the result if it's ready.
    pub fn try_get(&self) -> Option<Arc<BlameInfo>> {
        self.shared.result.lock().clone()
    }

    /// Block the current thread until the result is ready.
    pub fn wait(&self) -> Arc<BlameInfo> {
        let mut result = self.shared.result.lock();
        loop {
            if let Some(info) = &*result {
                return info.clone();
            }
            self.shared.ready.wait(&mut result);
        }
    }

    /// Block the current thread until the result is ready,
    /// or until the `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Arc<BlameInfo>> {
        let mut result = self.shared.result.lock();
        if result.is_none() {
            self.shared
                .ready
                .wait_while_for(&mut result, |result| result.is_none(), timeout);
        }
        result.clone()
    }

    /// `true` if both are the same computation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for BlameFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlameFuture")
            .field("is_ready", &self.is_ready())
            .finish()
    }
}
