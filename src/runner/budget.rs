use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

use crate::domain::RunBound;

/// Shared request allowance for count-bounded runs.
///
/// Reservations are lock-free; the reservation that takes the last request
/// wakes whoever waits on [`RequestBudget::exhausted`].
#[derive(Debug)]
pub struct RequestBudget {
    limit: Option<u64>,
    reserved: AtomicU64,
    exhausted: Notify,
}

impl RequestBudget {
    #[must_use]
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            reserved: AtomicU64::new(0),
            exhausted: Notify::new(),
        }
    }

    #[must_use]
    pub fn for_bound(bound: RunBound) -> Self {
        match bound {
            RunBound::Duration(_) => Self::new(None),
            RunBound::Requests(count) => Self::new(Some(count.get())),
        }
    }

    /// Reserves one request. Returns false once the budget is spent.
    pub fn try_reserve(&self) -> bool {
        let Some(limit) = self.limit else {
            self.reserved.fetch_add(1, Ordering::Relaxed);
            return true;
        };
        loop {
            let current = self.reserved.load(Ordering::Acquire);
            if current >= limit {
                return false;
            }
            let Some(next) = current.checked_add(1) else {
                return false;
            };
            if self
                .reserved
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if next == limit {
                    self.exhausted.notify_one();
                }
                return true;
            }
        }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.limit
            .is_some_and(|limit| self.reserved.load(Ordering::Acquire) >= limit)
    }

    #[must_use]
    pub fn reserved(&self) -> u64 {
        self.reserved.load(Ordering::Acquire)
    }

    /// Resolves once every request has been reserved; never resolves for an
    /// unbounded budget.
    pub async fn exhausted(&self) {
        if self.limit.is_none() {
            std::future::pending::<()>().await;
        }
        loop {
            let notified = self.exhausted.notified();
            if self.is_exhausted() {
                return;
            }
            notified.await;
        }
    }
}
