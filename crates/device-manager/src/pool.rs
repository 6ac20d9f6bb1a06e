//! Available Pool
//!
//! Holds devices waiting to be allocated and hands them out under a
//! caller-supplied claim predicate. Every insert wakes all waiters and each
//! re-scans for its own match, so a caller waiting for device A never
//! starves a caller whose match for device B just arrived.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::registry::DeviceRecord;

/// Thread-safe collection of available device records with
/// predicate-filtered blocking take
pub struct AvailablePool {
    entries: Mutex<Vec<Arc<DeviceRecord>>>,
    notify: Notify,
}

impl AvailablePool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    /// Add a record and wake every waiter
    pub fn offer(&self, record: Arc<DeviceRecord>) {
        {
            let mut entries = self.entries.lock();
            if entries.iter().any(|r| Arc::ptr_eq(r, &record)) {
                return;
            }
            debug!("pool: offering {}", record.serial());
            entries.push(record);
        }
        self.notify.notify_waiters();
    }

    /// Remove a record by serial (device disconnected or force-allocated)
    pub fn remove(&self, serial: &str) -> Option<Arc<DeviceRecord>> {
        let mut entries = self.entries.lock();
        let pos = entries.iter().position(|r| r.serial() == serial)?;
        Some(entries.remove(pos))
    }

    /// Single non-blocking scan: remove and return the first entry the
    /// claim closure accepts. The closure runs under the pool lock and
    /// must perform the allocation transition atomically.
    pub fn try_take<F>(&self, claim: &F) -> Option<Arc<DeviceRecord>>
    where
        F: Fn(&Arc<DeviceRecord>) -> bool,
    {
        let mut entries = self.entries.lock();
        let pos = entries.iter().position(claim)?;
        Some(entries.remove(pos))
    }

    /// Take the first matching record, waiting up to `limit` for one to
    /// appear. A zero limit scans once and returns immediately.
    pub async fn take<F>(&self, claim: F, limit: Duration) -> Option<Arc<DeviceRecord>>
    where
        F: Fn(&Arc<DeviceRecord>) -> bool,
    {
        let deadline = Instant::now() + limit;
        loop {
            // Register for wakeups before scanning so an offer landing
            // between the scan and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.try_take(&claim) {
                return Some(record);
            }
            if limit.is_zero() || timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.entries.lock().iter().any(|r| r.serial() == serial)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AvailablePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceKind;
    use tokio::time::sleep;

    fn claim_serial(serial: &'static str) -> impl Fn(&Arc<DeviceRecord>) -> bool {
        move |record| record.serial() == serial
    }

    #[tokio::test]
    async fn test_take_present_entry() {
        let pool = AvailablePool::new();
        pool.offer(DeviceRecord::new("aaa", DeviceKind::Hardware));

        let taken = pool.take(claim_serial("aaa"), Duration::ZERO).await;
        assert!(taken.is_some());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_take_zero_timeout_empty_pool() {
        let pool = AvailablePool::new();
        assert!(pool.take(claim_serial("aaa"), Duration::ZERO).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_waits_for_offer() {
        let pool = Arc::new(AvailablePool::new());

        let taker = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.take(claim_serial("aaa"), Duration::from_secs(10)).await })
        };

        sleep(Duration::from_secs(1)).await;
        pool.offer(DeviceRecord::new("aaa", DeviceKind::Hardware));

        let taken = taker.await.unwrap();
        assert!(taken.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_times_out() {
        let pool = AvailablePool::new();
        let taken = pool.take(claim_serial("aaa"), Duration::from_secs(1)).await;
        assert!(taken.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_head_of_line_blocking() {
        let pool = Arc::new(AvailablePool::new());

        // First waiter wants a device that never arrives
        let blocked = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.take(claim_serial("never"), Duration::from_secs(30)).await })
        };
        sleep(Duration::from_millis(100)).await;

        // Second waiter's match arrives while the first is still parked
        let satisfied = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.take(claim_serial("bbb"), Duration::from_secs(30)).await })
        };
        sleep(Duration::from_millis(100)).await;
        pool.offer(DeviceRecord::new("bbb", DeviceKind::Hardware));

        let taken = satisfied.await.unwrap();
        assert_eq!(taken.unwrap().serial(), "bbb");

        let starved = blocked.await.unwrap();
        assert!(starved.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_offer_ignored() {
        let pool = AvailablePool::new();
        let record = DeviceRecord::new("aaa", DeviceKind::Hardware);
        pool.offer(record.clone());
        pool.offer(record);
        assert_eq!(pool.len(), 1);
    }
}
