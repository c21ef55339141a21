use parking_lot::Mutex;
use savime_error::{SavimeResult, savime_bail};

/// Admission control for the storage budget.
///
/// Every change to the number of bytes held by live datasets goes through this type, which
/// keeps `used` equal to the sum of their accounted sizes. The lock is only held for the
/// bookkeeping itself.
#[derive(Debug)]
pub struct StorageAccountant {
    max: u64,
    used: Mutex<u64>,
}

impl StorageAccountant {
    /// Create an accountant that admits at most `max` bytes.
    pub fn new(max: u64) -> Self {
        Self {
            max,
            used: Mutex::new(0),
        }
    }

    /// Bytes currently accounted.
    pub fn used(&self) -> u64 {
        *self.used.lock()
    }

    /// The configured maximum.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Account `bytes` more, failing without side effects if that would exceed the maximum.
    pub fn admit(&self, bytes: u64) -> SavimeResult<()> {
        let mut used = self.used.lock();
        match used.checked_add(bytes) {
            Some(total) if total <= self.max => {
                *used = total;
                Ok(())
            }
            _ => savime_bail!(QuotaExceeded: bytes, *used, self.max),
        }
    }

    /// Return `bytes` to the budget, failing if fewer than that are accounted.
    pub fn release(&self, bytes: u64) -> SavimeResult<()> {
        let mut used = self.used.lock();
        if *used < bytes {
            savime_bail!(
                "cannot release {} bytes with only {} accounted",
                bytes,
                *used
            );
        }
        *used -= bytes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn admit_and_release() {
        let accountant = StorageAccountant::new(100);
        accountant.admit(60).unwrap();
        accountant.admit(40).unwrap();
        assert_eq!(accountant.used(), 100);

        let err = accountant.admit(1).unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(accountant.used(), 100);

        accountant.release(30).unwrap();
        assert_eq!(accountant.used(), 70);
        assert!(accountant.release(71).is_err());
        assert_eq!(accountant.used(), 70);
    }

    #[test]
    fn overflow_is_refused() {
        let accountant = StorageAccountant::new(u64::MAX);
        accountant.admit(u64::MAX).unwrap();
        assert!(accountant.admit(1).unwrap_err().is_quota_exceeded());
    }

    #[test]
    fn concurrent_admission_never_exceeds_max() {
        let accountant = Arc::new(StorageAccountant::new(1000));
        let handles = (0..8)
            .map(|_| {
                let accountant = accountant.clone();
                thread::spawn(move || (0..100).filter(|_| accountant.admit(3).is_ok()).count())
            })
            .collect::<Vec<_>>();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 333);
        assert_eq!(accountant.used(), 999);
    }
}
