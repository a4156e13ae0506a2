use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use shared_models::DoctorId;

/// One mutex per doctor; unrelated doctors never contend.
#[derive(Default)]
pub struct DoctorLocks {
    locks: RwLock<HashMap<DoctorId, Arc<Mutex<()>>>>,
}

impl DoctorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the doctor's lock. Held until the guard is dropped.
    pub async fn acquire(&self, doctor_id: &DoctorId) -> OwnedMutexGuard<()> {
        let existing = self.locks.read().await.get(doctor_id).cloned();
        let lock = match existing {
            Some(lock) => lock,
            None => {
                let mut locks = self.locks.write().await;
                Arc::clone(locks.entry(doctor_id.clone()).or_default())
            }
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_doctor_is_serialized() {
        let locks = Arc::new(DoctorLocks::new());
        let doctor = DoctorId::from("dr-a");

        let guard = locks.acquire(&doctor).await;
        let contender = {
            let locks = Arc::clone(&locks);
            let doctor = doctor.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&doctor).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Another doctor is not blocked
        let _other = locks.acquire(&DoctorId::from("dr-b")).await;

        drop(guard);
        contender.await.unwrap();
    }
}
