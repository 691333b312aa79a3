//! In-memory credential store.

use std::collections::HashMap;
use std::sync::Mutex;

use carlink_core::CarId;

use crate::record::AssociatedCar;
use crate::{CredentialStore, KeychainError, Result};

/// Mutex-backed map; the store for tests, tooling and platforms without a
/// keychain service.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<CarId, AssociatedCar>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CarId, AssociatedCar>>> {
        self.records
            .lock()
            .map_err(|_| KeychainError::PlatformError("store mutex poisoned".to_string()))
    }
}

impl CredentialStore for MemoryStore {
    fn put_record(&self, record: &AssociatedCar) -> Result<()> {
        self.lock()?
            .insert(record.car_id.clone(), record.clone());
        Ok(())
    }

    fn get_record(&self, car_id: &CarId) -> Result<AssociatedCar> {
        self.lock()?
            .get(car_id)
            .cloned()
            .ok_or_else(|| KeychainError::CarNotFound(car_id.clone()))
    }

    fn delete(&self, car_id: &CarId) -> Result<()> {
        self.lock()?.remove(car_id);
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<CarId>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
