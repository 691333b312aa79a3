//! OS-native credential store.
//!
//! Uses the `keyring` crate: Credential Manager on Windows, Keychain
//! Services on macOS, the Secret Service API on Linux. Keychain backends
//! cannot enumerate entries, so the store maintains its own index entry
//! holding the list of associated car ids.
//!
//! Record bytes are hex-armored because some backends only accept UTF-8
//! passwords.

use carlink_core::CarId;
use tracing::debug;

use crate::record::AssociatedCar;
use crate::{CredentialStore, KeychainError, Result};

/// Entry name holding the id index.
const INDEX_KEY: &str = "__car_index__";

/// Credential store backed by the platform keychain.
///
/// The `service` + `user` pair namespaces all entries, so several apps or
/// profiles can coexist on one machine.
pub struct SystemKeychain {
    service: String,
    user: String,
}

impl SystemKeychain {
    /// Create a keychain accessor for the given namespace.
    pub fn new(service: impl Into<String>, user: impl Into<String>) -> Result<Self> {
        let service = service.into();
        let user = user.into();
        if service.is_empty() || user.is_empty() {
            return Err(KeychainError::InvalidRecord(
                "service and user must be non-empty".to_string(),
            ));
        }
        Ok(Self { service, user })
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        let qualified = format!("{}:{}:{}", self.service, self.user, key);
        keyring::Entry::new(&self.service, &qualified)
            .map_err(|e| KeychainError::PlatformError(e.to_string()))
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entry = self.entry(key)?;
        match entry.get_password() {
            Ok(armored) => {
                let bytes = hex::decode(armored)
                    .map_err(|e| KeychainError::InvalidRecord(e.to_string()))?;
                Ok(Some(bytes))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(KeychainError::PlatformError(e.to_string())),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entry(key)?
            .set_password(&hex::encode(bytes))
            .map_err(|e| KeychainError::PlatformError(e.to_string()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeychainError::PlatformError(e.to_string())),
        }
    }

    fn read_index(&self) -> Result<Vec<CarId>> {
        let Some(bytes) = self.read(INDEX_KEY)? else {
            return Ok(Vec::new());
        };
        ciborium::from_reader(bytes.as_slice())
            .map_err(|e| KeychainError::InvalidRecord(e.to_string()))
    }

    fn write_index(&self, ids: &[CarId]) -> Result<()> {
        let mut bytes = Vec::new();
        ciborium::into_writer(&ids, &mut bytes)
            .map_err(|e| KeychainError::InvalidRecord(e.to_string()))?;
        self.write(INDEX_KEY, &bytes)
    }
}

impl CredentialStore for SystemKeychain {
    fn put_record(&self, record: &AssociatedCar) -> Result<()> {
        self.write(record.car_id.as_str(), &record.to_bytes()?)?;

        let mut ids = self.read_index()?;
        if !ids.contains(&record.car_id) {
            ids.push(record.car_id.clone());
            self.write_index(&ids)?;
        }
        debug!(car_id = %record.car_id, "stored credential record");
        Ok(())
    }

    fn get_record(&self, car_id: &CarId) -> Result<AssociatedCar> {
        match self.read(car_id.as_str())? {
            Some(bytes) => AssociatedCar::from_bytes(&bytes),
            None => Err(KeychainError::CarNotFound(car_id.clone())),
        }
    }

    fn delete(&self, car_id: &CarId) -> Result<()> {
        self.remove(car_id.as_str())?;

        let mut ids = self.read_index()?;
        ids.retain(|id| id != car_id);
        self.write_index(&ids)?;
        debug!(car_id = %car_id, "deleted credential record");
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<CarId>> {
        self.read_index()
    }
}

impl std::fmt::Debug for SystemKeychain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemKeychain")
            .field("service", &self.service)
            .field("user", &self.user)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_must_be_non_empty() {
        assert!(SystemKeychain::new("", "user").is_err());
        assert!(SystemKeychain::new("service", "").is_err());
        assert!(SystemKeychain::new("carlink", "default").is_ok());
    }

    #[test]
    #[ignore] // Requires OS keychain access
    fn record_round_trip_through_the_os_keychain() {
        let keychain = SystemKeychain::new("carlink-test", "test-user").unwrap();
        let id = CarId::new("test-car-xyz");
        let _ = keychain.delete(&id);

        let mut record = AssociatedCar::new(id.clone(), Some("Test Car".to_string()));
        record.authentication_key = vec![7u8; 32];
        keychain.put_record(&record).unwrap();

        assert_eq!(keychain.get_record(&id).unwrap(), record);
        assert!(keychain.list_ids().unwrap().contains(&id));

        keychain.delete(&id).unwrap();
        assert!(keychain.get_record(&id).is_err());
        assert!(!keychain.list_ids().unwrap().contains(&id));
    }
}
