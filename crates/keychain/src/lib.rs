//! # CarLink Keychain
//!
//! Credential storage for associated cars: one record per car holding the
//! authentication key, the saved secure session and the feature-status blob,
//! behind a platform-agnostic [`CredentialStore`] trait.
//!
//! Two implementations ship:
//!
//! - [`SystemKeychain`]: OS-native keychains via the `keyring` crate
//!   (Windows Credential Manager, macOS Keychain Services, Linux Secret
//!   Service)
//! - [`MemoryStore`]: mutex-backed in-memory map for tests and tooling
//!
//! # Security Model
//!
//! - OS-level encryption enforced by the platform keychain
//! - No plaintext storage of key material outside process memory
//! - Record bytes are hex-armored for string-only keychain backends

pub mod memory;
pub mod record;
pub mod system;

use carlink_core::CarId;
use thiserror::Error;

pub use memory::MemoryStore;
pub use record::AssociatedCar;
pub use system::SystemKeychain;

/// Errors that can occur during credential operations
#[derive(Debug, Error)]
pub enum KeychainError {
    /// No record exists for the requested car
    #[error("No credentials stored for car '{0}'")]
    CarNotFound(CarId),

    /// The requested field is absent from the car's record
    #[error("Car '{0}' has no stored {1}")]
    FieldMissing(CarId, &'static str),

    /// Record bytes could not be encoded or decoded
    #[error("Invalid credential record: {0}")]
    InvalidRecord(String),

    /// Platform keychain error
    #[error("Platform error: {0}")]
    PlatformError(String),
}

/// Result type for credential operations
pub type Result<T> = std::result::Result<T, KeychainError>;

/// Storage of per-car credentials.
///
/// All methods are synchronous; callers on the connection's event loop
/// offload to a blocking context when the backend may touch the OS keychain.
///
/// # Thread Safety
/// Implementations are `Send + Sync`; readers and writers serialize
/// internally.
pub trait CredentialStore: Send + Sync {
    /// Store or replace the full record for a car.
    fn put_record(&self, record: &AssociatedCar) -> Result<()>;

    /// Fetch the full record for a car.
    fn get_record(&self, car_id: &CarId) -> Result<AssociatedCar>;

    /// Remove a car's record entirely. Absent records are not an error.
    fn delete(&self, car_id: &CarId) -> Result<()>;

    /// Ids of every car with stored credentials.
    fn list_ids(&self) -> Result<Vec<CarId>>;

    /// Store the authentication key, creating the record if needed.
    fn put_key(&self, car_id: &CarId, key: &[u8]) -> Result<()> {
        let mut record = match self.get_record(car_id) {
            Ok(record) => record,
            Err(KeychainError::CarNotFound(_)) => AssociatedCar::new(car_id.clone(), None),
            Err(e) => return Err(e),
        };
        record.authentication_key = key.to_vec();
        self.put_record(&record)
    }

    /// Fetch the authentication key.
    fn get_key(&self, car_id: &CarId) -> Result<Vec<u8>> {
        let record = self.get_record(car_id)?;
        if record.authentication_key.is_empty() {
            return Err(KeychainError::FieldMissing(
                car_id.clone(),
                "authentication key",
            ));
        }
        Ok(record.authentication_key.clone())
    }

    /// Store the saved secure session for an already associated car.
    fn put_session(&self, car_id: &CarId, session: &[u8]) -> Result<()> {
        let mut record = self.get_record(car_id)?;
        record.saved_session = Some(session.to_vec());
        self.put_record(&record)
    }

    /// Fetch the saved secure session.
    fn get_session(&self, car_id: &CarId) -> Result<Vec<u8>> {
        self.get_record(car_id)?
            .saved_session
            .clone()
            .ok_or_else(|| KeychainError::FieldMissing(car_id.clone(), "saved session"))
    }
}
