//! The per-car credential record.

use carlink_core::{Car, CarId};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{KeychainError, Result};

/// Everything persisted for one associated car.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedCar {
    pub car_id: CarId,

    /// User-visible name, when the head unit advertised one.
    pub display_name: Option<String>,

    /// Key generated at association and shared with the head unit.
    pub authentication_key: Vec<u8>,

    /// Packed secure session for reconnection, once one completed.
    pub saved_session: Option<Vec<u8>>,

    /// Opaque feature-support snapshot reported by the head unit.
    pub feature_status: Option<Vec<u8>>,
}

impl AssociatedCar {
    pub fn new(car_id: CarId, display_name: Option<String>) -> Self {
        Self {
            car_id,
            display_name,
            authentication_key: Vec::new(),
            saved_session: None,
            feature_status: None,
        }
    }

    /// The [`Car`] value this record describes.
    pub fn car(&self) -> Car {
        Car::new(self.car_id.clone(), self.display_name.clone())
    }

    /// Pack for the keychain backend.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| KeychainError::InvalidRecord(e.to_string()))?;
        Ok(bytes)
    }

    /// Unpack bytes previously produced by [`AssociatedCar::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| KeychainError::InvalidRecord(e.to_string()))
    }
}

impl Drop for AssociatedCar {
    fn drop(&mut self) {
        self.authentication_key.zeroize();
        if let Some(session) = self.saved_session.as_mut() {
            session.zeroize();
        }
    }
}
