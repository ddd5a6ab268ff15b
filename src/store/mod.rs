//! Device store contract.
//!
//! The merge engine and scheduler depend only on this trait; durable
//! (SQL-backed) storage is an external collaborator implementing the same
//! contract. The crate ships an in-memory implementation.

pub mod memory;

use crate::device::{DeviceState, Status, Transport};

pub use memory::MemoryStore;

/// Lookup, persistence, and predicate enumeration over device records.
pub trait DeviceStore: Send + Sync {
    /// Fetch a record by canonical address.
    fn get(&self, address: &str) -> Option<DeviceState>;

    /// Fetch a record whose address shares the given UAP/LAP suffix.
    fn find_by_uap_lap(&self, suffix: &str) -> Option<DeviceState>;

    /// Fetch a record by proximity-beacon identity.
    fn find_by_beacon(&self, uuid: &str, major: &str, minor: &str) -> Option<DeviceState>;

    /// Fetch a record by vendor-specific beacon payload.
    fn find_by_company_payload(&self, company: &str, payload: &str) -> Option<DeviceState>;

    /// Insert a new record.
    fn create(&self, device: DeviceState);

    /// Persist updated fields for an existing record.
    fn update(&self, device: &DeviceState);

    /// Enumerate records matching a transport + status predicate.
    fn select(&self, transport: Transport, status: Status) -> Vec<DeviceState>;

    /// Enumerate every record.
    fn all(&self) -> Vec<DeviceState>;
}
