use std::collections::HashMap;

use parking_lot::RwLock;

use crate::device::{DeviceState, Status, Transport};

use super::DeviceStore;

/// In-memory device store keyed by canonical address.
#[derive(Default)]
pub struct MemoryStore {
    devices: RwLock<HashMap<String, DeviceState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

impl DeviceStore for MemoryStore {
    fn get(&self, address: &str) -> Option<DeviceState> {
        self.devices.read().get(address).cloned()
    }

    fn find_by_uap_lap(&self, suffix: &str) -> Option<DeviceState> {
        self.devices
            .read()
            .values()
            .find(|d| d.uap_lap == suffix)
            .cloned()
    }

    fn find_by_beacon(&self, uuid: &str, major: &str, minor: &str) -> Option<DeviceState> {
        self.devices
            .read()
            .values()
            .find(|d| d.matches_beacon(uuid, major, minor))
            .cloned()
    }

    fn find_by_company_payload(&self, company: &str, payload: &str) -> Option<DeviceState> {
        self.devices
            .read()
            .values()
            .find(|d| d.matches_company_payload(company, payload))
            .cloned()
    }

    fn create(&self, device: DeviceState) {
        self.devices.write().insert(device.address.clone(), device);
    }

    fn update(&self, device: &DeviceState) {
        self.devices
            .write()
            .insert(device.address.clone(), device.clone());
    }

    fn select(&self, transport: Transport, status: Status) -> Vec<DeviceState> {
        self.devices
            .read()
            .values()
            .filter(|d| {
                let mode = match transport {
                    Transport::Classic => d.classic_mode,
                    Transport::Le => d.le_mode,
                };
                mode && d.status == status
            })
            .cloned()
            .collect()
    }

    fn all(&self) -> Vec<DeviceState> {
        self.devices.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(address: &str) -> DeviceState {
        DeviceState::new(address)
    }

    #[test]
    fn test_create_and_get() {
        let store = MemoryStore::new();
        store.create(device("AA:BB:CC:DD:EE:FF"));

        assert!(store.get("AA:BB:CC:DD:EE:FF").is_some());
        assert!(store.get("11:22:33:44:55:66").is_none());
    }

    #[test]
    fn test_find_by_uap_lap() {
        let store = MemoryStore::new();
        store.create(device("AA:BB:CC:DD:EE:FF"));

        let found = store.find_by_uap_lap("CC:DD:EE:FF").expect("suffix match");
        assert_eq!(found.address, "AA:BB:CC:DD:EE:FF");
        assert!(store.find_by_uap_lap("00:00:00:00").is_none());
    }

    #[test]
    fn test_find_by_beacon_identity() {
        let store = MemoryStore::new();
        let mut d = device("AA:BB:CC:DD:EE:FF");
        d.le_proximity_uuid = Some("e2c56db5".to_string());
        d.le_major = Some("1".to_string());
        d.le_minor = Some("2".to_string());
        store.create(d);

        assert!(store.find_by_beacon("e2c56db5", "1", "2").is_some());
        assert!(store.find_by_beacon("e2c56db5", "1", "3").is_none());
    }

    #[test]
    fn test_select_by_transport_and_status() {
        let store = MemoryStore::new();
        let mut online = device("AA:BB:CC:DD:EE:01");
        online.classic_mode = true;
        online.status = Status::Online;
        store.create(online);

        let mut offline = device("AA:BB:CC:DD:EE:02");
        offline.classic_mode = true;
        offline.status = Status::Offline;
        store.create(offline);

        let found = store.select(Transport::Classic, Status::Online);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address, "AA:BB:CC:DD:EE:01");
        assert!(store.select(Transport::Le, Status::Online).is_empty());
    }
}
