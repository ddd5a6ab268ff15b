//! Per-device state and the typed field slots consulted by the merge engine.

use std::collections::VecDeque;

/// Maximum number of RSSI samples retained per transport, oldest evicted first.
pub const RSSI_HISTORY_CAP: usize = 100;

/// Minimum interval between stored updates of a rate-limited field, per device.
pub const RATE_LIMIT_SECS: i64 = 60;

/// Transport a chunk (and its attribute keys) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Classic,
    Le,
}

impl Transport {
    /// Attribute-key scope prefix for this transport.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Le => "le",
        }
    }
}

/// Presence status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Replace-on-change scalar fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarField {
    Name,
    Oui,
    Appearance,
    Company,
    CompanyType,
    LeProximityUuid,
    LeMajor,
    LeMinor,
    LeCompanyData,
    LeAddressType,
    LeServiceData,
    LeTxPower,
    ClassicTxPower,
    ClassicMajorClass,
    ClassicMinorClass,
    ClassicLmpVersion,
    LeLmpVersion,
    ClassicManufacturer,
    LeManufacturer,
    ClassicRole,
    LeRole,
}

/// Set-union list fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListField {
    ClassicFeatures,
    LeFeatures,
    LeFlags,
    ClassicChannels,
    ClassicClass,
    Classic16BitServiceUuids,
    Le16BitServiceUuids,
    Classic128BitServiceUuids,
    Le128BitServiceUuids,
}

/// Rate-limited RSSI histories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RssiField {
    Classic,
    Le,
}

/// Live state for one observed device, keyed by canonical hardware address.
///
/// The address is immutable once assigned; observations for a rotated LE
/// address that fuzzy-matches an existing record merge into that record
/// without rewriting its address.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub address: String,
    pub uap_lap: String,
    pub status: Status,
    pub last_seen: i64,
    pub classic_mode: bool,
    pub le_mode: bool,

    pub name: Option<String>,
    pub oui: Option<String>,
    pub appearance: Option<String>,
    pub company: Option<String>,
    pub company_type: Option<String>,
    pub le_proximity_uuid: Option<String>,
    pub le_major: Option<String>,
    pub le_minor: Option<String>,
    pub le_company_data: Option<String>,
    pub le_address_type: Option<String>,
    pub le_service_data: Option<String>,
    pub le_tx_power: Option<String>,
    pub classic_tx_power: Option<String>,
    pub classic_major_class: Option<String>,
    pub classic_minor_class: Option<String>,
    pub classic_lmp_version: Option<String>,
    pub le_lmp_version: Option<String>,
    pub classic_manufacturer: Option<String>,
    pub le_manufacturer: Option<String>,
    pub classic_role: Option<String>,
    pub le_role: Option<String>,

    pub classic_features: Vec<String>,
    pub le_features: Vec<String>,
    pub le_flags: Vec<String>,
    pub classic_channels: Vec<String>,
    pub classic_class: Vec<String>,
    pub classic_16_bit_service_uuids: Vec<String>,
    pub le_16_bit_service_uuids: Vec<String>,
    pub classic_128_bit_service_uuids: Vec<String>,
    pub le_128_bit_service_uuids: Vec<String>,

    pub classic_rssi: VecDeque<String>,
    pub le_rssi: VecDeque<String>,

    // Observation timestamps of the last accepted update per rate-limited
    // field; zero means never updated.
    last_seen_updated_at: i64,
    classic_rssi_updated_at: i64,
    le_rssi_updated_at: i64,
}

impl DeviceState {
    /// Create a fresh record for the given address. The record starts
    /// offline; the first successful merge flips it online.
    pub fn new(address: &str) -> Self {
        let address = canonical_address(address);
        let uap_lap = uap_lap(&address);

        Self {
            address,
            uap_lap,
            status: Status::Offline,
            last_seen: 0,
            classic_mode: false,
            le_mode: false,
            name: None,
            oui: None,
            appearance: None,
            company: None,
            company_type: None,
            le_proximity_uuid: None,
            le_major: None,
            le_minor: None,
            le_company_data: None,
            le_address_type: None,
            le_service_data: None,
            le_tx_power: None,
            classic_tx_power: None,
            classic_major_class: None,
            classic_minor_class: None,
            classic_lmp_version: None,
            le_lmp_version: None,
            classic_manufacturer: None,
            le_manufacturer: None,
            classic_role: None,
            le_role: None,
            classic_features: Vec::new(),
            le_features: Vec::new(),
            le_flags: Vec::new(),
            classic_channels: Vec::new(),
            classic_class: Vec::new(),
            classic_16_bit_service_uuids: Vec::new(),
            le_16_bit_service_uuids: Vec::new(),
            classic_128_bit_service_uuids: Vec::new(),
            le_128_bit_service_uuids: Vec::new(),
            classic_rssi: VecDeque::new(),
            le_rssi: VecDeque::new(),
            last_seen_updated_at: 0,
            classic_rssi_updated_at: 0,
            le_rssi_updated_at: 0,
        }
    }

    pub fn scalar(&self, field: ScalarField) -> Option<&str> {
        self.scalar_ref(field).as_deref()
    }

    pub fn set_scalar(&mut self, field: ScalarField, value: String) {
        *self.scalar_mut(field) = Some(value);
    }

    pub fn list(&self, field: ListField) -> &[String] {
        self.list_ref(field)
    }

    pub fn list_contains(&self, field: ListField, value: &str) -> bool {
        self.list_ref(field).iter().any(|v| v == value)
    }

    pub fn list_push(&mut self, field: ListField, value: String) {
        self.list_mut(field).push(value);
    }

    /// Record a `last_seen` observation, subject to the per-field rate
    /// limit. Returns true when the observation was stored.
    pub fn observe_last_seen(&mut self, ts: i64) -> bool {
        if self.last_seen_updated_at != 0 && ts - self.last_seen_updated_at < RATE_LIMIT_SECS {
            return false;
        }
        self.last_seen = ts;
        self.last_seen_updated_at = ts;
        true
    }

    /// Record an RSSI observation, subject to the per-field rate limit and
    /// the bounded history cap. Returns true when the sample was stored.
    pub fn observe_rssi(&mut self, field: RssiField, value: &str, ts: i64) -> bool {
        let updated_at = match field {
            RssiField::Classic => &mut self.classic_rssi_updated_at,
            RssiField::Le => &mut self.le_rssi_updated_at,
        };
        if *updated_at != 0 && ts - *updated_at < RATE_LIMIT_SECS {
            return false;
        }
        *updated_at = ts;

        let history = match field {
            RssiField::Classic => &mut self.classic_rssi,
            RssiField::Le => &mut self.le_rssi,
        };
        history.push_back(value.to_string());
        while history.len() > RSSI_HISTORY_CAP {
            history.pop_front();
        }
        true
    }

    /// Whether this record carries the given proximity-beacon identity.
    pub fn matches_beacon(&self, uuid: &str, major: &str, minor: &str) -> bool {
        self.le_proximity_uuid.as_deref() == Some(uuid)
            && self.le_major.as_deref() == Some(major)
            && self.le_minor.as_deref() == Some(minor)
    }

    /// Whether this record carries the given vendor-specific beacon payload.
    pub fn matches_company_payload(&self, company: &str, payload: &str) -> bool {
        self.company.as_deref() == Some(company)
            && self.le_company_data.as_deref() == Some(payload)
    }

    fn scalar_ref(&self, field: ScalarField) -> &Option<String> {
        match field {
            ScalarField::Name => &self.name,
            ScalarField::Oui => &self.oui,
            ScalarField::Appearance => &self.appearance,
            ScalarField::Company => &self.company,
            ScalarField::CompanyType => &self.company_type,
            ScalarField::LeProximityUuid => &self.le_proximity_uuid,
            ScalarField::LeMajor => &self.le_major,
            ScalarField::LeMinor => &self.le_minor,
            ScalarField::LeCompanyData => &self.le_company_data,
            ScalarField::LeAddressType => &self.le_address_type,
            ScalarField::LeServiceData => &self.le_service_data,
            ScalarField::LeTxPower => &self.le_tx_power,
            ScalarField::ClassicTxPower => &self.classic_tx_power,
            ScalarField::ClassicMajorClass => &self.classic_major_class,
            ScalarField::ClassicMinorClass => &self.classic_minor_class,
            ScalarField::ClassicLmpVersion => &self.classic_lmp_version,
            ScalarField::LeLmpVersion => &self.le_lmp_version,
            ScalarField::ClassicManufacturer => &self.classic_manufacturer,
            ScalarField::LeManufacturer => &self.le_manufacturer,
            ScalarField::ClassicRole => &self.classic_role,
            ScalarField::LeRole => &self.le_role,
        }
    }

    fn scalar_mut(&mut self, field: ScalarField) -> &mut Option<String> {
        match field {
            ScalarField::Name => &mut self.name,
            ScalarField::Oui => &mut self.oui,
            ScalarField::Appearance => &mut self.appearance,
            ScalarField::Company => &mut self.company,
            ScalarField::CompanyType => &mut self.company_type,
            ScalarField::LeProximityUuid => &mut self.le_proximity_uuid,
            ScalarField::LeMajor => &mut self.le_major,
            ScalarField::LeMinor => &mut self.le_minor,
            ScalarField::LeCompanyData => &mut self.le_company_data,
            ScalarField::LeAddressType => &mut self.le_address_type,
            ScalarField::LeServiceData => &mut self.le_service_data,
            ScalarField::LeTxPower => &mut self.le_tx_power,
            ScalarField::ClassicTxPower => &mut self.classic_tx_power,
            ScalarField::ClassicMajorClass => &mut self.classic_major_class,
            ScalarField::ClassicMinorClass => &mut self.classic_minor_class,
            ScalarField::ClassicLmpVersion => &mut self.classic_lmp_version,
            ScalarField::LeLmpVersion => &mut self.le_lmp_version,
            ScalarField::ClassicManufacturer => &mut self.classic_manufacturer,
            ScalarField::LeManufacturer => &mut self.le_manufacturer,
            ScalarField::ClassicRole => &mut self.classic_role,
            ScalarField::LeRole => &mut self.le_role,
        }
    }

    fn list_ref(&self, field: ListField) -> &Vec<String> {
        match field {
            ListField::ClassicFeatures => &self.classic_features,
            ListField::LeFeatures => &self.le_features,
            ListField::LeFlags => &self.le_flags,
            ListField::ClassicChannels => &self.classic_channels,
            ListField::ClassicClass => &self.classic_class,
            ListField::Classic16BitServiceUuids => &self.classic_16_bit_service_uuids,
            ListField::Le16BitServiceUuids => &self.le_16_bit_service_uuids,
            ListField::Classic128BitServiceUuids => &self.classic_128_bit_service_uuids,
            ListField::Le128BitServiceUuids => &self.le_128_bit_service_uuids,
        }
    }

    fn list_mut(&mut self, field: ListField) -> &mut Vec<String> {
        match field {
            ListField::ClassicFeatures => &mut self.classic_features,
            ListField::LeFeatures => &mut self.le_features,
            ListField::LeFlags => &mut self.le_flags,
            ListField::ClassicChannels => &mut self.classic_channels,
            ListField::ClassicClass => &mut self.classic_class,
            ListField::Classic16BitServiceUuids => &mut self.classic_16_bit_service_uuids,
            ListField::Le16BitServiceUuids => &mut self.le_16_bit_service_uuids,
            ListField::Classic128BitServiceUuids => &mut self.classic_128_bit_service_uuids,
            ListField::Le128BitServiceUuids => &mut self.le_128_bit_service_uuids,
        }
    }
}

/// Change notification emitted when a merge or sweep modified stored state.
#[derive(Debug, Clone)]
pub struct DeviceDelta {
    pub address: String,
    pub transport: Transport,
    pub status: Status,
    pub last_seen: i64,
    /// Names of the fields that actually changed, in merge order.
    pub changed: Vec<&'static str>,
}

/// Canonical address form: uppercase, colon-delimited.
pub fn canonical_address(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Lower four octets of an address (the UAP/LAP portion), used as the
/// stability fallback key for rotating LE addresses.
pub fn uap_lap(address: &str) -> String {
    let octets: Vec<&str> = address.split(':').collect();
    if octets.len() == 6 {
        octets[2..].join(":")
    } else {
        address.to_string()
    }
}
