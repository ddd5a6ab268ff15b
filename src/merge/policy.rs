//! Field merge strategy table.
//!
//! One entry per tracked attribute key, tagging the typed field slot and
//! the merge policy the generic merge function applies. An explicit table,
//! not reflection.

use crate::device::{ListField, RssiField, ScalarField};

/// How observations of a field fold into stored state.
pub enum FieldPolicy {
    /// Scalar: a new value replaces the stored one only when different.
    Replace(ScalarField),
    /// List: set-union with prior values. `annotate` wraps entries lacking
    /// a descriptive annotation as `Unknown (<value>)`.
    Union { slot: ListField, annotate: bool },
    /// Rate-limited RSSI history.
    Rssi(RssiField),
}

pub struct FieldSpec {
    pub key: &'static str,
    pub policy: FieldPolicy,
}

const fn replace(key: &'static str, slot: ScalarField) -> FieldSpec {
    FieldSpec {
        key,
        policy: FieldPolicy::Replace(slot),
    }
}

const fn union(key: &'static str, slot: ListField) -> FieldSpec {
    FieldSpec {
        key,
        policy: FieldPolicy::Union {
            slot,
            annotate: false,
        },
    }
}

const fn union_annotated(key: &'static str, slot: ListField) -> FieldSpec {
    FieldSpec {
        key,
        policy: FieldPolicy::Union {
            slot,
            annotate: true,
        },
    }
}

const fn rssi(key: &'static str, slot: RssiField) -> FieldSpec {
    FieldSpec {
        key,
        policy: FieldPolicy::Rssi(slot),
    }
}

pub static FIELD_TABLE: &[FieldSpec] = &[
    replace("name", ScalarField::Name),
    replace("oui", ScalarField::Oui),
    replace("appearance", ScalarField::Appearance),
    replace("company", ScalarField::Company),
    replace("company_type", ScalarField::CompanyType),
    replace("le_proximity_uuid", ScalarField::LeProximityUuid),
    replace("le_major", ScalarField::LeMajor),
    replace("le_minor", ScalarField::LeMinor),
    replace("le_company_data", ScalarField::LeCompanyData),
    replace("le_address_type", ScalarField::LeAddressType),
    replace("le_service_data", ScalarField::LeServiceData),
    replace("le_tx_power", ScalarField::LeTxPower),
    replace("classic_tx_power", ScalarField::ClassicTxPower),
    replace("classic_major_class", ScalarField::ClassicMajorClass),
    replace("classic_minor_class", ScalarField::ClassicMinorClass),
    replace("classic_lmp_version", ScalarField::ClassicLmpVersion),
    replace("le_lmp_version", ScalarField::LeLmpVersion),
    replace("classic_manufacturer", ScalarField::ClassicManufacturer),
    replace("le_manufacturer", ScalarField::LeManufacturer),
    replace("classic_role", ScalarField::ClassicRole),
    replace("le_role", ScalarField::LeRole),
    union("classic_features", ListField::ClassicFeatures),
    union("le_features", ListField::LeFeatures),
    union("le_flags", ListField::LeFlags),
    union("classic_channels", ListField::ClassicChannels),
    union("classic_class", ListField::ClassicClass),
    union_annotated(
        "classic_16_bit_service_uuids",
        ListField::Classic16BitServiceUuids,
    ),
    union_annotated("le_16_bit_service_uuids", ListField::Le16BitServiceUuids),
    union_annotated(
        "classic_128_bit_service_uuids",
        ListField::Classic128BitServiceUuids,
    ),
    union_annotated("le_128_bit_service_uuids", ListField::Le128BitServiceUuids),
    rssi("classic_rssi", RssiField::Classic),
    rssi("le_rssi", RssiField::Le),
];

/// Look up the merge policy for an attribute key.
pub fn lookup(key: &str) -> Option<&'static FieldSpec> {
    FIELD_TABLE.iter().find(|spec| spec.key == key)
}
