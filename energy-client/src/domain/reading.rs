use std::collections::BTreeMap;

use time::OffsetDateTime;

/// A cumulative energy register value reported by one meter at one instant.
///
/// `energy_wh` is always in the canonical unit (Wh) and never negative;
/// parsers reject negative registers before a `Reading` is built. Auxiliary
/// values that do not feed classification (rssi, port, channel registers, ...)
/// live in `raw_fields`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub source_name: String,
    /// Sub-meter / channel identifier; empty when the device has only one.
    pub mtu_id: String,
    pub ts: OffsetDateTime,
    pub energy_wh: i64,
    pub raw_fields: BTreeMap<String, String>,
}

impl Reading {
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.raw_fields.get(key).map(String::as_str)
    }

    /// Stable identity of a reading: (source, mtu, timestamp).
    ///
    /// The register value is not part of the id: a corrected row for the same
    /// instant collides with the stored one.
    pub fn event_id(&self) -> String {
        let mut h = blake3::Hasher::new();
        hash_str(&mut h, &self.source_name);
        hash_str(&mut h, &self.mtu_id);
        h.update(&self.ts.unix_timestamp_nanos().to_le_bytes());
        h.finalize().to_hex().to_string()
    }
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    let len = s.len() as u32;
    hasher.update(&len.to_le_bytes());
    hasher.update(s.as_bytes());
}

/// Minimal projection of a [`Reading`] used for monotonicity bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub source_name: String,
    pub mtu_id: String,
    pub ts: OffsetDateTime,
    pub reading: String,
    pub is_monotonically_increasing: bool,
}

impl Entry {
    pub fn reading_wh(&self) -> Option<i64> {
        self.reading.trim().parse().ok()
    }
}

impl From<&Reading> for Entry {
    fn from(r: &Reading) -> Self {
        Self {
            source_name: r.source_name.clone(),
            mtu_id: r.mtu_id.clone(),
            ts: r.ts,
            reading: r.energy_wh.to_string(),
            is_monotonically_increasing: true,
        }
    }
}
