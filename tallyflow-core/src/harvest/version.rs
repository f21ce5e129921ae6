use chrono::{DateTime, Utc};
use uuid::Uuid;

const VERSION_NAMESPACE: Uuid =
    Uuid::from_u128(0x8b0ad2a4_5e9b_4f4c_9a53_3c8f8e7d5a10);

/// Version identifier of a record harvested at `date`.
///
/// Deterministic, so harvesting the same record twice at the same instant
/// yields the same version.
pub fn derive_version(date: DateTime<Utc>, record_id: &str) -> Uuid {
    let name = format!("{record_id}|{}", date.timestamp_millis());
    Uuid::new_v5(&VERSION_NAMESPACE, name.as_bytes())
}
