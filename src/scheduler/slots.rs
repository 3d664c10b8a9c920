use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use sha1::{Digest, Sha1};

use crate::models::{Appointment, ServiceType, Slot};

const MONTHS: u32 = 6;
const SLOTS_PER_MONTH: u32 = 3;

/// Generate the full 6-month slot pool. `seed` is accepted for API parity
/// with the rest of the deterministic-generation surface (scheduling,
/// parallel-harness) but slot *dates* are anchored to the current day, not
/// the seed — two pools generated on the same day are byte-identical
/// regardless of seed, which is what SPEC_FULL.md invariant 5 requires.
pub fn generate_slots(_seed: u64) -> Vec<Slot> {
    let base = Utc::now()
        .with_hour(9)
        .and_then(|d| d.with_minute(0))
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .expect("valid UTC truncation");

    let mut slots = Vec::with_capacity((MONTHS * SLOTS_PER_MONTH) as usize);
    let mut idx: usize = 0;
    for month in 0..MONTHS {
        for i in 0..SLOTS_PER_MONTH {
            let day = (3 + i * 7).min(28);
            let start = month_offset(base, month).with_day_clamped(day);
            let end = start + ChronoDuration::hours(1);
            let service = ServiceType::ALL[idx % ServiceType::ALL.len()];
            let (staff_role, price) = service.staff_and_price();
            slots.push(Slot {
                service_type: service,
                start_iso: start.to_rfc3339(),
                end_iso: end.to_rfc3339(),
                staff_role: staff_role.to_string(),
                location: "Main Clinic".to_string(),
                price,
                booked: false,
            });
            idx += 1;
        }
    }
    slots
}

fn month_offset(base: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    base + ChronoDuration::days(30 * months as i64)
}

trait WithDayClamped {
    fn with_day_clamped(self, day: u32) -> DateTime<Utc>;
}

impl WithDayClamped for DateTime<Utc> {
    fn with_day_clamped(self, day: u32) -> DateTime<Utc> {
        use chrono::Datelike;
        self.with_day(day.clamp(1, 28)).unwrap_or(self)
    }
}

/// Find unbooked slots for `service_type`, excluding any whose start date
/// (YYYY-MM-DD prefix) falls in `blackout_dates`.
pub fn find_available_slots<'a>(
    pool: &'a [Slot],
    service_type: ServiceType,
    blackout_dates: &[String],
) -> Vec<&'a Slot> {
    pool.iter()
        .filter(|s| !s.booked && s.service_type == service_type)
        .filter(|s| {
            let date_prefix = &s.start_iso[..10.min(s.start_iso.len())];
            !blackout_dates.iter().any(|b| b == date_prefix)
        })
        .collect()
}

/// Book the first unbooked slot matching `service_type`, marking it booked
/// in place. Returns `None` if no slot is available.
pub fn book_slot(
    pool: &mut [Slot],
    service_type: ServiceType,
    user_id: &str,
    persist_path: Option<&Path>,
) -> Option<Appointment> {
    book_slot_avoiding_blackout(pool, service_type, user_id, &[], persist_path)
}

/// As [`book_slot`], but skips any slot whose start date falls in
/// `blackout_dates`, matching the exclusion `find_available_slots` applies.
pub fn book_slot_avoiding_blackout(
    pool: &mut [Slot],
    service_type: ServiceType,
    user_id: &str,
    blackout_dates: &[String],
    persist_path: Option<&Path>,
) -> Option<Appointment> {
    let slot = pool.iter_mut().find(|s| {
        !s.booked
            && s.service_type == service_type
            && !blackout_dates
                .iter()
                .any(|b| b == &s.start_iso[..10.min(s.start_iso.len())])
    })?;
    slot.booked = true;

    let booking_id = booking_id(user_id, &slot.start_iso, slot.service_type);
    let appointment = Appointment {
        service_type: slot.service_type,
        start_iso: slot.start_iso.clone(),
        end_iso: slot.end_iso.clone(),
        staff_role: slot.staff_role.clone(),
        location: slot.location.clone(),
        price: slot.price,
        booking_id,
    };

    if let Some(path) = persist_path {
        persist_booking(path, &appointment);
    }

    Some(appointment)
}

fn booking_id(user_id: &str, start_iso: &str, service_type: ServiceType) -> String {
    let payload = format!("{user_id}-{start_iso}-{service_type}");
    let digest = Sha1::digest(payload.as_bytes());
    let hex = hex_encode(&digest);
    hex[..10].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to String cannot fail");
    }
    out
}

/// Append `appointment` to the JSON array at `path`, creating it if absent
/// and tolerating a corrupted existing file by treating it as empty. This is
/// a best-effort side channel — the in-memory booking is authoritative for
/// the run regardless of whether the write succeeds.
pub fn persist_booking(path: &Path, appointment: &Appointment) {
    let mut existing: Vec<serde_json::Value> = std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    match serde_json::to_value(appointment) {
        Ok(value) => existing.push(value),
        Err(_) => return,
    }

    if let Ok(json) = serde_json::to_string_pretty(&existing) {
        let _ = std::fs::write(path, json);
    }
}
