//! Deterministic clinic scheduler: slot generation, availability queries,
//! booking, and best-effort JSON persistence of booked appointments.

mod slots;

pub use slots::{
    book_slot, book_slot_avoiding_blackout, find_available_slots, generate_slots, persist_booking,
};
