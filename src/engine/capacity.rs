use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;

/// Admission control for slot bookings. Occupancy is tracked per
/// `(carwash, bucket start)` on the carwash's slot-duration grid; a
/// reservation covers every bucket its window intersects, so an unaligned
/// window counts against both buckets it touches.
pub struct SlotCapacityIndex {
    buckets: DashMap<Uuid, Mutex<BTreeMap<i64, u32>>>,
    reservations: DashMap<Uuid, ReservationRecord>,
}

#[derive(Debug, Clone)]
struct ReservationRecord {
    carwash_id: Uuid,
    bucket_starts: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub id: Uuid,
    pub carwash_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotWindow {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub remaining: u32,
}

impl SlotCapacityIndex {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            reservations: DashMap::new(),
        }
    }

    /// Admits the window if every covered bucket has headroom, incrementing
    /// all of them, or fails with `CapacityExceeded` without side effects.
    /// The per-carwash mutex makes check-and-increment atomic across
    /// concurrent attempts, including multi-bucket windows.
    pub fn try_reserve(
        &self,
        carwash_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        slot_minutes: u32,
        capacity: u32,
    ) -> Result<Reservation, AppError> {
        let starts = covered_buckets(window_start, window_end, slot_minutes);
        if starts.is_empty() {
            return Err(AppError::BadRequest("empty booking window".to_string()));
        }

        let entry = self
            .buckets
            .entry(carwash_id)
            .or_insert_with(|| Mutex::new(BTreeMap::new()));
        let mut table = entry
            .lock()
            .map_err(|_| AppError::Internal("slot table lock poisoned".to_string()))?;

        for start in &starts {
            let occupied = table.get(start).copied().unwrap_or(0);
            if occupied >= capacity {
                return Err(AppError::CapacityExceeded {
                    carwash_id,
                    window_start,
                });
            }
        }

        for start in &starts {
            *table.entry(*start).or_insert(0) += 1;
        }
        drop(table);

        let reservation = Reservation {
            id: Uuid::new_v4(),
            carwash_id,
        };
        self.reservations.insert(
            reservation.id,
            ReservationRecord {
                carwash_id,
                bucket_starts: starts,
            },
        );

        tracing::debug!(
            carwash_id = %carwash_id,
            reservation_id = %reservation.id,
            window_start = %window_start,
            "slot reserved"
        );

        Ok(reservation)
    }

    /// Decrements the reservation's buckets. Safe to call any number of
    /// times: the record is removed on the first call, so retried
    /// cancellations are a no-op.
    pub fn release(&self, reservation_id: Uuid) {
        let Some((_, record)) = self.reservations.remove(&reservation_id) else {
            return;
        };

        if let Some(entry) = self.buckets.get(&record.carwash_id) {
            if let Ok(mut table) = entry.lock() {
                for start in &record.bucket_starts {
                    if let Some(occupied) = table.get_mut(start) {
                        *occupied = occupied.saturating_sub(1);
                    }
                }
            }
        }

        tracing::debug!(reservation_id = %reservation_id, "slot released");
    }

    /// Current occupancy across all buckets of all carwashes.
    pub fn total_occupied(&self) -> u64 {
        self.buckets
            .iter()
            .map(|entry| {
                entry
                    .lock()
                    .map(|table| table.values().map(|v| u64::from(*v)).sum())
                    .unwrap_or(0)
            })
            .sum()
    }

    /// Read-only snapshot of the grid between `from` and `to`, annotated
    /// with remaining capacity. Tolerates in-flight reservations.
    pub fn availability(
        &self,
        carwash_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        slot_minutes: u32,
        capacity: u32,
    ) -> Vec<SlotWindow> {
        let step = i64::from(slot_minutes) * 60;
        let mut windows = Vec::new();

        let occupied_at = |ts: i64| -> u32 {
            self.buckets
                .get(&carwash_id)
                .and_then(|entry| entry.lock().ok().map(|t| t.get(&ts).copied().unwrap_or(0)))
                .unwrap_or(0)
        };

        let mut start = align_down(from.timestamp(), step);
        if start < from.timestamp() {
            start += step;
        }
        while start + step <= to.timestamp() {
            let occupied = occupied_at(start);
            windows.push(SlotWindow {
                window_start: DateTime::from_timestamp(start, 0).unwrap_or(from),
                window_end: DateTime::from_timestamp(start + step, 0).unwrap_or(to),
                remaining: capacity.saturating_sub(occupied),
            });
            start += step;
        }

        windows
    }
}

fn align_down(ts: i64, step: i64) -> i64 {
    ts - ts.rem_euclid(step)
}

fn covered_buckets(window_start: DateTime<Utc>, window_end: DateTime<Utc>, slot_minutes: u32) -> Vec<i64> {
    let step = i64::from(slot_minutes) * 60;
    if step == 0 || window_end <= window_start {
        return Vec::new();
    }

    let mut starts = Vec::new();
    let mut bucket = align_down(window_start.timestamp(), step);
    while bucket < window_end.timestamp() {
        starts.push(bucket);
        bucket += step;
    }
    starts
}
