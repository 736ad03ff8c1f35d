use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::engine::capacity::SlotCapacityIndex;
use crate::engine::handshake::HandshakeVerifier;
use crate::engine::tracking::LocationStreamHub;
use crate::models::assignment::WorkerAssignment;
use crate::models::booking::{Booking, BookingEvent};
use crate::models::carwash::Carwash;
use crate::models::worker::Worker;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub carwashes: DashMap<Uuid, Carwash>,
    pub workers: DashMap<Uuid, Worker>,
    pub bookings: DashMap<Uuid, Booking>,
    /// Keyed by booking id; a booking has at most one assignment record.
    pub assignments: DashMap<Uuid, WorkerAssignment>,
    /// Exclusivity index: worker id -> booking id of their active job.
    pub active_by_worker: DashMap<Uuid, Uuid>,
    pub slot_index: SlotCapacityIndex,
    pub tracking: LocationStreamHub,
    pub handshake: HandshakeVerifier,
    pub booking_events_tx: broadcast::Sender<BookingEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(event_buffer_size: usize, max_code_attempts: u32) -> Self {
        let (booking_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            carwashes: DashMap::new(),
            workers: DashMap::new(),
            bookings: DashMap::new(),
            assignments: DashMap::new(),
            active_by_worker: DashMap::new(),
            slot_index: SlotCapacityIndex::new(),
            tracking: LocationStreamHub::new(),
            handshake: HandshakeVerifier::new(max_code_attempts),
            booking_events_tx,
            metrics: Metrics::new(),
        }
    }

    pub fn record_transition(&self, started: std::time::Instant, outcome: &str) {
        let elapsed = started.elapsed().as_secs_f64();
        self.metrics
            .transition_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed);
        self.metrics
            .transitions_total
            .with_label_values(&[outcome])
            .inc();
    }
}
