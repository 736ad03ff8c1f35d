use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct LocationSample {
    pub worker_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub captured_at: DateTime<Utc>,
}

/// Handle returned to the producing worker session. The `session` id acts as
/// an epoch: replacing the session invalidates every handle issued before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    pub booking_id: Uuid,
    pub session: Uuid,
}

struct TrackingSession {
    session: Uuid,
    worker_id: Uuid,
    tx: watch::Sender<Option<LocationSample>>,
}

/// Latest-position fan-out for en-route jobs. One producer (the assigned
/// worker's device) per booking, any number of tracking viewers. Built on a
/// watch channel: each push overwrites the latest sample, so a slow or
/// disconnected viewer never backpressures the worker.
pub struct LocationStreamHub {
    sessions: DashMap<Uuid, TrackingSession>,
}

impl LocationStreamHub {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Opens the tracking session for a booking, replacing any existing one.
    /// The replaced session's subscribers see their stream end and its
    /// handle stops matching on push.
    pub fn open(&self, booking_id: Uuid, worker_id: Uuid) -> SessionHandle {
        let (tx, _rx) = watch::channel(None);
        let session = Uuid::new_v4();

        self.sessions.insert(
            booking_id,
            TrackingSession {
                session,
                worker_id,
                tx,
            },
        );

        tracing::info!(booking_id = %booking_id, worker_id = %worker_id, "tracking session opened");
        SessionHandle {
            booking_id,
            session,
        }
    }

    /// Records a position sample. Returns whether the sample was accepted;
    /// pushes against a closed or replaced session are dropped silently
    /// since worker devices may lag behind state transitions.
    pub fn push(&self, handle: SessionHandle, lat: f64, lng: f64) -> bool {
        let Some(session) = self.sessions.get(&handle.booking_id) else {
            tracing::debug!(booking_id = %handle.booking_id, "push for closed session dropped");
            return false;
        };

        if session.session != handle.session {
            tracing::debug!(booking_id = %handle.booking_id, "push for replaced session dropped");
            return false;
        }

        let sample = LocationSample {
            worker_id: session.worker_id,
            lat,
            lng,
            captured_at: Utc::now(),
        };
        session.tx.send_replace(Some(sample));
        true
    }

    /// Stream of samples for the booking's viewers: the latest sample on
    /// connect, then each update; ends when the session closes. `None` for
    /// bookings with no open session. The stream owns its receiver, so it
    /// outlives the hub borrow.
    pub fn subscribe(
        &self,
        booking_id: Uuid,
    ) -> Option<impl Stream<Item = LocationSample> + Send + Unpin + use<>> {
        let rx = self
            .sessions
            .get(&booking_id)
            .map(|session| session.tx.subscribe())?;

        Some(WatchStream::new(rx).filter_map(|sample| sample))
    }

    /// Tears the session down. Idempotent; invoked by the lifecycle on
    /// every terminal transition so no session outlives its booking.
    pub fn close(&self, booking_id: Uuid) {
        if self.sessions.remove(&booking_id).is_some() {
            tracing::info!(booking_id = %booking_id, "tracking session closed");
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_open(&self, booking_id: Uuid) -> bool {
        self.sessions.contains_key(&booking_id)
    }
}
