//! Lease coordinator: connection-scoped distributed mutexes.
//!
//! A client opens one stream and sends `(key, ttl)` messages on it. The first
//! message for a key acquires the lease, later ones renew it. A lease belongs
//! to the stream that acquired it: when the stream closes, every lease it
//! still holds is released, unless someone else has taken it over in the
//! meantime.
//!
//! All decisions are made under one mutex, so operations on a coordinator are
//! linearisable.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ftl_core::SystemClock;
//! use ftl_runtime::lease::LeaseCoordinator;
//!
//! let coordinator = Arc::new(LeaseCoordinator::new(SystemClock::shared()));
//! let mut a = coordinator.session();
//! let mut b = coordinator.session();
//! let key = vec!["x".to_string()];
//!
//! a.acquire(&key, Duration::from_secs(10)).unwrap();
//! assert!(b.acquire(&key, Duration::from_secs(10)).is_err());
//! drop(a);
//! b.acquire(&key, Duration::from_secs(10)).unwrap();
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use ftl_core::{SharedClock, Shutdown};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result, poison_err};
use crate::metrics::RuntimeMetrics;

/// Joins key segments into the lease table key.
#[must_use]
pub fn join_key(segments: &[String]) -> String {
    segments.join("/")
}

/// One message on a lease stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireLeaseRequest {
    /// Key path.
    pub key: Vec<String>,
    /// Requested time to live.
    pub ttl: Duration,
}

/// Reply to a granted acquire or renew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcquireLeaseResponse;

/// Server-side lease table.
#[derive(Debug)]
pub struct LeaseCoordinator {
    clock: SharedClock,
    leases: Mutex<HashMap<String, DateTime<Utc>>>,
    metrics: RuntimeMetrics,
}

impl LeaseCoordinator {
    /// Creates an empty coordinator.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            leases: Mutex::new(HashMap::new()),
            metrics: RuntimeMetrics::new(),
        }
    }

    /// Opens a session, the server side of one stream.
    #[must_use]
    pub fn session(self: &Arc<Self>) -> LeaseSession {
        LeaseSession {
            coordinator: Arc::clone(self),
            mine: HashMap::new(),
        }
    }

    /// Current expiry recorded for `key`, expired or not.
    #[must_use]
    pub fn expiry(&self, key: &str) -> Option<DateTime<Utc>> {
        self.leases.lock().ok()?.get(key).copied()
    }

    /// Serves one stream: answers each request until the client hangs up, a
    /// request is refused, or `shutdown` fires. Held leases are released on
    /// return.
    pub async fn serve(
        self: Arc<Self>,
        mut requests: mpsc::Receiver<AcquireLeaseRequest>,
        responses: mpsc::Sender<Result<AcquireLeaseResponse>>,
        shutdown: Shutdown,
    ) {
        let mut session = self.session();
        loop {
            let request = tokio::select! {
                () = shutdown.cancelled() => break,
                request = requests.recv() => request,
            };
            let Some(request) = request else {
                break;
            };
            match session.acquire(&request.key, request.ttl) {
                Ok(()) => {
                    if responses.send(Ok(AcquireLeaseResponse)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::debug!(key = %join_key(&request.key), error = %err, "lease refused");
                    let _ = responses.send(Err(err)).await;
                    break;
                }
            }
        }
        drop(session);
    }

    /// Opens an in-process stream served by a spawned task.
    #[must_use]
    pub fn connect(self: &Arc<Self>, shutdown: Shutdown) -> LeaseStream {
        let (request_tx, request_rx) = mpsc::channel(1);
        let (response_tx, response_rx) = mpsc::channel(1);
        let task = tokio::spawn(Arc::clone(self).serve(request_rx, response_tx, shutdown));
        LeaseStream {
            requests: request_tx,
            responses: response_rx,
            task,
        }
    }
}

/// The server-side state of one lease stream.
///
/// Dropping the session releases every lease it still holds.
#[derive(Debug)]
pub struct LeaseSession {
    coordinator: Arc<LeaseCoordinator>,
    mine: HashMap<String, DateTime<Utc>>,
}

impl LeaseSession {
    /// Acquires or renews the lease on `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty key, a zero TTL, or a TTL
    ///   that overflows the clock.
    /// - [`Error::ResourceExhausted`] if the lease is held elsewhere, was
    ///   taken over after expiring, or has expired on this stream.
    pub fn acquire(&mut self, key: &[String], ttl: Duration) -> Result<()> {
        if key.is_empty() || key.iter().any(String::is_empty) {
            return Err(Error::invalid("lease key must have non-empty segments"));
        }
        if ttl.is_zero() {
            return Err(Error::invalid("lease ttl must be positive"));
        }
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|_| Error::invalid(format!("lease ttl {ttl:?} is too large")))?;
        let key = join_key(key);

        let mut leases = self.coordinator.leases.lock().map_err(poison_err)?;
        let now = self.coordinator.clock.now();
        let mine = self.mine.get(&key).copied();
        let real = leases.get(&key).copied();

        let refused = match mine {
            Some(mine) if Some(mine) != real => Some("was taken over after expiring"),
            Some(mine) if mine > now => None,
            Some(_) => Some("expired on this stream"),
            None if real.is_some_and(|real| real > now) => Some("is held by another stream"),
            None => None,
        };
        if let Some(reason) = refused {
            drop(leases);
            self.coordinator.metrics.record_lease(false);
            return Err(Error::ResourceExhausted {
                message: format!("lease {key} {reason}"),
            });
        }

        let Some(expiry) = now.checked_add_signed(ttl) else {
            drop(leases);
            return Err(Error::invalid(format!("lease ttl {ttl} overflows the clock")));
        };
        leases.insert(key.clone(), expiry);
        drop(leases);
        if mine.is_some() {
            tracing::trace!(key = %key, "lease renewed");
        } else {
            tracing::debug!(key = %key, "lease acquired");
        }
        self.mine.insert(key, expiry);
        self.coordinator.metrics.record_lease(true);
        Ok(())
    }

    /// Keys this session has acquired, expired or not.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.mine.keys().map(String::as_str)
    }

    fn release_all(&mut self) {
        let Ok(mut leases) = self.coordinator.leases.lock() else {
            tracing::error!("lease table poisoned; leaking leases");
            return;
        };
        for (key, expiry) in self.mine.drain() {
            if leases.get(&key) == Some(&expiry) {
                leases.remove(&key);
                tracing::debug!(key = %key, "lease released");
            }
        }
    }
}

impl Drop for LeaseSession {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Client end of an in-process lease stream.
#[derive(Debug)]
pub struct LeaseStream {
    requests: mpsc::Sender<AcquireLeaseRequest>,
    responses: mpsc::Receiver<Result<AcquireLeaseResponse>>,
    task: JoinHandle<()>,
}

impl LeaseStream {
    /// Sends one acquire/renew request and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns the refusal sent by the server, or [`Error::Closed`] if the
    /// stream has ended. A refusal ends the stream.
    pub async fn acquire(&mut self, key: &[&str], ttl: Duration) -> Result<()> {
        let request = AcquireLeaseRequest {
            key: key.iter().map(|s| (*s).to_string()).collect(),
            ttl,
        };
        let closed = || Error::Closed {
            message: "lease stream".into(),
        };
        self.requests.send(request).await.map_err(|_| closed())?;
        match self.responses.recv().await {
            Some(reply) => reply.map(|_| ()),
            None => Err(closed()),
        }
    }

    /// Closes the stream and waits for the server to release its leases.
    pub async fn close(self) {
        drop(self.requests);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use ftl_core::{Clock as _, ErrorKind, ManualClock};
    use proptest::prelude::*;

    use super::*;

    fn setup() -> (Arc<LeaseCoordinator>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ));
        (Arc::new(LeaseCoordinator::new(clock.clone())), clock)
    }

    fn key(k: &str) -> Vec<String> {
        k.split('/').map(str::to_string).collect()
    }

    #[test]
    fn second_holder_is_refused() {
        let (coordinator, _) = setup();
        let mut a = coordinator.session();
        let mut b = coordinator.session();
        a.acquire(&key("x"), Duration::from_secs(1)).unwrap();
        let err = b.acquire(&key("x"), Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn holder_renews_while_live() {
        let (coordinator, clock) = setup();
        let mut a = coordinator.session();
        for _ in 0..10 {
            a.acquire(&key("x"), Duration::from_secs(2)).unwrap();
            clock.advance(Duration::from_secs(1));
        }
        let expected = clock.now() + TimeDelta::seconds(1);
        assert_eq!(coordinator.expiry("x"), Some(expected));
    }

    #[test]
    fn expired_lease_cannot_be_renewed_on_same_stream() {
        let (coordinator, clock) = setup();
        let mut a = coordinator.session();
        a.acquire(&key("x"), Duration::from_secs(1)).unwrap();
        clock.advance(Duration::from_secs(1));
        assert!(a.acquire(&key("x"), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn stolen_lease_is_not_released_by_old_holder() {
        let (coordinator, clock) = setup();
        let mut a = coordinator.session();
        let mut b = coordinator.session();
        a.acquire(&key("x/y"), Duration::from_secs(1)).unwrap();
        clock.advance(Duration::from_millis(1100));
        b.acquire(&key("x/y"), Duration::from_secs(5)).unwrap();

        assert!(a.acquire(&key("x/y"), Duration::from_secs(1)).is_err());
        drop(a);
        assert!(coordinator.expiry("x/y").is_some());
        drop(b);
        assert!(coordinator.expiry("x/y").is_none());
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let (coordinator, _) = setup();
        let mut a = coordinator.session();
        assert_eq!(
            a.acquire(&[], Duration::from_secs(1)).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            a.acquire(&key("x"), Duration::ZERO).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn overflowing_ttl_is_rejected_without_poisoning() {
        let (coordinator, _) = setup();
        let mut a = coordinator.session();
        let err = a
            .acquire(&key("big"), Duration::from_secs(10_000_000_000_000))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(coordinator.expiry("big").is_none());

        let mut b = coordinator.session();
        b.acquire(&key("other"), Duration::from_secs(1)).unwrap();
        a.acquire(&key("big"), Duration::from_secs(1)).unwrap();
    }

    #[tokio::test]
    async fn refused_stream_closes_and_releases() {
        let (coordinator, _) = setup();
        let shutdown = Shutdown::new();
        let mut a = coordinator.connect(shutdown.clone());
        let mut b = coordinator.connect(shutdown.clone());

        a.acquire(&["x"], Duration::from_secs(1)).await.unwrap();
        a.acquire(&["y"], Duration::from_secs(1)).await.unwrap();
        let err = b.acquire(&["x"], Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        let err = b.acquire(&["z"], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Closed { .. }));

        a.close().await;
        assert!(coordinator.expiry("x").is_none());
        assert!(coordinator.expiry("y").is_none());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Acquire { session: usize, ttl_ms: u64 },
        Advance { ms: u64 },
        Close { session: usize },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3, 100u64..2000).prop_map(|(session, ttl_ms)| Op::Acquire { session, ttl_ms }),
            (1u64..1500).prop_map(|ms| Op::Advance { ms }),
            (0usize..3).prop_map(|session| Op::Close { session }),
        ]
    }

    proptest! {
        #[test]
        fn at_most_one_live_holder(ops in prop::collection::vec(op(), 1..60)) {
            let (coordinator, clock) = setup();
            let mut sessions: Vec<Option<LeaseSession>> =
                (0..3).map(|_| Some(coordinator.session())).collect();
            let mut held: Vec<Option<DateTime<Utc>>> = vec![None; 3];

            for op in ops {
                match op {
                    Op::Acquire { session, ttl_ms } => {
                        if let Some(s) = sessions[session].as_mut() {
                            if s.acquire(&key("k"), Duration::from_millis(ttl_ms)).is_ok() {
                                held[session] = Some(clock.now() + TimeDelta::milliseconds(i64::try_from(ttl_ms).unwrap()));
                            }
                        }
                    }
                    Op::Advance { ms } => clock.advance(Duration::from_millis(ms)),
                    Op::Close { session } => {
                        sessions[session] = None;
                        held[session] = None;
                        sessions[session] = Some(coordinator.session());
                    }
                }
                let now = clock.now();
                let live = held.iter().filter(|h| h.is_some_and(|e| e > now)).count();
                prop_assert!(live <= 1, "{live} live holders");
            }
        }
    }
}
