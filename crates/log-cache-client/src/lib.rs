//! Client SDK: a paging cursor (`Walk`) over an egress reader, and a
//! fixed-interval sliding window built on top of it (`Window`). Mirrors
//! `log-cache-store`'s split between a single testable step
//! (`window_tick`, cf. `Store::prune_once`) and the long-lived background
//! task that drives it (`spawn_window`, cf. `spawn_pruner`).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log_cache_proto::Envelope;
use thiserror::Error;

/// Reads envelopes for one source starting at `start` (inclusive), the
/// client-side view of the egress `Read` RPC. Implemented by callers
/// against whatever transport they use (HTTP egress client, an in-process
/// `Store`, a mock in tests).
#[async_trait::async_trait]
pub trait Reader: Send + Sync {
    async fn read(&self, source_id: &str, start: i64, end: i64) -> Result<Vec<Envelope>, ReaderError>;
}

#[derive(Debug, Error)]
#[error("reader error: {0}")]
pub struct ReaderError(pub String);

/// Called once per envelope in arrival order. Returning `false` stops the
/// walk immediately, mid-batch.
pub trait Visitor: Send {
    fn visit(&mut self, envelope: &Envelope) -> bool;
}

impl<F: FnMut(&Envelope) -> bool + Send> Visitor for F {
    fn visit(&mut self, envelope: &Envelope) -> bool {
        self(envelope)
    }
}

/// Governs retries after a read error, per §4.11 ("retry-with-attempts,
/// always-retry, or fail-fast").
#[derive(Clone, Copy, Debug)]
pub enum BackoffPolicy {
    FailFast,
    AlwaysRetry,
    RetryWithAttempts(usize),
}

/// Governs whether an empty read (no envelopes, or none old enough to be
/// past the ingestion tail) ends the walk or is retried after a pause.
#[derive(Clone, Copy, Debug)]
pub enum EmptyReadPolicy {
    StopImmediately,
    PollUntilEnd,
}

#[derive(Debug, Error)]
pub enum WalkError {
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error("walk exceeded its deadline")]
    Timeout,
}

/// Knobs for one `walk` call. `now` is injectable so tests can run without
/// a real clock or sleeps.
#[derive(Clone)]
pub struct WalkOptions {
    pub start: i64,
    pub end: Option<i64>,
    pub delay: Duration,
    pub poll_interval: Duration,
    pub backoff: BackoffPolicy,
    pub on_empty: EmptyReadPolicy,
    pub now: fn() -> i64,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            start: 0,
            end: None,
            delay: Duration::from_secs(3),
            poll_interval: Duration::from_millis(500),
            backoff: BackoffPolicy::RetryWithAttempts(3),
            on_empty: EmptyReadPolicy::PollUntilEnd,
            now: now_nanos,
        }
    }
}

pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as i64
}

/// Pages through `reader` for `source_id`, starting at `opts.start`,
/// advancing `start` to `last_envelope_ts + 1` after each batch so the
/// next read picks up immediately after the last envelope seen. Envelopes
/// newer than `now - delay` are held back rather than visited, so the walk
/// doesn't race a producer that is still in flight. Stops when `opts.end`
/// is reached, when `visitor` returns `false`, or — per `opts.on_empty` —
/// when a read comes back with nothing left to deliver.
pub async fn walk<R: Reader, V: Visitor>(
    source_id: &str,
    reader: &R,
    visitor: &mut V,
    opts: &WalkOptions,
) -> Result<(), WalkError> {
    let mut start = opts.start;
    let mut attempts = 0usize;

    loop {
        if let Some(end) = opts.end {
            if start >= end {
                return Ok(());
            }
        }

        let read_end = opts.end.unwrap_or(i64::MAX);
        let envelopes = match reader.read(source_id, start, read_end).await {
            Ok(envelopes) => envelopes,
            Err(err) => {
                let should_retry = match opts.backoff {
                    BackoffPolicy::FailFast => false,
                    BackoffPolicy::AlwaysRetry => true,
                    BackoffPolicy::RetryWithAttempts(max) => {
                        attempts += 1;
                        attempts <= max
                    }
                };
                if !should_retry {
                    return Err(err.into());
                }
                tokio::time::sleep(opts.poll_interval).await;
                continue;
            }
        };
        attempts = 0;

        let cutoff = (opts.now)() - opts.delay.as_nanos() as i64;
        let mut last_ts = None;
        let mut stopped_by_visitor = false;

        for envelope in &envelopes {
            if envelope.timestamp > cutoff {
                break;
            }
            last_ts = Some(envelope.timestamp);
            if !visitor.visit(envelope) {
                stopped_by_visitor = true;
                break;
            }
        }

        if stopped_by_visitor {
            return Ok(());
        }

        match last_ts {
            Some(ts) => start = ts + 1,
            None => match opts.on_empty {
                EmptyReadPolicy::StopImmediately => return Ok(()),
                EmptyReadPolicy::PollUntilEnd => {
                    tokio::time::sleep(opts.poll_interval).await;
                }
            },
        }
    }
}

/// Knobs for the sliding window built on top of `walk`.
#[derive(Clone)]
pub struct WindowOptions {
    pub width: Duration,
    pub interval: Duration,
    pub walk: WalkOptions,
}

/// One window tick: walks `[now - width, now]`, bounded by a deadline of
/// twice `interval` (per §4.11's "each tick creates a derived deadline of
/// twice the interval").
pub async fn window_tick<R: Reader, V: Visitor>(
    source_id: &str,
    reader: &R,
    visitor: &mut V,
    opts: &WindowOptions,
) -> Result<(), WalkError> {
    let now = (opts.walk.now)();
    let width_ns = opts.width.as_nanos() as i64;
    let tick_opts = WalkOptions {
        start: now.saturating_sub(width_ns),
        end: Some(now),
        ..opts.walk.clone()
    };
    let deadline = opts.interval.saturating_mul(2);

    tokio::time::timeout(deadline, walk(source_id, reader, visitor, &tick_opts))
        .await
        .map_err(|_| WalkError::Timeout)?
}

/// Spawns the long-lived task that ticks `window_tick` every
/// `opts.interval`, advancing the window forward each time, until
/// `shutdown` fires.
pub fn spawn_window<R, V>(
    source_id: String,
    reader: R,
    mut visitor: V,
    opts: WindowOptions,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()>
where
    R: Reader + 'static,
    V: Visitor + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(opts.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = window_tick(&source_id, &reader, &mut visitor, &opts).await {
                        tracing::warn!(%source_id, error = %err, "window tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use log_cache_proto::{Counter, Payload};
    use std::sync::Mutex;

    struct FixedReader {
        batches: Mutex<Vec<Vec<Envelope>>>,
    }

    #[async_trait::async_trait]
    impl Reader for FixedReader {
        async fn read(&self, _source_id: &str, _start: i64, _end: i64) -> Result<Vec<Envelope>, ReaderError> {
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(batches.remove(0))
            }
        }
    }

    fn counter(ts: i64) -> Envelope {
        Envelope {
            source_id: "a".to_string(),
            instance_id: None,
            timestamp: ts,
            tags: Default::default(),
            payload: Some(Payload::Counter(Counter {
                name: "n".to_string(),
                total: 1,
            })),
        }
    }

    fn fixed_now(ts: i64) -> fn() -> i64 {
        // `now` must be a plain fn pointer (WalkOptions::now), so each test
        // picks one of these fixed clocks rather than capturing state.
        match ts {
            1_000_000_000 => || 1_000_000_000,
            _ => || 0,
        }
    }

    #[tokio::test]
    async fn walk_visits_envelopes_older_than_delay_and_stops_at_end() {
        let reader = FixedReader {
            batches: Mutex::new(vec![vec![counter(1), counter(2), counter(3)]]),
        };
        let mut seen = Vec::new();
        let opts = WalkOptions {
            start: 0,
            end: Some(100),
            delay: Duration::from_secs(0),
            now: fixed_now(1_000_000_000),
            on_empty: EmptyReadPolicy::StopImmediately,
            ..WalkOptions::default()
        };

        walk("a", &reader, &mut |e: &Envelope| {
            seen.push(e.timestamp);
            true
        }, &opts)
        .await
        .unwrap();

        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn walk_holds_back_envelopes_newer_than_now_minus_delay() {
        let reader = FixedReader {
            batches: Mutex::new(vec![vec![counter(1), counter(500_000_000_000)]]),
        };
        let mut seen = Vec::new();
        let opts = WalkOptions {
            start: 0,
            end: Some(1),
            delay: Duration::from_secs(3),
            now: fixed_now(1_000_000_000),
            on_empty: EmptyReadPolicy::StopImmediately,
            ..WalkOptions::default()
        };

        walk("a", &reader, &mut |e: &Envelope| {
            seen.push(e.timestamp);
            true
        }, &opts)
        .await
        .unwrap();

        // now - delay = 1s - 3s < 0, so even ts=1 is "too new" and held back.
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn walk_stops_when_visitor_returns_false() {
        let reader = FixedReader {
            batches: Mutex::new(vec![vec![counter(1), counter(2), counter(3)]]),
        };
        let mut seen = Vec::new();
        let opts = WalkOptions {
            start: 0,
            end: Some(100),
            delay: Duration::from_secs(0),
            now: fixed_now(1_000_000_000),
            on_empty: EmptyReadPolicy::StopImmediately,
            ..WalkOptions::default()
        };

        walk("a", &reader, &mut |e: &Envelope| {
            seen.push(e.timestamp);
            e.timestamp < 2
        }, &opts)
        .await
        .unwrap();

        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn walk_fail_fast_propagates_reader_error() {
        struct FailingReader;
        #[async_trait::async_trait]
        impl Reader for FailingReader {
            async fn read(&self, _source_id: &str, _start: i64, _end: i64) -> Result<Vec<Envelope>, ReaderError> {
                Err(ReaderError("boom".to_string()))
            }
        }

        let opts = WalkOptions {
            start: 0,
            end: Some(100),
            backoff: BackoffPolicy::FailFast,
            now: fixed_now(0),
            ..WalkOptions::default()
        };

        let err = walk("a", &FailingReader, &mut |_: &Envelope| true, &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, WalkError::Reader(_)));
    }
}
