//! Per-callback-key event buffer with bounded, draining waits.
//!
//! A facade keeps the [`EventSender`] half and delivers events as they
//! happen; the owning session holds the [`EventStream`] and waits on it.
//!
//! Matching semantics:
//! - a successful wait removes the matched event and every event buffered
//!   before it; later events stay buffered
//! - a timed-out wait leaves the buffer untouched
//! - [`EventStream::drain_all`] discards everything received so far
//!
//! There is exactly one waiter per stream (`&mut self`) and every wait has a
//! deadline.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::event::{Event, EventName};

/// Create a connected sender/stream pair for one callback key.
#[must_use]
pub fn channel(key: impl Into<String>) -> (EventSender, EventStream) {
    let key = key.into();
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender {
            key: key.clone(),
            tx,
        },
        EventStream {
            key,
            rx,
            buffer: VecDeque::new(),
            disconnected: false,
        },
    )
}

/// Delivery half held by the facade.
#[derive(Debug, Clone)]
pub struct EventSender {
    key: String,
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Deliver an event; returns false if the stream was dropped.
    pub fn send(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// A wait that ended without a matching event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamWaitError {
    pub expected: String,
    pub elapsed: Duration,
    pub last_observed: Option<EventName>,
    /// The sender side is gone; no further events can arrive.
    pub disconnected: bool,
}

impl fmt::Display for StreamWaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timeout waiting for {} after {}ms (last_observed={}",
            self.expected,
            self.elapsed.as_millis(),
            self.last_observed.map_or("none", EventName::as_str),
        )?;
        if self.disconnected {
            write!(f, ", disconnected")?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for StreamWaitError {}

/// Receive half owned by a session or adapter-state watcher.
#[derive(Debug)]
pub struct EventStream {
    key: String,
    rx: mpsc::UnboundedReceiver<Event>,
    buffer: VecDeque<Event>,
    disconnected: bool,
}

impl EventStream {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for an event named `name`.
    pub async fn wait_for(
        &mut self,
        name: EventName,
        timeout: Duration,
    ) -> Result<Event, StreamWaitError> {
        self.wait_for_any(&[name], timeout).await
    }

    /// Wait for the first event whose name is in `names`.
    pub async fn wait_for_any(
        &mut self,
        names: &[EventName],
        timeout: Duration,
    ) -> Result<Event, StreamWaitError> {
        let start = Instant::now();
        let deadline = start + timeout;
        self.pull_ready();

        loop {
            if let Some(pos) = self.buffer.iter().position(|e| names.contains(&e.name)) {
                let mut drained: VecDeque<Event> = self.buffer.drain(..=pos).collect();
                if let Some(matched) = drained.pop_back() {
                    tracing::trace!(
                        key = %self.key,
                        event = %matched.name,
                        discarded = drained.len(),
                        elapsed_ms = elapsed_ms(start),
                        "event matched"
                    );
                    return Ok(matched);
                }
            }

            if self.disconnected {
                return Err(self.timeout_error(names, start));
            }

            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(event)) => self.buffer.push_back(event),
                Ok(None) => self.disconnected = true,
                Err(_) => return Err(self.timeout_error(names, start)),
            }
        }
    }

    /// Discard every event received so far, returning them oldest first.
    pub fn drain_all(&mut self) -> Vec<Event> {
        self.pull_ready();
        self.buffer.drain(..).collect()
    }

    /// Number of events buffered and not yet consumed.
    pub fn buffered(&mut self) -> usize {
        self.pull_ready();
        self.buffer.len()
    }

    fn pull_ready(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.buffer.push_back(event),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
    }

    fn timeout_error(&self, names: &[EventName], start: Instant) -> StreamWaitError {
        let expected = names
            .iter()
            .map(|n| n.as_str())
            .collect::<Vec<_>>()
            .join("|");
        StreamWaitError {
            expected,
            elapsed: start.elapsed(),
            last_observed: self.buffer.back().map(|e| e.name),
            disconnected: self.disconnected,
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(name: EventName) -> Event {
        Event::session(name, "fira_session_10", 10)
    }

    #[tokio::test(start_paused = true)]
    async fn match_drains_prefix_and_keeps_suffix() {
        let (tx, mut stream) = channel("fira_session_10");
        tx.send(ev(EventName::ReportReceived));
        tx.send(ev(EventName::Started));
        tx.send(ev(EventName::ReportReceived));

        let got = stream
            .wait_for(EventName::Started, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(got.name, EventName::Started);
        assert_eq!(stream.buffered(), 1);
        let rest = stream
            .wait_for(EventName::ReportReceived, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(rest.name, EventName::ReportReceived);
        assert_eq!(stream.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_wait_for_same_event_times_out() {
        let (tx, mut stream) = channel("k");
        tx.send(ev(EventName::Opened));
        stream
            .wait_for(EventName::Opened, Duration::from_secs(3))
            .await
            .unwrap();
        let err = stream
            .wait_for(EventName::Opened, Duration::from_secs(3))
            .await
            .unwrap_err();
        assert_eq!(err.expected, "Opened");
        assert!(err.elapsed >= Duration::from_secs(3));
        assert!(!err.disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_buffer_untouched() {
        let (tx, mut stream) = channel("k");
        tx.send(ev(EventName::ReportReceived));
        tx.send(ev(EventName::ReportReceived));
        let err = stream
            .wait_for(EventName::Stopped, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert_eq!(err.last_observed, Some(EventName::ReportReceived));
        assert_eq!(stream.buffered(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn event_arriving_later_is_matched() {
        let (tx, mut stream) = channel("k");
        let sender = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            sender.send(ev(EventName::Stopped));
        });
        let got = stream
            .wait_for(EventName::Stopped, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(got.name, EventName::Stopped);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_any_returns_first_of_set() {
        let (tx, mut stream) = channel("k");
        tx.send(ev(EventName::StartFailed));
        tx.send(ev(EventName::Started));
        let got = stream
            .wait_for_any(
                &[EventName::Started, EventName::StartFailed],
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(got.name, EventName::StartFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_all_clears_everything() {
        let (tx, mut stream) = channel("k");
        tx.send(ev(EventName::ReportReceived));
        tx.send(ev(EventName::Stopped));
        let drained = stream.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(stream.buffered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_ends_wait_early() {
        let (tx, mut stream) = channel("k");
        tx.send(ev(EventName::Closed));
        drop(tx);
        stream
            .wait_for(EventName::Closed, Duration::from_secs(1))
            .await
            .unwrap();
        let err = stream
            .wait_for(EventName::Closed, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(err.disconnected);
        assert_eq!(err.elapsed, Duration::ZERO);
        assert!(err.to_string().contains("disconnected"));
    }
}
