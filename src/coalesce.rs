//! Battery event coalescing.
//!
//! Power hardware notifications arrive in bursts: plugging in a charger can
//! produce a charging-state change, a level change, and a time-to-full
//! estimate within a few milliseconds. This module collapses repeated
//! same-kind events inside a short window into one emission per kind, while
//! letting power-source changes and errors bypass the window entirely.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio::time::sleep_until;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::domain::BatteryEvent;
use crate::domain::BatteryEventKind;

/// Collapses bursty battery events behind a single flush deadline.
///
/// At most one event per kind is pending at any time; a newer event of the
/// same kind silently replaces the pending one. While a flush is scheduled,
/// further submissions never move the deadline.
#[derive(Debug)]
pub struct Coalescer {
    window: Duration,

    /// Most-recent pending event per kind. Key order is the flush order.
    pending: BTreeMap<BatteryEventKind, BatteryEvent>,

    /// Scheduled flush time, if any.
    deadline: Option<Instant>,
}

impl Coalescer {
    /// Create a coalescer with the given window length.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: BTreeMap::new(),
            deadline: None,
        }
    }

    /// Accept one raw event at time `now`.
    ///
    /// Returns `Some` when the event is pass-through and must be delivered
    /// immediately; coalescable events are stored for the next flush and
    /// return `None`.
    fn submit(&mut self, event: BatteryEvent, now: Instant) -> Option<BatteryEvent> {
        let kind = event.kind();

        if kind.is_passthrough() {
            trace!("Pass-through battery event: {:?}", kind);
            return Some(event);
        }

        if self.pending.insert(kind, event).is_some() {
            trace!("Replaced pending battery event: {:?}", kind);
        }

        if self.deadline.is_none() {
            self.deadline = Some(now + self.window);
        }

        None
    }

    /// Drain all pending events in kind order and clear the deadline.
    fn flush(&mut self) -> Vec<BatteryEvent> {
        self.deadline = None;
        let drained: Vec<BatteryEvent> = std::mem::take(&mut self.pending).into_values().collect();
        if !drained.is_empty() {
            debug!("Flushing {} coalesced battery event(s)", drained.len());
        }
        drained
    }

    /// Run the coalescer between a raw event channel and its subscriber.
    ///
    /// A closed subscriber channel ends the task; a closed provider channel
    /// delivers whatever is still pending, then ends the task.
    pub async fn run(mut self, mut rx: mpsc::Receiver<BatteryEvent>, tx: mpsc::Sender<BatteryEvent>) {
        loop {
            let deadline = self.deadline;

            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if let Some(immediate) = self.submit(event, Instant::now())
                                && tx.send(immediate).await.is_err()
                            {
                                warn!("Battery event subscriber dropped, stopping coalescer");
                                return;
                            }
                        }
                        None => {
                            for event in self.flush() {
                                if tx.send(event).await.is_err() {
                                    warn!("Battery event subscriber dropped during final flush");
                                    return;
                                }
                            }
                            debug!("Battery provider channel closed, stopping coalescer");
                            return;
                        }
                    }
                }

                () = flush_timer(deadline), if deadline.is_some() => {
                    for event in self.flush() {
                        if tx.send(event).await.is_err() {
                            warn!("Battery event subscriber dropped, stopping coalescer");
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Sleep until the scheduled flush, or forever when none is scheduled.
/// The select guard keeps the pending-forever case from being polled.
async fn flush_timer(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const WINDOW: Duration = Duration::from_millis(120);

    #[test]
    fn test_same_kind_last_write_wins() {
        let mut coalescer = Coalescer::new(WINDOW);
        let now = Instant::now();

        assert!(coalescer.submit(BatteryEvent::LevelChanged { percent: 50 }, now).is_none());
        assert!(coalescer.submit(BatteryEvent::LevelChanged { percent: 51 }, now).is_none());
        assert!(coalescer.submit(BatteryEvent::LevelChanged { percent: 52 }, now).is_none());

        let flushed = coalescer.flush();
        assert_eq!(flushed, vec![BatteryEvent::LevelChanged { percent: 52 }]);
    }

    #[test]
    fn test_deadline_set_once() {
        let mut coalescer = Coalescer::new(WINDOW);
        let now = Instant::now();

        coalescer.submit(BatteryEvent::LevelChanged { percent: 50 }, now);
        let first = coalescer.deadline;
        assert_eq!(first, Some(now + WINDOW));

        // A later same-kind submission must not move the deadline.
        coalescer.submit(
            BatteryEvent::LevelChanged { percent: 51 },
            now + Duration::from_millis(80),
        );
        assert_eq!(coalescer.deadline, first);
    }

    #[test]
    fn test_flush_kind_order() {
        let mut coalescer = Coalescer::new(WINDOW);
        let now = Instant::now();

        // Submitted in reverse of the delivery order.
        coalescer.submit(BatteryEvent::LowPowerModeChanged { enabled: true }, now);
        coalescer.submit(BatteryEvent::TimeToFullChanged { minutes: 30 }, now);
        coalescer.submit(BatteryEvent::MaxCapacityChanged { percent: 88 }, now);
        coalescer.submit(BatteryEvent::LevelChanged { percent: 52 }, now);
        coalescer.submit(BatteryEvent::ChargingChanged { charging: true }, now);

        let kinds: Vec<BatteryEventKind> =
            coalescer.flush().iter().map(BatteryEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                BatteryEventKind::ChargingChanged,
                BatteryEventKind::LevelChanged,
                BatteryEventKind::MaxCapacityChanged,
                BatteryEventKind::TimeToFullChanged,
                BatteryEventKind::LowPowerModeChanged,
            ]
        );
    }

    #[test]
    fn test_passthrough_returned_immediately() {
        let mut coalescer = Coalescer::new(WINDOW);
        let now = Instant::now();

        coalescer.submit(BatteryEvent::LevelChanged { percent: 50 }, now);

        let immediate =
            coalescer.submit(BatteryEvent::PowerSourceChanged { plugged_in: true }, now);
        assert_eq!(
            immediate,
            Some(BatteryEvent::PowerSourceChanged { plugged_in: true })
        );

        // The pending entry is untouched by the bypass.
        assert_eq!(
            coalescer.flush(),
            vec![BatteryEvent::LevelChanged { percent: 50 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_single_delivery() {
        let (raw_tx, raw_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        tokio::spawn(Coalescer::new(WINDOW).run(raw_rx, out_tx));

        // Three same-kind events at t=0, t=40ms, t=80ms.
        raw_tx.send(BatteryEvent::LevelChanged { percent: 50 }).await.unwrap();
        advance(Duration::from_millis(40)).await;
        raw_tx.send(BatteryEvent::LevelChanged { percent: 51 }).await.unwrap();
        advance(Duration::from_millis(40)).await;
        raw_tx.send(BatteryEvent::LevelChanged { percent: 52 }).await.unwrap();

        // Exactly one delivery, carrying the last submitted value.
        let delivered = out_rx.recv().await.unwrap();
        assert_eq!(delivered, BatteryEvent::LevelChanged { percent: 52 });

        // Nothing further: the next received event is the sentinel we send
        // after the window has fully elapsed.
        advance(WINDOW).await;
        raw_tx.send(BatteryEvent::Error { reason: "sentinel".to_string() }).await.unwrap();
        let next = out_rx.recv().await.unwrap();
        assert_eq!(next.kind(), BatteryEventKind::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_passthrough_bypasses_open_window() {
        let (raw_tx, raw_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        tokio::spawn(Coalescer::new(WINDOW).run(raw_rx, out_tx));

        raw_tx.send(BatteryEvent::LevelChanged { percent: 50 }).await.unwrap();
        advance(Duration::from_millis(10)).await;
        raw_tx.send(BatteryEvent::PowerSourceChanged { plugged_in: true }).await.unwrap();

        // The power-source change arrives before the window closes.
        let first = out_rx.recv().await.unwrap();
        assert_eq!(first, BatteryEvent::PowerSourceChanged { plugged_in: true });

        // The coalesced level still arrives at the flush.
        let second = out_rx.recv().await.unwrap();
        assert_eq!(second, BatteryEvent::LevelChanged { percent: 50 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_kinds_one_flush() {
        let (raw_tx, raw_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        tokio::spawn(Coalescer::new(WINDOW).run(raw_rx, out_tx));

        raw_tx.send(BatteryEvent::TimeToFullChanged { minutes: 25 }).await.unwrap();
        raw_tx.send(BatteryEvent::ChargingChanged { charging: true }).await.unwrap();

        // Both arrive in one flush, in kind order.
        let first = out_rx.recv().await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert_eq!(first, BatteryEvent::ChargingChanged { charging: true });
        assert_eq!(second, BatteryEvent::TimeToFullChanged { minutes: 25 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_close_flushes_pending() {
        let (raw_tx, raw_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        tokio::spawn(Coalescer::new(WINDOW).run(raw_rx, out_tx));

        raw_tx.send(BatteryEvent::LevelChanged { percent: 42 }).await.unwrap();
        drop(raw_tx);

        let delivered = out_rx.recv().await.unwrap();
        assert_eq!(delivered, BatteryEvent::LevelChanged { percent: 42 });
        assert!(out_rx.recv().await.is_none());
    }
}
