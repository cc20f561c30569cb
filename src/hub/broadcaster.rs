use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::HubConfig;
use crate::metrics::{BROADCAST_ROUND_DURATION, DELIVERY_FAILURES, MESSAGES_DELIVERED, MESSAGES_PUBLISHED};

use super::{ConnectionHandle, ConnectionRegistry, Envelope, ForwardError, Payload};

/// Counters for the broadcaster, exposed through the stats endpoint.
#[derive(Debug, Default)]
pub struct HubStats {
    /// Messages accepted onto the intake queue
    pub published: AtomicU64,
    /// Successful per-recipient deliveries
    pub delivered: AtomicU64,
    /// Per-recipient write failures (any reason)
    pub write_failures: AtomicU64,
    /// Recipients disconnected for not draining their outbound buffer
    pub slow_disconnects: AtomicU64,
}

impl HubStats {
    pub fn snapshot(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            slow_disconnects: self.slow_disconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`HubStats`].
#[derive(Debug, Clone, Serialize)]
pub struct HubStatsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub write_failures: u64,
    pub slow_disconnects: u64,
}

/// Publisher half of the hub: accepts messages from connection readers and
/// places them on the bounded intake queue.
#[derive(Clone)]
pub struct Broadcaster {
    tx: mpsc::Sender<Envelope>,
    stats: Arc<HubStats>,
}

impl Broadcaster {
    /// Build the broadcaster pair: a cloneable publisher handle and the
    /// fan-out task that drains the intake queue. The task runs for the
    /// process lifetime; spawn it exactly once.
    pub fn channel(registry: Arc<ConnectionRegistry>, config: HubConfig) -> (Broadcaster, FanoutTask) {
        let (tx, rx) = mpsc::channel(config.intake_capacity);
        let stats = Arc::new(HubStats::default());

        (
            Broadcaster {
                tx,
                stats: stats.clone(),
            },
            FanoutTask {
                rx,
                registry,
                echo_to_sender: config.echo_to_sender,
                stats,
            },
        )
    }

    /// Queue a message for delivery to the other live connections.
    ///
    /// Waits for intake capacity when the hub is saturated, which slows
    /// down only the client that is flooding it. Delivery failures to
    /// individual recipients are never reported back here. The queue only
    /// closes once the fan-out task has stopped, at which point the
    /// message is dropped and logged.
    pub async fn publish(&self, origin: Uuid, payload: Payload) {
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        MESSAGES_PUBLISHED.inc();

        let envelope = Envelope {
            origin,
            payload: Arc::new(payload),
        };
        if self.tx.send(envelope).await.is_err() {
            tracing::warn!(origin = %origin, "Fan-out loop stopped, dropping message");
        }
    }

    pub fn stats(&self) -> HubStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Consumer half of the hub: the single long-lived task that drains the
/// intake queue and fans each message out to the registry.
///
/// Being the sole consumer, it imposes one total order on all broadcasts;
/// messages from one connection keep their relative order because the
/// reader publishes them sequentially.
pub struct FanoutTask {
    rx: mpsc::Receiver<Envelope>,
    registry: Arc<ConnectionRegistry>,
    echo_to_sender: bool,
    stats: Arc<HubStats>,
}

impl FanoutTask {
    /// Run until every publisher handle has been dropped.
    pub async fn run(mut self) {
        tracing::info!(echo_to_sender = self.echo_to_sender, "Fan-out loop started");

        while let Some(envelope) = self.rx.recv().await {
            self.fan_out(envelope);
        }

        tracing::info!("Fan-out loop stopped");
    }

    /// One broadcast round: deliver a single message to the registry
    /// members observed at round start. An empty registry is a valid round
    /// that delivers to no one.
    ///
    /// The round never awaits, so a recipient can be removed before or
    /// after its enqueue, never during one.
    fn fan_out(&self, envelope: Envelope) {
        let members = self.registry.snapshot();
        let timer = BROADCAST_ROUND_DURATION.start_timer();

        for conn in &members {
            if !self.echo_to_sender && conn.id == envelope.origin {
                continue;
            }

            match conn.try_forward(envelope.payload.clone()) {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    MESSAGES_DELIVERED.inc();
                }
                Err(reason) => self.drop_recipient(conn, reason),
            }
        }

        timer.observe_duration();
    }

    /// A failed write is terminal for that recipient only: deregister it
    /// and tell its writer task to shut down, then carry on with the rest
    /// of the round.
    fn drop_recipient(&self, conn: &Arc<ConnectionHandle>, reason: ForwardError) {
        self.stats.write_failures.fetch_add(1, Ordering::Relaxed);

        let label = match reason {
            ForwardError::BufferFull => {
                self.stats.slow_disconnects.fetch_add(1, Ordering::Relaxed);
                "buffer_full"
            }
            ForwardError::Closed => "closed",
        };
        DELIVERY_FAILURES.with_label_values(&[label]).inc();

        tracing::warn!(
            connection_id = %conn.id,
            reason = %reason,
            "Dropping recipient after failed write"
        );

        self.registry.remove(conn.id);
        conn.close();
    }
}
