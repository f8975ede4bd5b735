//! In-memory lossy link between two session drivers.

use std::time::Duration;

use bytes::Bytes;
use duelsync_core::TransportEvent;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::trace;

/// How long a held-back packet waits for a successor before it is released.
const HOLD_TIMEOUT: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy)]
pub struct LinkProfile {
    pub drop_rate: f64,
    pub reorder_rate: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LinkStats {
    pub forwarded: u64,
    pub dropped: u64,
    pub reordered: u64,
}

/// Forward packets from `outbox` to `to`, dropping and swapping adjacent
/// packets at the configured rates. Returns the totals once either end
/// closes.
pub async fn run_link(
    name: &'static str,
    mut outbox: mpsc::Receiver<Bytes>,
    to: mpsc::Sender<TransportEvent>,
    profile: LinkProfile,
    seed: u64,
) -> LinkStats {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut stats = LinkStats::default();
    let mut held: Option<Bytes> = None;

    loop {
        let next = match held {
            Some(_) => match timeout(HOLD_TIMEOUT, outbox.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    if let Some(bytes) = held.take() {
                        if deliver(&to, bytes, &mut stats).await.is_err() {
                            break;
                        }
                    }
                    continue;
                }
            },
            None => outbox.recv().await,
        };
        let Some(bytes) = next else {
            break;
        };

        if rng.random_bool(profile.drop_rate) {
            trace!(link = name, len = bytes.len(), "Dropping packet");
            stats.dropped += 1;
            continue;
        }
        if held.is_none() && rng.random_bool(profile.reorder_rate) {
            trace!(link = name, "Holding packet back");
            held = Some(bytes);
            continue;
        }

        if deliver(&to, bytes, &mut stats).await.is_err() {
            break;
        }
        if let Some(late) = held.take() {
            stats.reordered += 1;
            if deliver(&to, late, &mut stats).await.is_err() {
                break;
            }
        }
    }
    stats
}

async fn deliver(
    to: &mpsc::Sender<TransportEvent>,
    bytes: Bytes,
    stats: &mut LinkStats,
) -> Result<(), ()> {
    to.send(TransportEvent::Message(bytes))
        .await
        .map_err(|_| ())?;
    stats.forwarded += 1;
    Ok(())
}
