/// Periodic settlement of expired listings. Holds no state between runs:
/// each cycle re-derives its work set from the store, so restarts lose no
/// progress.
// region:    --- Imports
use crate::service::AuctionService;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

// endregion: --- Imports

// region:    --- Expiry Sweeper

pub struct ExpirySweeper {
    service: Arc<AuctionService>,
}

impl ExpirySweeper {
    pub fn new(service: Arc<AuctionService>) -> Self {
        Self { service }
    }

    /// Spawn the sweep loop on the runtime.
    pub fn start(&self) {
        let service = Arc::clone(&self.service);
        let period = service.config().sweep_interval_seconds;
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(period));
            loop {
                interval.tick().await;
                if let Err(e) = Self::sweep_once(&service).await {
                    error!("{:<12} --> sweep cycle failed: {}", "Sweeper", e);
                }
            }
        });
    }

    /// One scan-and-settle cycle. Batched so a backlog never turns into one
    /// unbounded pass; per-listing failures are logged and left for the next
    /// cycle, which re-runs their idempotent settlement steps.
    pub async fn sweep_once(
        service: &AuctionService,
    ) -> Result<SweepReport, crate::error::AuctionError> {
        let batch_size = service.config().sweep_batch_size;
        let mut report = SweepReport::default();

        // Terminal listings whose settlement side effects did not all land
        // get those steps re-run first; every step is keyed per listing, so
        // work that already applied is a no-op.
        for listing in service.find_unfinalized(batch_size).await? {
            match service.finalize_settlement(&listing).await {
                Ok(()) => report.repaired += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "{:<12} --> finalization of listing {} failed: {}",
                        "Sweeper", listing.id, e
                    );
                }
            }
        }

        loop {
            let batch = service.find_expired(Utc::now(), batch_size).await?;
            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len() as i64;

            let mut settled_in_batch = 0;
            for listing in &batch {
                match service.settle_expired(listing).await {
                    Ok(_) => {
                        settled_in_batch += 1;
                        report.settled += 1;
                    }
                    Err(e) => {
                        report.failed += 1;
                        error!(
                            "{:<12} --> settlement of listing {} failed: {}",
                            "Sweeper", listing.id, e
                        );
                    }
                }
            }

            // A partial or fully-failed batch means the remaining work set
            // still contains the failures; stop rather than spin on them.
            if settled_in_batch == 0 || batch_len < batch_size {
                break;
            }
        }

        if report.settled > 0 || report.repaired > 0 || report.failed > 0 {
            info!(
                "{:<12} --> sweep done: {} settled, {} repaired, {} failed",
                "Sweeper", report.settled, report.repaired, report.failed
            );
        } else {
            debug!("{:<12} --> sweep done: nothing expired", "Sweeper");
        }
        Ok(report)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub settled: u64,
    pub repaired: u64,
    pub failed: u64,
}

// endregion: --- Expiry Sweeper
