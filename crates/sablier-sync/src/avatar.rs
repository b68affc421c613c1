//! Throttled, coalesced avatar download scheduling.
//!
//! A bulk multi-device sync can trigger dozens of avatar-change
//! detections in quick succession; repeated schedule requests within a
//! 250 ms window collapse into a single batch dispatch, deduplicated by
//! owner. This is a design requirement of the merge pipeline, not an
//! optimization.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use sablier_shared::constants::AVATAR_THROTTLE_MS;

/// One requested avatar download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Prefixed hex id of the profile/group the picture belongs to.
    pub owner: String,
    pub url: String,
    pub key: Vec<u8>,
}

/// Handle for scheduling downloads into the coalescing loop.
#[derive(Clone)]
pub struct AvatarScheduler {
    tx: mpsc::UnboundedSender<DownloadRequest>,
}

impl AvatarScheduler {
    /// Spawn the coalescing loop. `dispatch` receives each batch; batches
    /// contain at most one request per owner.
    pub fn spawn<F>(mut dispatch: F) -> Self
    where
        F: FnMut(Vec<DownloadRequest>) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<DownloadRequest>();

        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut batch = vec![first];

                // Collect everything scheduled inside the window.
                let window = tokio::time::sleep(Duration::from_millis(AVATAR_THROTTLE_MS));
                tokio::pin!(window);
                loop {
                    tokio::select! {
                        _ = &mut window => break,
                        next = rx.recv() => match next {
                            Some(request) => batch.push(request),
                            None => break,
                        },
                    }
                }

                // Dedup by owner, first request wins.
                let mut seen = HashSet::new();
                batch.retain(|r| seen.insert(r.owner.clone()));

                debug!(count = batch.len(), "dispatching avatar download batch");
                dispatch(batch);
            }
        });

        Self { tx }
    }

    /// Queue a download. Returns `false` if the loop has shut down.
    pub fn schedule(&self, request: DownloadRequest) -> bool {
        self.tx.send(request).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(owner: &str) -> DownloadRequest {
        DownloadRequest {
            owner: owner.to_string(),
            url: format!("https://files.example.org/{owner}"),
            key: vec![1; 32],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_within_window_coalesce() {
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();
        let scheduler = AvatarScheduler::spawn(move |batch| {
            batch_tx.send(batch).unwrap();
        });

        // Three schedules in quick succession, one owner repeated.
        assert!(scheduler.schedule(request("05aa")));
        assert!(scheduler.schedule(request("05bb")));
        assert!(scheduler.schedule(request("05aa")));

        let batch = batch_rx.recv().await.expect("one batch");
        assert_eq!(batch.len(), 2);
        let owners: Vec<_> = batch.iter().map(|r| r.owner.as_str()).collect();
        assert_eq!(owners, vec!["05aa", "05bb"]);

        // A later request lands in its own batch.
        scheduler.schedule(request("05cc"));
        let batch = batch_rx.recv().await.expect("second batch");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].owner, "05cc");
    }
}
