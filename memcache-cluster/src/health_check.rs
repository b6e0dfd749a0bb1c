use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use memcache_protocol::WireProtocol;

use crate::server_pool::PoolInner;

/// The periodic dead node probe of one pool. Holds only a weak reference so a dropped pool
/// ends the task too.
#[derive(Debug)]
pub(crate) struct HealthCheck {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthCheck {
    pub(crate) fn spawn<W>(pool: Weak<PoolInner<W>>, interval: Duration) -> Self
    where
        W: WireProtocol,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(pool) = pool.upgrade() else {
                            break;
                        };
                        pool.health_check().await;
                    }
                }
            }
            debug!("health check of {} pool stopped", W::name());
        });
        Self { token, handle }
    }

    pub(crate) async fn stop(self) {
        self.token.cancel();
        if let Err(error) = self.handle.await {
            debug!("health check task ended abnormally: {}", error);
        }
    }
}
