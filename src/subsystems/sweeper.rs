use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{debug, info};

use crate::services::sessions::SessionManager;

/// Periodically drops sessions whose browser went away without closing them.
#[derive(Builder)]
pub struct SessionSweeper {
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) idle_timeout: Duration,
    #[builder(default = Duration::from_secs(60))]
    pub(crate) interval: Duration,
}

impl SessionSweeper {
    /// One pass over the session table; returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let evicted = self.sessions.evict_idle(self.idle_timeout);
        debug!(evicted, remaining = self.sessions.len(), "sweeper: pass done");
        evicted
    }

    pub async fn run(self, subsys: SubsystemHandle) -> std::io::Result<()> {
        info!(
            idle_timeout_secs = self.idle_timeout.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Starting session sweeper subsystem"
        );

        // tokio::time::interval паникует на нулевом периоде
        let period = self.interval.max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        // первый тик срабатывает сразу
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    info!("Session sweeper cancelled by shutdown");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::chat_api::{BoxError, ChatApi, GenerateRequest};
    use async_trait::async_trait;
    use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

    struct Silent;

    #[async_trait]
    impl ChatApi for Silent {
        async fn generate(&self, _request: GenerateRequest) -> Result<String, BoxError> {
            Ok(String::new())
        }

        fn provider_name(&self) -> &str {
            "silent"
        }
    }

    #[test]
    fn sweep_evicts_only_idle_sessions() {
        let sessions = Arc::new(SessionManager::new(Arc::new(Silent), None, false));
        sessions.create();
        sessions.create();

        let keep = SessionSweeper::builder()
            .sessions(Arc::clone(&sessions))
            .idle_timeout(Duration::from_secs(3600))
            .build();
        assert_eq!(keep.sweep(), 0);
        assert_eq!(sessions.len(), 2);

        let drop_all = SessionSweeper::builder()
            .sessions(Arc::clone(&sessions))
            .idle_timeout(Duration::ZERO)
            .build();
        assert_eq!(drop_all.sweep(), 2);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn sweeper_stops_when_shutdown_is_requested() {
        let sessions = Arc::new(SessionManager::new(Arc::new(Silent), None, false));
        sessions.create();
        let sweeper = SessionSweeper::builder()
            .sessions(Arc::clone(&sessions))
            .idle_timeout(Duration::ZERO)
            .interval(Duration::from_millis(10))
            .build();

        let result = Toplevel::new(|s: SubsystemHandle| async move {
            s.start(SubsystemBuilder::new("session-sweeper", |h| sweeper.run(h)));
            s.start(SubsystemBuilder::new("stopper", |h: SubsystemHandle| async move {
                // период зажат до секунды, ждём один проход
                tokio::time::sleep(Duration::from_millis(1200)).await;
                h.request_shutdown();
                Ok::<(), BoxError>(())
            }));
        })
        .handle_shutdown_requests(Duration::from_secs(2))
        .await;

        assert!(result.is_ok(), "{:?}", result.err());
        assert!(sessions.is_empty());
    }
}
