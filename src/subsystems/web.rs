use anyhow::{Context, Result};
use axum::Router;
use bon::Builder;
use tokio::net::TcpListener;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::info;

/// Serves the chat UI until shutdown is requested.
#[derive(Builder)]
pub struct WebSubsystem {
    pub(crate) listener: TcpListener,
    pub(crate) router: Router,
}

impl WebSubsystem {
    pub async fn run(self, subsys: SubsystemHandle) -> Result<()> {
        let addr = self.listener.local_addr().context("listener has no local address")?;
        info!(%addr, "Starting web subsystem");

        // axum доводит открытые ответы до конца, новые соединения не принимает
        let token = subsys.create_cancellation_token();
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .with_context(|| format!("http server on {} failed", addr))?;

        info!("Web subsystem stopped");
        Ok(())
    }
}
