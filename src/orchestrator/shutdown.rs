// src/orchestrator/shutdown.rs
//! Process-signal hook for a single run

use crate::utils::errors::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels a token on SIGINT or SIGTERM. Removed when dropped.
pub struct ShutdownHook {
    task: JoinHandle<()>,
}

impl ShutdownHook {
    pub fn install(token: CancellationToken) -> Result<Self> {
        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;

        let task = tokio::spawn(async move {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
                _ = token.cancelled() => return,
            };
            warn!(signal = name, "Received shutdown signal, cleaning up...");
            token.cancel();
        });

        info!("shutdown hook installed");
        Ok(Self { task })
    }
}

impl Drop for ShutdownHook {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_hook_exits_when_token_cancelled() {
        let token = CancellationToken::new();
        let hook = ShutdownHook::install(token.clone()).unwrap();

        token.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(hook.task.is_finished());
    }

    #[tokio::test]
    async fn test_drop_removes_hook() {
        let token = CancellationToken::new();
        drop(ShutdownHook::install(token.clone()).unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!token.is_cancelled());
    }
}
