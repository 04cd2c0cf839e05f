// src/net/readiness.rs
//! TCP readiness probe
//!
//! Connection refused and connect timeouts are the expected state while a
//! server boots. They are logged and retried, never returned as errors; only
//! exhausting the attempt budget produces a negative answer.

use crate::observability::names;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Bounded-retry TCP connect probe
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    /// Maximum connect attempts
    pub max_attempts: u32,

    /// Pause between failed attempts
    pub attempt_interval: Duration,

    /// Limit on a single connect
    pub connect_timeout: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            attempt_interval: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

impl ReadinessProbe {
    pub fn new(max_attempts: u32, attempt_interval: Duration, connect_timeout: Duration) -> Self {
        Self {
            max_attempts,
            attempt_interval,
            connect_timeout,
        }
    }

    /// Poll `localhost:port` until a connect succeeds or attempts run out
    pub async fn await_ready(&self, port: u16) -> bool {
        debug!(port, max_attempts = self.max_attempts, "probing server readiness");

        for attempt in 1..=self.max_attempts {
            metrics::counter!(names::READINESS_ATTEMPTS).increment(1);

            if self.try_connect(port).await {
                info!(port, attempt, "server reachable");
                return true;
            }

            debug!(port, "Attempt {}/{} failed", attempt, self.max_attempts);
            if attempt < self.max_attempts {
                tokio::time::sleep(self.attempt_interval).await;
            }
        }

        warn!(port, attempts = self.max_attempts, "server not reachable");
        false
    }

    async fn try_connect(&self, port: u16) -> bool {
        match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((Ipv4Addr::LOCALHOST, port)),
        )
        .await
        {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(port, error = %e, "connect failed");
                false
            }
            Err(_) => {
                debug!(port, "connect timed out");
                false
            }
        }
    }
}
