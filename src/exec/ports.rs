// src/exec/ports.rs

//! Host-port availability polling.

use std::time::Duration;

use anyhow::{bail, Result};
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Block until `port` can be bound on localhost.
///
/// A previous incarnation of a task may still be letting go of its port;
/// polling keeps restarts from failing spuriously. Returns an error when the
/// token is tripped while waiting.
pub async fn wait_port_free(port: u16, token: &CancellationToken) -> Result<()> {
    loop {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                drop(listener);
                return Ok(());
            }
            Err(_) => {
                tokio::select! {
                    _ = token.cancelled() => bail!("cancelled while waiting for port {port}"),
                    _ = sleep(POLL_INTERVAL) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn returns_once_the_port_is_released() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let token = CancellationToken::new();

        let waiter = tokio::spawn({
            let token = token.clone();
            async move { wait_port_free(port, &token).await }
        });

        // Occupied: the waiter must still be polling.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!waiter.is_finished());

        drop(listener);
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn cancellation_aborts_the_wait() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let token = CancellationToken::new();
        token.cancel();

        let err = wait_port_free(port, &token).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
