use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::{task::JoinHandle, time::Instant};

use crate::config::HeartbeatConfig;

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct HeartbeatRequest<'a> {
    data: &'a str,
}

/// Start the keep-alive ping. Returns `None` when no target is configured.
pub fn spawn(config: HeartbeatConfig) -> Option<JoinHandle<()>> {
    let url = config.url?;
    let client = match Client::builder().timeout(HEARTBEAT_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, "heartbeat client init failed");
            return None;
        }
    };
    tracing::info!(url = %url, interval_secs = config.interval.as_secs(), "heartbeat enabled");

    Some(tokio::spawn(async move {
        // First ping after one full interval, not at startup.
        let mut ticker = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(err) = send_heartbeat(&client, &url).await {
                tracing::warn!(event = "heartbeat_failed", error = %err);
            }
        }
    }))
}

pub async fn send_heartbeat(client: &Client, url: &str) -> Result<(), reqwest::Error> {
    let response = client
        .post(url)
        .json(&HeartbeatRequest {
            data: "Server is running",
        })
        .send()
        .await?
        .error_for_status()?;

    tracing::debug!(status = response.status().as_u16(), "heartbeat sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use tokio::sync::mpsc;

    async fn record(
        State(seen): State<mpsc::Sender<serde_json::Value>>,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        let _ = seen.send(body).await;
        StatusCode::OK
    }

    async fn target(status: StatusCode) -> (String, mpsc::Receiver<serde_json::Value>) {
        let (tx, rx) = mpsc::channel(4);
        let app = Router::new()
            .route("/", post(record))
            .route("/down", post(move || async move { status }))
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), rx)
    }

    #[tokio::test]
    async fn posts_running_payload() {
        let (base, mut seen) = target(StatusCode::OK).await;
        let client = Client::new();

        send_heartbeat(&client, &format!("{base}/")).await.unwrap();
        assert_eq!(
            seen.recv().await,
            Some(serde_json::json!({"data": "Server is running"}))
        );
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let (base, _seen) = target(StatusCode::SERVICE_UNAVAILABLE).await;
        let client = Client::new();

        let err = send_heartbeat(&client, &format!("{base}/down"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(reqwest::StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn disabled_without_url() {
        let config = HeartbeatConfig {
            url: None,
            interval: Duration::from_secs(1),
        };
        assert!(spawn(config).is_none());
    }
}
