mod client;

use crate::model::{FetchConfig, FetchEvent, InfoEvent, RawResponse};
use anyhow::{Context, Result};
use futures::{stream, StreamExt};
use tokio::sync::mpsc;

pub(crate) use client::{box_plot_url, AnalyticsClient};

/// Decode a box-plot document body.
pub fn decode_document(body: &[u8]) -> Result<RawResponse> {
    serde_json::from_slice(body).context("decode box-plot document")
}

pub struct FetchEngine {
    cfg: FetchConfig,
}

impl FetchEngine {
    pub fn new(cfg: FetchConfig) -> Self {
        Self { cfg }
    }

    /// Fetch and decode one backtest's box-plot data, reporting progress on `event_tx`.
    pub async fn run(self, event_tx: &mpsc::UnboundedSender<FetchEvent>) -> Result<RawResponse> {
        let backtest_id = self.cfg.backtest_id.clone();
        let result = self.fetch(event_tx).await;
        if let Err(e) = &result {
            let message = format!("{e:#}");
            tracing::warn!(%backtest_id, error = %message, "box-plot fetch failed");
            let _ = event_tx.send(FetchEvent::Failed {
                backtest_id,
                message,
            });
        }
        result
    }

    async fn fetch(&self, event_tx: &mpsc::UnboundedSender<FetchEvent>) -> Result<RawResponse> {
        let client = AnalyticsClient::new(&self.cfg)?;
        if !client.is_authenticated() {
            let _ = event_tx.send(FetchEvent::Info(InfoEvent::UnauthenticatedRequest));
        }

        let _ = event_tx.send(FetchEvent::Started {
            backtest_id: client.backtest_id.clone(),
            url: client.url().to_string(),
        });

        let body = client.fetch_box_plot_data().await?;
        let raw = decode_document(&body)?;
        tracing::info!(
            backtest_id = %client.backtest_id,
            bytes = body.len(),
            groups = raw.groups.len(),
            "box-plot data fetched"
        );
        if raw.groups.is_empty() {
            let _ = event_tx.send(FetchEvent::Info(InfoEvent::Message(format!(
                "Backtest {} returned no groups",
                client.backtest_id
            ))));
        }

        let _ = event_tx.send(FetchEvent::Completed {
            backtest_id: client.backtest_id.clone(),
            bytes: body.len(),
        });
        Ok(raw)
    }
}

/// Fetch several backtests with at most `concurrency` requests in flight.
///
/// Results are returned in the same order as `configs`, paired with their backtest id.
pub async fn fetch_many(
    configs: Vec<FetchConfig>,
    concurrency: usize,
    event_tx: &mpsc::UnboundedSender<FetchEvent>,
) -> Vec<(String, Result<RawResponse>)> {
    stream::iter(configs)
        .map(|cfg| async move {
            let id = cfg.backtest_id.clone();
            let res = FetchEngine::new(cfg).run(event_tx).await;
            (id, res)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}
