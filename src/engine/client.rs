use crate::model::FetchConfig;
use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;

const BOX_PLOT_PATH: &str = "api/dashboard/backtest/get_box_plot_data/";

/// Build `{base_url}/api/dashboard/backtest/get_box_plot_data/?backtest_id={id}`.
pub(crate) fn box_plot_url(cfg: &FetchConfig) -> Result<Url> {
    // Url::join drops the last path segment unless it ends with '/'.
    let mut base = cfg.base_url.clone();
    if !base.ends_with('/') {
        base.push('/');
    }
    let base_url =
        Url::parse(&base).with_context(|| format!("invalid base url {}", cfg.base_url))?;
    let mut url = base_url
        .join(BOX_PLOT_PATH)
        .with_context(|| format!("invalid base url {}", cfg.base_url))?;
    url.query_pairs_mut()
        .append_pair("backtest_id", &cfg.backtest_id);
    Ok(url)
}

/// HTTP client for the backtest analytics endpoint.
pub(crate) struct AnalyticsClient {
    http: reqwest::Client,
    url: Url,
    pub backtest_id: String,
    authenticated: bool,
}

impl AnalyticsClient {
    pub fn new(cfg: &FetchConfig) -> Result<Self> {
        let url = box_plot_url(cfg)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = cfg.bearer_token.as_deref() {
            let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("bearer token contains characters not allowed in a header")?;
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
        }

        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .default_headers(headers)
            .timeout(cfg.timeout)
            .build()
            .context("build http client")?;

        Ok(Self {
            http,
            url,
            backtest_id: cfg.backtest_id.clone(),
            authenticated: cfg.bearer_token.is_some(),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// GET the box-plot document and return the raw body.
    pub async fn fetch_box_plot_data(&self) -> Result<Bytes> {
        tracing::debug!(url = %self.url, "requesting box-plot data");
        let resp = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .context("request box-plot data")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP error! status: {}", status.as_u16());
        }
        resp.bytes().await.context("read box-plot response body")
    }
}
