//! LND REST client
//!
//! Talks to LND's REST gateway. Unary calls share one pooled
//! `reqwest::Client`, so a single `LndClient` can serve every concurrent
//! attempt of a broadcast.

use super::wire::{self, ChannelGraph, GetInfoResponse, ListPaymentsResponse, SendPaymentRequest};
use super::{GraphNode, KeysendRequest, NodeInfo, PaymentNode, PaymentPage, PaymentUpdateStream};
use crate::{config::NodeConfig, SatogramError, SatogramResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::io;
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

const MACAROON_HEADER: &str = "grpc-metadata-macaroon";

fn map_client_error(e: reqwest::Error) -> SatogramError {
    SatogramError::Transport(format!("LND request failed: {}", e))
}

/// REST client for an LND node
#[derive(Clone)]
pub struct LndClient {
    /// The underlying HTTP client, carrying the macaroon header
    http: reqwest::Client,
    /// Base URL, `https://host:port`
    base_url: String,
    /// Timeout for unary requests
    request_timeout: Duration,
}

impl LndClient {
    /// Build a client from the node configuration.
    ///
    /// Fails with a transport error if the macaroon cannot be read. The TLS
    /// certificate is trusted as a root when present and non-empty; otherwise
    /// the system roots are used.
    pub async fn connect(config: &NodeConfig) -> SatogramResult<Self> {
        let base_url = if config.host.starts_with("http://") || config.host.starts_with("https://") {
            config.host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", config.host.trim_end_matches('/'))
        };

        info!("Connecting to LND at {} ({})", base_url, config.network);

        let macaroon = tokio::fs::read(&config.macaroon_path).await.map_err(|e| {
            SatogramError::Transport(format!(
                "Failed to read macaroon {}: {}",
                config.macaroon_path.display(),
                e
            ))
        })?;
        debug!("Loaded macaroon ({} bytes)", macaroon.len());

        let mut headers = HeaderMap::new();
        let mut macaroon_value = HeaderValue::from_str(&hex::encode(&macaroon))
            .map_err(|e| SatogramError::Transport(format!("Invalid macaroon header: {}", e)))?;
        macaroon_value.set_sensitive(true);
        headers.insert(MACAROON_HEADER, macaroon_value);

        let mut builder = reqwest::Client::builder().default_headers(headers);

        match tokio::fs::read(&config.tls_cert_path).await {
            Ok(pem) if !pem.is_empty() => {
                debug!("Using TLS certificate: {:?}", config.tls_cert_path);
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| SatogramError::Transport(format!("Invalid TLS certificate: {}", e)))?;
                builder = builder.add_root_certificate(cert);
            }
            _ => {
                debug!(
                    "No TLS certificate at {:?}, using system roots",
                    config.tls_cert_path
                );
            }
        }

        let http = builder.build().map_err(map_client_error)?;

        Ok(Self {
            http,
            base_url,
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
        })
    }

    /// Check that the node answers authenticated requests
    pub async fn ping(&self) -> SatogramResult<NodeInfo> {
        let info = self.get_info().await.map_err(|e| {
            SatogramError::Transport(format!("Node unreachable: {}", e))
        })?;
        info!(
            "Connected to node {} ({}) at height {}",
            info.alias, info.identity_pubkey, info.block_height
        );
        Ok(info)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> SatogramResult<T> {
        let response = self
            .http
            .get(self.url(path))
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_client_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SatogramError::Transport(format!(
                "LND returned {} for {}: {}",
                status, path, text
            )));
        }

        response.json().await.map_err(map_client_error)
    }
}

#[async_trait]
impl PaymentNode for LndClient {
    async fn get_info(&self) -> SatogramResult<NodeInfo> {
        debug!("Getting node info");
        let response: GetInfoResponse = self.get_json("/v1/getinfo", &[]).await?;
        Ok(response.into())
    }

    async fn describe_graph(&self) -> SatogramResult<Vec<GraphNode>> {
        debug!("Describing channel graph");
        let graph: ChannelGraph = self
            .get_json("/v1/graph", &[("include_unannounced", "true".to_string())])
            .await?;
        let nodes = graph.into_nodes();
        debug!("Graph has {} nodes", nodes.len());
        Ok(nodes)
    }

    async fn send_keysend(&self, request: KeysendRequest) -> SatogramResult<PaymentUpdateStream> {
        debug!(
            "Sending keysend: dest={}, amount={} sats, fee_limit={} sats",
            request.dest, request.amount_sats, request.fee_limit_sat
        );

        // No request timeout here: the stream lives as long as the payment,
        // which the node bounds with `timeout_seconds`.
        let response = self
            .http
            .post(self.url("/v2/router/send"))
            .json(&SendPaymentRequest::from(&request))
            .send()
            .await
            .map_err(map_client_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SatogramError::Transport(format!(
                "LND rejected payment to {}: {} {}",
                request.dest, status, text
            )));
        }

        Ok(update_stream(response.bytes_stream()))
    }

    async fn list_payments(&self, index_offset: u64, max_payments: u64) -> SatogramResult<PaymentPage> {
        debug!("Listing payments from offset {}", index_offset);
        let response: ListPaymentsResponse = self
            .get_json(
                "/v1/payments",
                &[
                    ("include_incomplete", "false".to_string()),
                    ("index_offset", index_offset.to_string()),
                    ("max_payments", max_payments.to_string()),
                ],
            )
            .await?;
        Ok(response.into_page())
    }
}

/// Longest status line accepted from the send-payment stream
const MAX_UPDATE_LINE: usize = 1024 * 1024;

/// Frame a streamed response body into newline-delimited status updates.
///
/// Blank keep-alive lines are skipped. A read error ends the feed with a
/// [`SatogramError::Stream`].
fn update_stream<S, E>(body: S) -> PaymentUpdateStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let reader = StreamReader::new(body.map(|chunk| chunk.map_err(io::Error::other)));

    FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_UPDATE_LINE))
        .filter_map(|line| async move {
            match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(wire::decode_update_line(line.as_bytes())),
                Err(e) => Some(Err(SatogramError::Stream(e.to_string()))),
            }
        })
        .boxed()
}
