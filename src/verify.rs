// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::ValidationError;
use crate::http::HttpClient;
use crate::metadata::Episode;
use crate::progress::{ProgressEvent, SharedProgressReporter};

/// Why a probe did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeFailure {
    Timeout(Duration),
    HttpStatus(u16),
    Transport(String),
    /// The episode has no enclosure to probe
    NoEnclosure,
    Cancelled,
    /// The worker running the probe died before reporting
    Aborted,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "timed out after {}s", after.as_secs_f64()),
            Self::HttpStatus(status) => write!(f, "HTTP {status}"),
            Self::Transport(reason) => write!(f, "{reason}"),
            Self::NoEnclosure => write!(f, "episode has no enclosure"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Aborted => write!(f, "probe task aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Success { bytes: u64 },
    Failure { reason: ProbeFailure },
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// One fetch of one episode's primary enclosure through one gateway
#[derive(Debug, Clone, Serialize)]
pub struct GatewayProbeResult {
    pub gateway: String,
    pub episode_id: String,
    pub episode_title: String,
    pub content_id: Option<String>,
    pub outcome: ProbeOutcome,
    pub duration: Duration,
}

/// All probe results for a single gateway, in episode order
#[derive(Debug, Clone, Serialize)]
pub struct GatewayReport {
    pub gateway: String,
    pub results: Vec<GatewayProbeResult>,
}

impl GatewayReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &GatewayProbeResult> {
        self.results.iter().filter(|r| !r.outcome.is_success())
    }
}

/// Per-gateway breakdown of a verification run, in gateway order
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub gateways: Vec<GatewayReport>,
}

impl VerificationReport {
    pub fn gateway(&self, gateway: &str) -> Option<&GatewayReport> {
        self.gateways.iter().find(|g| g.gateway == gateway)
    }

    pub fn total(&self) -> usize {
        self.gateways.iter().map(|g| g.results.len()).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.gateways.iter().map(GatewayReport::succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Probes in flight per gateway
    pub concurrency: usize,
    pub probe_timeout: Duration,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            probe_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct ProbeJob {
    index: usize,
    episode_id: String,
    episode_title: String,
    content_id: Option<String>,
    url: Option<String>,
}

/// Checks that published enclosures resolve through public gateways
pub struct DistributionVerifier<C> {
    client: C,
    options: VerifyOptions,
    reporter: SharedProgressReporter,
    cancel: CancellationToken,
}

impl<C: HttpClient + Clone + 'static> DistributionVerifier<C> {
    pub fn new(client: C, options: VerifyOptions, reporter: SharedProgressReporter) -> Self {
        Self {
            client,
            options,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the run when cancelled. Probes not yet finished are
    /// recorded as `Cancelled`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Probe every episode's primary enclosure through every gateway.
    ///
    /// Gateways run side by side, each with its own pool of
    /// `concurrency` workers. Always yields exactly one result per
    /// (gateway, episode) pair.
    pub async fn verify(
        &self,
        gateways: &[String],
        episodes: &[Episode],
    ) -> Result<VerificationReport, ValidationError> {
        let bases = gateways
            .iter()
            .map(|g| gateway_base(g))
            .collect::<Result<Vec<_>, _>>()?;

        let runs = gateways
            .iter()
            .zip(bases)
            .map(|(gateway, base)| self.verify_gateway(gateway.clone(), base, episodes));
        let reports = join_all(runs).await;

        let report = VerificationReport { gateways: reports };
        self.reporter.report(ProgressEvent::VerificationCompleted {
            gateways: report.gateways.len(),
            succeeded: report.succeeded(),
            failed: report.failed(),
        });
        info!(
            probes = report.total(),
            succeeded = report.succeeded(),
            "Verification finished"
        );
        Ok(report)
    }

    async fn verify_gateway(
        &self,
        gateway: String,
        base: String,
        episodes: &[Episode],
    ) -> GatewayReport {
        self.reporter.report(ProgressEvent::GatewayStarting {
            gateway: gateway.clone(),
            probes: episodes.len(),
        });

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        for (index, episode) in episodes.iter().enumerate() {
            let content_id = episode.primary_enclosure().map(|e| e.content_id.clone());
            let _ = job_tx.send(ProbeJob {
                index,
                episode_id: episode.id.clone(),
                episode_title: episode.title.clone(),
                url: content_id.as_ref().map(|cid| format!("{base}/ipfs/{cid}")),
                content_id,
            });
        }
        // Workers stop once the queue is drained
        drop(job_tx);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let workers = self.options.concurrency.max(1).min(episodes.len().max(1));

        let mut handles = Vec::with_capacity(workers);
        for slot in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let client = self.client.clone();
            let reporter = self.reporter.clone();
            let cancel = self.cancel.clone();
            let gateway = gateway.clone();
            let timeout = self.options.probe_timeout;

            handles.push(tokio::spawn(async move {
                loop {
                    let job = job_rx.lock().await.recv().await;
                    let Some(job) = job else { break };

                    let index = job.index;
                    let result = probe(&client, &gateway, job, timeout, &cancel).await;
                    reporter.report(ProgressEvent::ProbeFinished {
                        gateway: gateway.clone(),
                        slot,
                        episode_title: result.episode_title.clone(),
                        success: result.outcome.is_success(),
                        detail: match &result.outcome {
                            ProbeOutcome::Success { bytes } => format!("{bytes} bytes"),
                            ProbeOutcome::Failure { reason } => reason.to_string(),
                        },
                    });

                    if result_tx.send((index, result)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut collected: Vec<Option<GatewayProbeResult>> = vec![None; episodes.len()];
        while let Some((index, result)) = result_rx.recv().await {
            collected[index] = Some(result);
        }
        for handle in handles {
            let _ = handle.await;
        }

        let results: Vec<_> = collected
            .into_iter()
            .zip(episodes)
            .map(|(result, episode)| {
                result.unwrap_or_else(|| GatewayProbeResult {
                    gateway: gateway.clone(),
                    episode_id: episode.id.clone(),
                    episode_title: episode.title.clone(),
                    content_id: episode.primary_enclosure().map(|e| e.content_id.clone()),
                    outcome: ProbeOutcome::Failure {
                        reason: ProbeFailure::Aborted,
                    },
                    duration: Duration::ZERO,
                })
            })
            .collect();

        let report = GatewayReport { gateway, results };
        self.reporter.report(ProgressEvent::GatewayFinished {
            gateway: report.gateway.clone(),
            succeeded: report.succeeded(),
            failed: report.failed(),
        });
        report
    }
}

async fn probe<C: HttpClient>(
    client: &C,
    gateway: &str,
    job: ProbeJob,
    timeout: Duration,
    cancel: &CancellationToken,
) -> GatewayProbeResult {
    let started = Instant::now();

    let outcome = match &job.url {
        None => Err(ProbeFailure::NoEnclosure),
        Some(_) if cancel.is_cancelled() => Err(ProbeFailure::Cancelled),
        Some(url) => {
            tokio::select! {
                _ = cancel.cancelled() => Err(ProbeFailure::Cancelled),
                fetched = tokio::time::timeout(timeout, fetch(client, url)) => {
                    fetched.unwrap_or(Err(ProbeFailure::Timeout(timeout)))
                }
            }
        }
    };

    let outcome = match outcome {
        Ok(bytes) => ProbeOutcome::Success { bytes },
        Err(reason) => {
            debug!(gateway, url = ?job.url, %reason, "Probe failed");
            ProbeOutcome::Failure { reason }
        }
    };

    GatewayProbeResult {
        gateway: gateway.to_string(),
        episode_id: job.episode_id,
        episode_title: job.episode_title,
        content_id: job.content_id,
        outcome,
        duration: started.elapsed(),
    }
}

/// Download the whole body, discarding it, and count the bytes
async fn fetch<C: HttpClient>(client: &C, url: &str) -> Result<u64, ProbeFailure> {
    let response = client
        .get_stream(url)
        .await
        .map_err(|e| ProbeFailure::Transport(e.to_string()))?;

    if response.status >= 400 {
        return Err(ProbeFailure::HttpStatus(response.status));
    }

    let mut body = response.body;
    let mut bytes: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| ProbeFailure::Transport(e.to_string()))?;
        bytes += chunk.len() as u64;
    }
    Ok(bytes)
}

/// Base URL for a gateway given as a bare host (`ipfs.io`, https assumed)
/// or with an explicit scheme (`http://127.0.0.1:8080`)
pub fn gateway_base(gateway: &str) -> Result<String, ValidationError> {
    let gateway = gateway.trim();
    let base = if gateway.contains("://") {
        gateway.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", gateway.trim_end_matches('/'))
    };

    let invalid = |reason: String| ValidationError::InvalidGateway {
        gateway: gateway.to_string(),
        reason,
    };
    let parsed = Url::parse(&base).map_err(|e| invalid(e.to_string()))?;
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(base)
}
