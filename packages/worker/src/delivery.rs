//! Parallel delivery of one request to many competitor endpoints.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::retry::{FibonacciBackoff, RetryError, retry};
use common::team::DeliveryTarget;
use futures::future::join_all;
use reqwest::{Client, Method, header};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::DeliveryConfig;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("delivery failed for {} target(s): {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<(uuid::Uuid, String)>),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

fn join_errors(errors: &[(uuid::Uuid, String)]) -> String {
    errors
        .iter()
        .map(|(team, err)| format!("{team}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// One request to fan out.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub method: Method,
    pub route: String,
    pub payload: Option<Vec<u8>>,
    pub deadline: DateTime<Utc>,
}

pub struct DeliveryEngine {
    client: Client,
    initial: Duration,
    max_delay: Duration,
    grace: Duration,
}

const MAX_DIAGNOSTIC_BODY: usize = 2048;

impl DeliveryEngine {
    pub fn new(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DeliveryError::Client(e.to_string()))?;
        Ok(Self {
            client,
            initial: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_secs(config.max_backoff_secs),
            grace: Duration::from_secs(config.grace_secs),
        })
    }

    /// Deliver to every target in parallel. `finisher` is called once per
    /// target with the number of retries and the final error, if any.
    #[instrument(skip_all, fields(method = %delivery.method, route = %delivery.route, targets = targets.len()))]
    pub async fn deliver<F>(
        &self,
        delivery: &Delivery,
        targets: &[DeliveryTarget],
        finisher: F,
    ) -> Result<(), DeliveryError>
    where
        F: Fn(&DeliveryTarget, u32, Option<&DeliveryError>) + Send + Sync,
    {
        let finisher = &finisher;
        let results = join_all(targets.iter().map(|target| async move {
            let (retries, result) = self.deliver_one(delivery, target).await;
            finisher(target, retries, result.as_ref().err());
            (target.team_id, result)
        }))
        .await;

        let failures: Vec<_> = results
            .into_iter()
            .filter_map(|(team, result)| result.err().map(|e| (team, e.to_string())))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeliveryError::Aggregate(failures))
        }
    }

    async fn deliver_one(
        &self,
        delivery: &Delivery,
        target: &DeliveryTarget,
    ) -> (u32, Result<(), DeliveryError>) {
        let remaining = (delivery.deadline - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let mut backoff = FibonacciBackoff::new(self.initial, self.max_delay, remaining + self.grace);
        let attempts = AtomicU32::new(0);
        let url = format!("{}{}", target.base_url.trim_end_matches('/'), delivery.route);

        let client = &self.client;
        let url = url.as_str();
        let attempts_ref = &attempts;
        let result = retry(&mut backoff, move |attempt| async move {
            attempts_ref.store(attempt, Ordering::Relaxed);
            send(client, delivery, target, url)
                .await
                .map_err(RetryError::Transient)
        })
        .await;

        let retries = attempts.load(Ordering::Relaxed).saturating_sub(1);
        match &result {
            Ok(()) => info!(team_id = %target.team_id, retries, "delivered"),
            Err(e) => warn!(team_id = %target.team_id, retries, error = %e, "delivery gave up"),
        }
        (retries, result)
    }
}

async fn send(
    client: &Client,
    delivery: &Delivery,
    target: &DeliveryTarget,
    url: &str,
) -> Result<(), DeliveryError> {
    let mut request = client
        .request(delivery.method.clone(), url)
        .basic_auth(&target.username, Some(&target.password))
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(payload) = &delivery.payload {
        request = request.body(payload.clone());
    }

    let response = request
        .send()
        .await
        .map_err(|e| DeliveryError::Request(e.to_string()))?;
    let status = response.status();
    let mut body = response.text().await.unwrap_or_default();
    if status.is_success() {
        return Ok(());
    }
    if body.len() > MAX_DIAGNOSTIC_BODY {
        let mut cut = MAX_DIAGNOSTIC_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(DeliveryError::Status {
        status: status.as_u16(),
        body,
    })
}
