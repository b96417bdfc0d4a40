//! HTTP adapter for GraphHopper-compatible endpoints. The cloud and
//! self-host variants share this client and differ in auth and profile
//! policy.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use model::route_version::{Objective, Profile, RouteOptions};
use reqwest::{header, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use super::{wire, Matrix, Point, ProviderError, RouteProvider, RouteResult};
use crate::config::{CloudConfig, SelfhostConfig};

/// Applied when a 429 response carries no usable Retry-After header.
const DEFAULT_RETRY_AFTER_S: u64 = 30;

pub struct GraphHopper {
    name: &'static str,
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    /// Self-host instances do not support the motorcycle profile and the
    /// request is rejected before it goes on the wire.
    reject_motorcycle: bool,
}

impl GraphHopper {
    pub fn cloud(config: &CloudConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            name: "cloud",
            http: build_client(config.timeout_s)?,
            base_url: config.base_url.clone(),
            api_key: Some(config.api_key.clone()),
            reject_motorcycle: false,
        })
    }

    pub fn selfhost(config: &SelfhostConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            name: "selfhost",
            http: build_client(config.timeout_s)?,
            base_url: config.base_url.clone(),
            api_key: None,
            reject_motorcycle: true,
        })
    }

    fn check_profile(&self, profile: Profile) -> Result<(), ProviderError> {
        if self.reject_motorcycle && profile == Profile::Motorcycle {
            return Err(ProviderError::Upstream4xx {
                status: 400,
                message: "profile 'motorcycle' is not supported by this instance".to_owned(),
            });
        }
        Ok(())
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        debug!("POST {} via {}", url, self.name);

        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request.send().await.map_err(ProviderError::from)?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_s = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_S);
            return Err(ProviderError::RateLimited { retry_after_s });
        }
        if status.is_server_error() {
            return Err(ProviderError::Upstream5xx {
                status: status.as_u16(),
            });
        }
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream4xx {
                status: status.as_u16(),
                message: truncate(&message, 200),
            });
        }

        response.json::<R>().await.map_err(ProviderError::from)
    }
}

#[async_trait]
impl RouteProvider for GraphHopper {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn compute_route(
        &self,
        points: &[Point],
        profile: Profile,
        options: &RouteOptions,
    ) -> Result<RouteResult, ProviderError> {
        self.check_profile(profile)?;
        let body = wire::RouteRequest::new(points, profile, options);
        let response: wire::RouteResponse = self.post("route", &body).await?;
        wire::decode_route(response, points, profile)
    }

    async fn compute_matrix(
        &self,
        points: &[Point],
        profile: Profile,
        objective: Objective,
    ) -> Result<Matrix, ProviderError> {
        self.check_profile(profile)?;
        let body = wire::MatrixRequest::new(points, profile, objective);
        let response: wire::MatrixResponse = self.post("matrix", &body).await?;
        wire::decode_matrix(response, points.len())
    }
}

fn build_client(timeout_s: u64) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_s))
        .build()
        .map_err(ProviderError::from)
}

fn truncate(message: &str, max: usize) -> String {
    if message.len() <= max {
        message.to_owned()
    } else {
        let mut end = max;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &message[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelfhostConfig;

    #[tokio::test]
    async fn selfhost_rejects_motorcycle_without_network() {
        let provider = GraphHopper::selfhost(&SelfhostConfig {
            base_url: "http://localhost:1".to_owned(),
            timeout_s: 1,
        })
        .unwrap();
        let points = [Point::new(54.1, 10.1), Point::new(54.2, 10.2)];
        let error = provider
            .compute_route(&points, Profile::Motorcycle, &RouteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, ProviderError::Upstream4xx { .. }));
        assert!(error.is_terminal());
    }
}
