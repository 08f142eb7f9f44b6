use std::time::Duration;

use async_trait::async_trait;

use cinder_core::{FetchModuleError, FetchedModule, ModuleFetcher};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches compiled modules from the external bundler over HTTP. The host's
/// module cache is the only stateful cache; requests are sent with
/// `cache-control: no-store` so nothing between us and the bundler keeps a
/// stale copy.
pub struct HttpModuleFetcher {
    client: reqwest::Client,
    origin: String,
}

impl HttpModuleFetcher {
    pub fn new(origin: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build module fetch client: {}", e))?;
        Ok(Self {
            client,
            origin: origin.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

#[async_trait]
impl ModuleFetcher for HttpModuleFetcher {
    async fn fetch_module(
        &self,
        id: &str,
        importer: Option<&str>,
    ) -> Result<FetchedModule, FetchModuleError> {
        let mut request = self
            .client
            .get(format!("{}/__cinder_fetch_module", self.origin))
            .query(&[("id", id)])
            .header("cache-control", "no-store");
        if let Some(importer) = importer {
            request = request.query(&[("importer", importer)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchModuleError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchModuleError::NotFound { id: id.to_string() });
        }
        if !response.status().is_success() {
            return Err(FetchModuleError::Transport(format!(
                "bundler answered {} for {}",
                response.status(),
                id
            )));
        }

        response
            .json::<FetchedModule>()
            .await
            .map_err(|e| FetchModuleError::Transport(format!("bad module payload: {}", e)))
    }
}
