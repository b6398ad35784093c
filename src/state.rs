use std::sync::Arc;

use crate::config::Config;
use crate::error::ConfigError;
use crate::gateway::InferenceGateway;
use crate::proxy::{ImageProxy, ProxyPolicy, BROWSER_USER_AGENT};
use crate::translate::Translator;

/// Application state shared across HTTP handlers
pub struct AppState {
    pub config: Arc<Config>,
    /// Captioning calls, with retry
    pub gateway: InferenceGateway,
    pub translator: Translator,
    /// Remote image fetching, with a browser user agent
    pub proxy: ImageProxy,
    /// Limits for `/api/proxy/image` and `/api/test/image`
    pub direct_policy: ProxyPolicy,
    /// Limits for `/api/proxy/fetch`
    pub strict_policy: ProxyPolicy,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let inference_client = reqwest::Client::builder().build()?;
        let proxy_client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .build()?;

        Ok(Self {
            gateway: InferenceGateway::new(
                inference_client.clone(),
                config.hf_token.clone(),
                config.retry.clone(),
            ),
            translator: Translator::new(
                inference_client,
                config.inference_base.clone(),
                config.hf_token.clone(),
                config.translation_timeout,
            ),
            proxy: ImageProxy::new(proxy_client),
            direct_policy: ProxyPolicy::direct(config.proxy_max_dimension),
            strict_policy: ProxyPolicy::strict(),
            config: Arc::new(config),
        })
    }
}
