use std::sync::Arc;

use crate::config::Config;
use crate::db::Stores;
use crate::dispatch::Dispatcher;
use crate::integrations::{HookChain, ProviderRegistry};
use crate::rate_limit::SubmissionRateLimiter;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub stores: Stores,
    pub config: Config,
    pub registry: Arc<ProviderRegistry>,
    pub hooks: HookChain,
    pub http: reqwest::Client,
    pub dispatcher: Arc<Dispatcher>,
    pub submission_limiter: SubmissionRateLimiter,
}
