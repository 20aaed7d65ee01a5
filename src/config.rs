use std::net::IpAddr;
use std::time::Duration;

use ipnet::IpNet;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub encryption_key: String,
    pub admin_token: String,
    pub host: IpAddr,
    pub port: u16,
    pub base_url: String,
    pub max_body_size: usize,
    pub trusted_proxies: Vec<IpNet>,
    pub worker_count: usize,
    pub job_timeout: Duration,
    pub log_level: String,
    pub cms: Option<CmsConfig>,
    pub endpoints: ProviderEndpoints,
}

/// Where the host CMS API lives. Element and mailing-list integrations are
/// only registered when this is set.
#[derive(Debug, Clone)]
pub struct CmsConfig {
    pub url: String,
    pub token: Option<String>,
}

/// Third-party API base URLs. Overridable so tests and staging can point
/// providers at local fakes.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub recaptcha_verify_url: String,
    pub recaptcha_enterprise_url: String,
    pub turnstile_verify_url: String,
    pub klaviyo_url: String,
    pub quickstream_live_url: String,
    pub quickstream_test_url: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            recaptcha_verify_url: "https://www.google.com/recaptcha/api/siteverify".to_string(),
            recaptcha_enterprise_url: "https://recaptchaenterprise.googleapis.com".to_string(),
            turnstile_verify_url: "https://challenges.cloudflare.com/turnstile/v0/siteverify".to_string(),
            klaviyo_url: "https://a.klaviyo.com/api".to_string(),
            quickstream_live_url: "https://api.quickstream.westpac.com.au/rest/v1".to_string(),
            quickstream_test_url: "https://api.quickstream.support.qvalent.com/rest/v1".to_string(),
        }
    }
}

impl ProviderEndpoints {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            recaptcha_verify_url: env_or("FORMRELAY_RECAPTCHA_VERIFY_URL", &defaults.recaptcha_verify_url),
            recaptcha_enterprise_url: env_or(
                "FORMRELAY_RECAPTCHA_ENTERPRISE_URL",
                &defaults.recaptcha_enterprise_url,
            ),
            turnstile_verify_url: env_or("FORMRELAY_TURNSTILE_VERIFY_URL", &defaults.turnstile_verify_url),
            klaviyo_url: env_or("FORMRELAY_KLAVIYO_URL", &defaults.klaviyo_url),
            quickstream_live_url: env_or("FORMRELAY_QUICKSTREAM_LIVE_URL", &defaults.quickstream_live_url),
            quickstream_test_url: env_or("FORMRELAY_QUICKSTREAM_TEST_URL", &defaults.quickstream_test_url),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;
        let encryption_key = env_required("FORMRELAY_ENCRYPTION_KEY")?;
        let admin_token = env_required("FORMRELAY_ADMIN_TOKEN")?;

        let host: IpAddr = env_or("FORMRELAY_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_HOST: {e}"))?;

        let port: u16 = env_or("FORMRELAY_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_PORT: {e}"))?;

        let base_url = env_or("FORMRELAY_BASE_URL", &format!("http://{host}:{port}"));

        let max_body_size: usize = env_or("FORMRELAY_MAX_BODY_SIZE", "1048576")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_MAX_BODY_SIZE: {e}"))?;

        let trusted_proxies: Vec<IpNet> = env_or("FORMRELAY_TRUSTED_PROXIES", "")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse()
                    .map_err(|e| format!("Invalid FORMRELAY_TRUSTED_PROXIES entry '{s}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let worker_count: usize = env_or("FORMRELAY_WORKER_COUNT", "2")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_WORKER_COUNT: {e}"))?;

        let job_timeout: u64 = env_or("FORMRELAY_JOB_TIMEOUT_SECS", "30")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_JOB_TIMEOUT_SECS: {e}"))?;

        let log_level = env_or("FORMRELAY_LOG_LEVEL", "info");

        let cms = std::env::var("FORMRELAY_CMS_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(|url| CmsConfig {
                url,
                token: std::env::var("FORMRELAY_CMS_TOKEN").ok(),
            });

        Ok(Config {
            database_url,
            encryption_key,
            admin_token,
            host,
            port,
            base_url,
            max_body_size,
            trusted_proxies,
            worker_count: worker_count.max(1),
            job_timeout: Duration::from_secs(job_timeout),
            log_level,
            cms,
            endpoints: ProviderEndpoints::from_env(),
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
