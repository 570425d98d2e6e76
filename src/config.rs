use crate::error::ConfigError;
use std::str::FromStr;
use std::time::Duration;

/// Scraper configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of codes claimed per run
    pub batch_size: usize,
    /// In-flight portal requests (and concurrently processed codes)
    pub max_concurrent: usize,
    /// Lower bound of the delay between request starts, in seconds
    pub delay_min: f64,
    /// Upper bound of the delay between request starts, in seconds
    pub delay_max: f64,
    /// Build everything, upload and write nothing
    pub dry_run: bool,
    /// Explicit codes to process instead of the pending claim
    pub codes: Option<Vec<String>>,
    pub request_timeout_secs: u64,
    /// Download ceiling per file
    pub max_file_bytes: u64,
    /// Age after which in_progress / failed rows are reclaimable
    pub stale_after_secs: u64,
    /// Codes that failed this many times are no longer reclaimed
    pub max_scrape_attempts: u32,
    pub portal_base_url: String,
    // --- Cloudflare ---
    pub cf_account_id: String,
    pub cf_api_token: String,
    pub d1_database_id: String,
    pub d1_api_base_url: String,
    /// Absent only in dry-run mode
    pub r2: Option<R2Config>,
}

/// R2 (S3-compatible) credentials
#[derive(Clone, Debug)]
pub struct R2Config {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 200,
            max_concurrent: 5,
            delay_min: 1.5,
            delay_max: 3.0,
            dry_run: false,
            codes: None,
            request_timeout_secs: 30,
            max_file_bytes: 50 * 1024 * 1024,
            stale_after_secs: 3600,
            max_scrape_attempts: 3,
            portal_base_url: "https://www.mercadopublico.cl".to_string(),
            cf_account_id: String::new(),
            cf_api_token: String::new(),
            d1_database_id: String::new(),
            d1_api_base_url: "https://api.cloudflare.com/client/v4".to_string(),
            r2: None,
        }
    }
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let dry_run = match lookup("DRY_RUN") {
            Some(v) => parse_bool("DRY_RUN", &v)?,
            None => default.dry_run,
        };

        let r2 = match (
            non_empty(&lookup, "R2_ACCESS_KEY"),
            non_empty(&lookup, "R2_SECRET_KEY"),
            non_empty(&lookup, "R2_BUCKET"),
        ) {
            (Some(access_key), Some(secret_key), Some(bucket)) => Some(R2Config {
                access_key,
                secret_key,
                bucket,
            }),
            _ if dry_run => None,
            (access, secret, _) => {
                let missing = if access.is_none() {
                    "R2_ACCESS_KEY"
                } else if secret.is_none() {
                    "R2_SECRET_KEY"
                } else {
                    "R2_BUCKET"
                };
                return Err(ConfigError::MissingVar {
                    var_name: missing.to_string(),
                });
            }
        };

        let config = Self {
            batch_size: parse_var(&lookup, "BATCH_SIZE", default.batch_size, "a positive integer")?,
            max_concurrent: parse_var(&lookup, "MAX_CONCURRENT", default.max_concurrent, "a positive integer")?,
            delay_min: parse_var(&lookup, "DELAY_MIN", default.delay_min, "seconds as a number")?,
            delay_max: parse_var(&lookup, "DELAY_MAX", default.delay_max, "seconds as a number")?,
            dry_run,
            codes: lookup("CHILECOMPRA_CODES").and_then(|v| parse_codes(&v)),
            request_timeout_secs: parse_var(&lookup, "REQUEST_TIMEOUT_SECS", default.request_timeout_secs, "seconds as an integer")?,
            max_file_bytes: parse_var(&lookup, "MAX_FILE_BYTES", default.max_file_bytes, "a byte count")?,
            stale_after_secs: parse_var(&lookup, "STALE_AFTER_SECS", default.stale_after_secs, "seconds as an integer")?,
            max_scrape_attempts: parse_var(&lookup, "MAX_SCRAPE_ATTEMPTS", default.max_scrape_attempts, "a positive integer")?,
            portal_base_url: non_empty(&lookup, "PORTAL_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(default.portal_base_url),
            cf_account_id: required(&lookup, "CF_ACCOUNT_ID")?,
            cf_api_token: required(&lookup, "CF_API_TOKEN")?,
            d1_database_id: required(&lookup, "D1_DATABASE_ID")?,
            d1_api_base_url: non_empty(&lookup, "D1_API_BASE_URL").unwrap_or(default.d1_api_base_url),
            r2,
        };

        config.validate()?;
        Ok(config)
    }

    /// Applies command-line overrides on top of the environment.
    pub fn with_overrides(
        mut self,
        codes: Option<Vec<String>>,
        dry_run: bool,
        batch_size: Option<usize>,
    ) -> Result<Self, ConfigError> {
        if let Some(codes) = codes.filter(|c| !c.is_empty()) {
            self.codes = Some(codes);
        }
        if dry_run {
            self.dry_run = true;
        }
        if let Some(batch_size) = batch_size {
            self.batch_size = batch_size;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("BATCH_SIZE", "0", "a positive integer"));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("MAX_CONCURRENT", "0", "a positive integer"));
        }
        if !(self.delay_min >= 0.0) {
            return Err(ConfigError::invalid(
                "DELAY_MIN",
                self.delay_min.to_string(),
                "a non-negative number",
            ));
        }
        if !self.delay_max.is_finite() || self.delay_min > self.delay_max {
            return Err(ConfigError::invalid(
                "DELAY_MAX",
                self.delay_max.to_string(),
                format!("a number >= DELAY_MIN ({})", self.delay_min),
            ));
        }
        if self.max_scrape_attempts == 0 {
            return Err(ConfigError::invalid("MAX_SCRAPE_ATTEMPTS", "0", "a positive integer"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn delay_range(&self) -> (Duration, Duration) {
        (
            Duration::from_secs_f64(self.delay_min),
            Duration::from_secs_f64(self.delay_max),
        )
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Splits a comma separated code list, dropping blanks.
pub fn parse_codes(raw: &str) -> Option<Vec<String>> {
    let codes: Vec<String> = raw
        .split(',')
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    if codes.is_empty() {
        None
    } else {
        Some(codes)
    }
}

fn parse_bool(var_name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::invalid(var_name, value, "true or false")),
    }
}

fn parse_var<F, T>(lookup: &F, var_name: &str, default: T, expected: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match non_empty(lookup, var_name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::invalid(var_name, value, expected)),
        None => Ok(default),
    }
}

fn non_empty<F>(lookup: &F, var_name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var_name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, var_name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, var_name).ok_or_else(|| ConfigError::MissingVar {
        var_name: var_name.to_string(),
    })
}
