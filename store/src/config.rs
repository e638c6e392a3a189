/// Configuration for the key-value store and its key namespaces
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis connection URL; the in-memory store is used when unset
    pub redis_url: Option<String>,
    /// Key prefix for persisted group lists
    pub group_prefix: String,
    /// Key prefix for cached price snapshots
    pub price_prefix: String,
    /// Key prefix for cached CoinGecko proxy responses
    pub proxy_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            group_prefix: "group".to_string(),
            price_prefix: "prices".to_string(),
            proxy_prefix: "coingecko".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create a new store configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let redis_url = std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty());
        let group_prefix =
            std::env::var("GROUP_KEY_PREFIX").unwrap_or(defaults.group_prefix);
        let price_prefix =
            std::env::var("PRICE_KEY_PREFIX").unwrap_or(defaults.price_prefix);
        let proxy_prefix =
            std::env::var("PROXY_KEY_PREFIX").unwrap_or(defaults.proxy_prefix);

        let config = Self {
            redis_url,
            group_prefix,
            price_prefix,
            proxy_prefix,
        };
        config.validate()?;

        Ok(config)
    }

    /// Groups, price snapshots and proxy responses must live in separate namespaces
    pub fn validate(&self) -> Result<(), String> {
        let prefixes = [
            ("GROUP_KEY_PREFIX", &self.group_prefix),
            ("PRICE_KEY_PREFIX", &self.price_prefix),
            ("PROXY_KEY_PREFIX", &self.proxy_prefix),
        ];

        for (i, (name, prefix)) in prefixes.iter().enumerate() {
            if prefix.is_empty() {
                return Err(format!("{} must not be empty", name));
            }
            for (other, other_prefix) in &prefixes[i + 1..] {
                if prefix == other_prefix {
                    return Err(format!(
                        "{} and {} must differ (both are '{}')",
                        name, other, prefix
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn group_key(&self, scope: &str) -> String {
        format!("{}-{}", self.group_prefix, scope)
    }

    pub fn price_key(&self, scope: &str) -> String {
        format!("{}-{}", self.price_prefix, scope)
    }

    /// Proxy responses are shared across scopes and keyed by path and query
    pub fn proxy_key(&self, path_and_query: &str) -> String {
        format!("{}-{}", self.proxy_prefix, path_and_query)
    }
}
