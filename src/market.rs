//! Market-data client
//!
//! Thin consumer of an external quote provider. Every fetch is memoized
//! through the cache facade: quotes for a minute, company profiles for an
//! hour, market news for five minutes.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::cache::Cache;
use crate::config::MarketConfig;

const QUOTE_TTL_SECS: u64 = 60;
const PROFILE_TTL_SECS: u64 = 3600;
const NEWS_TTL_SECS: u64 = 300;

/// Pull candidate ticker symbols out of free-form text: uppercase words
/// of at least two characters, stripped of trailing punctuation.
pub fn extract_symbols(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|word| word.trim_matches(|c| ",.!?".contains(c)))
        .filter(|word| {
            word.len() >= 2 && word.chars().all(|c| c.is_ascii_uppercase())
        })
        .map(|word| word.to_string())
        .collect()
}

#[derive(Clone)]
pub struct MarketDataClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    cache: Cache,
}

impl MarketDataClient {
    pub fn new(config: &MarketConfig, cache: Cache) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key(),
            cache,
        }
    }

    async fn fetch(&self, path: &str, symbol: Option<&str>) -> Result<Value> {
        let mut request = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(symbol) = symbol {
            request = request.query(&[("symbol", symbol)]);
        }
        if let Some(key) = &self.api_key {
            request = request.query(&[("apikey", key.as_str())]);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Market data request to {} failed", path))?;
        if !response.status().is_success() {
            anyhow::bail!("Market data provider returned {}", response.status());
        }
        response
            .json()
            .await
            .context("Malformed market data payload")
    }

    /// Real-time quote snapshot for one symbol.
    pub async fn quote(&self, symbol: &str) -> Result<Value> {
        let key = format!("stock_price_{}", symbol);
        self.cache
            .get_or_set(&key, Some(QUOTE_TTL_SECS), || {
                self.fetch("/stock/price", Some(symbol))
            })
            .await
    }

    /// Company profile for one symbol.
    pub async fn company_profile(&self, symbol: &str) -> Result<Value> {
        let key = format!("company_info_{}", symbol);
        self.cache
            .get_or_set(&key, Some(PROFILE_TTL_SECS), || {
                self.fetch("/company/profile", Some(symbol))
            })
            .await
    }

    /// Latest market headlines.
    pub async fn market_news(&self) -> Result<Value> {
        self.cache
            .get_or_set("market_news", Some(NEWS_TTL_SECS), || {
                self.fetch("/news/market", None)
            })
            .await
    }

    /// Quotes for several symbols, fetched concurrently; individual
    /// failures are skipped so one bad ticker cannot sink a whole
    /// analysis request.
    pub async fn quotes(&self, symbols: &[String]) -> Value {
        let fetches = symbols
            .iter()
            .map(|symbol| async move { (symbol.clone(), self.quote(symbol).await) });

        let mut data = serde_json::Map::new();
        for (symbol, result) in futures::future::join_all(fetches).await {
            match result {
                Ok(snapshot) => {
                    data.insert(symbol, snapshot);
                }
                Err(e) => {
                    tracing::debug!(%symbol, "quote fetch skipped: {e:#}");
                }
            }
        }
        Value::Object(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn symbols_are_uppercase_words() {
        assert_eq!(
            extract_symbols("Should I buy AAPL or MSFT?"),
            vec!["AAPL".to_string(), "MSFT".to_string()]
        );
    }

    #[test]
    fn short_and_mixed_case_words_are_ignored() {
        assert!(extract_symbols("what is a stock").is_empty());
        assert!(extract_symbols("I bought Apple").is_empty());
        // Single letters never qualify
        assert!(extract_symbols("grade A results").is_empty());
    }

    #[test]
    fn trailing_punctuation_is_stripped() {
        assert_eq!(extract_symbols("Thoughts on TSLA?"), vec!["TSLA".to_string()]);
    }

    #[tokio::test]
    async fn cached_quote_skips_the_network() {
        let cache = Cache::in_memory();
        cache
            .set("stock_price_ACME", &json!({"price": 42.0}), Some(60))
            .await
            .unwrap();

        // Unroutable base URL: a network fetch would error out
        let client = MarketDataClient::new(
            &crate::config::MarketConfig {
                base_url: "http://127.0.0.1:1".to_string(),
                api_key_env: "TELLER_TEST_NO_KEY".to_string(),
            },
            cache,
        );

        let quote = client.quote("ACME").await.unwrap();
        assert_eq!(quote["price"], 42.0);
    }

    #[tokio::test]
    async fn failed_quotes_are_skipped_in_bulk() {
        let cache = Cache::in_memory();
        cache
            .set("stock_price_GOOD", &json!({"price": 1.0}), Some(60))
            .await
            .unwrap();

        let client = MarketDataClient::new(
            &crate::config::MarketConfig {
                base_url: "http://127.0.0.1:1".to_string(),
                api_key_env: "TELLER_TEST_NO_KEY".to_string(),
            },
            cache,
        );

        let data = client
            .quotes(&["GOOD".to_string(), "BAD".to_string()])
            .await;
        assert!(data.get("GOOD").is_some());
        assert!(data.get("BAD").is_none());
    }
}
