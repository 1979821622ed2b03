//! Quote sources: the `fetch(symbol)` collaborator of the orchestrator.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::DEFAULT_QUOTE_SOURCE_URL;
use crate::http_client::{random_user_agent, HttpClient, HttpRequest, ReqwestHttpClient};
use crate::{MarketState, RawQuote, Symbol, UtcDateTime};

/// Why a single fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by upstream (HTTP {status})")]
    RateLimited { status: u16 },

    #[error("upstream server error (HTTP {status})")]
    Upstream { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("request rejected (HTTP {status})")]
    Rejected { status: u16 },

    #[error("malformed payload: {0}")]
    Parse(String),

    #[error("cancelled before the request was sent")]
    Cancelled,
}

impl FetchError {
    /// Timeouts, throttling, 5xx and transport failures may clear up on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::RateLimited { .. }
                | Self::Upstream { .. }
                | Self::Transport(_)
                | Self::CircuitOpen
        )
    }

    /// Map an unsuccessful HTTP status to an error.
    pub fn from_status(status: u16, symbol: &Symbol) -> Self {
        match status {
            429 => Self::RateLimited { status },
            404 => Self::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            500..=599 => Self::Upstream { status },
            _ => Self::Rejected { status },
        }
    }
}

/// Anything that can produce a [`RawQuote`] for a symbol.
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn fetch<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> Pin<Box<dyn Future<Output = Result<RawQuote, FetchError>> + Send + 'a>>;
}

/// Chart-endpoint source over an [`HttpClient`].
pub struct HttpQuoteSource {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    timeout: Duration,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl HttpQuoteSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_http_client(Arc::new(ReqwestHttpClient::new()), base_url, timeout)
    }

    pub fn with_http_client(
        http_client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            timeout,
            circuit_breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Arc::new(CircuitBreaker::new(config));
        self
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn endpoint(&self, symbol: &Symbol) -> String {
        format!(
            "{}/{}?interval=1d&range=1d",
            self.base_url,
            urlencoding::encode(symbol.as_str())
        )
    }

    async fn fetch_chart(&self, symbol: &Symbol) -> Result<RawQuote, FetchError> {
        if !self.circuit_breaker.allow_request() {
            return Err(FetchError::CircuitOpen);
        }

        let request = HttpRequest::get(self.endpoint(symbol))
            .with_header("accept", "application/json")
            .with_header("user-agent", random_user_agent())
            .with_header("referer", "https://finance.yahoo.com/")
            .with_timeout(self.timeout);

        let in_flight = InFlight::new(&self.circuit_breaker);
        let response = match self.http_client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                in_flight.failed();
                return Err(FetchError::Transport(e.message().to_owned()));
            }
        };

        if !response.is_success() {
            let error = FetchError::from_status(response.status, symbol);
            if error.is_transient() {
                in_flight.failed();
            } else {
                in_flight.succeeded();
            }
            return Err(error);
        }

        in_flight.succeeded();
        parse_chart(&response.body, symbol)
    }
}

/// Outcome of one admitted request. A request dropped before it settles
/// (caller timeout or cancellation) counts as a failure, which also
/// releases a half-open probe slot.
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            settled: false,
        }
    }

    fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!("request abandoned before completion");
            self.breaker.record_failure();
        }
    }
}

impl Default for HttpQuoteSource {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTE_SOURCE_URL, Duration::from_secs(10))
    }
}

impl QuoteSource for HttpQuoteSource {
    fn name(&self) -> &'static str {
        "http"
    }

    fn fetch<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> Pin<Box<dyn Future<Output = Result<RawQuote, FetchError>> + Send + 'a>> {
        Box::pin(self.fetch_chart(symbol))
    }
}

// Chart endpoint response structures

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartData,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartApiError>,
}

#[derive(Debug, Deserialize)]
struct ChartApiError {
    code: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    indicators: Option<ChartIndicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    regular_market_volume: Option<i64>,
    regular_market_time: Option<i64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    previous_close: Option<f64>,
    chart_previous_close: Option<f64>,
    market_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
}

fn parse_chart(body: &str, symbol: &Symbol) -> Result<RawQuote, FetchError> {
    let response: ChartResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::Parse(format!("failed to parse chart for {symbol}: {e}")))?;

    if let Some(error) = response.chart.error {
        if error.code.eq_ignore_ascii_case("not found") {
            return Err(FetchError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        return Err(FetchError::Parse(format!(
            "chart API error {}: {}",
            error.code,
            error.description.unwrap_or_default()
        )));
    }

    let result = response
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| FetchError::Parse(format!("no chart data for {symbol}")))?;
    let meta = result.meta;

    let observed_at = meta
        .regular_market_time
        .map(UtcDateTime::from_unix_timestamp)
        .transpose()
        .map_err(|e| FetchError::Parse(e.to_string()))?;

    let open = result
        .indicators
        .and_then(|indicators| indicators.quote.into_iter().next())
        .and_then(|quote| quote.open.into_iter().flatten().next());

    let mut quote = RawQuote::new(
        symbol.clone(),
        meta.regular_market_price,
        meta.regular_market_volume,
        observed_at,
    );
    quote.open = open;
    quote.high = meta.regular_market_day_high;
    quote.low = meta.regular_market_day_low;
    quote.previous_close = meta.previous_close.or(meta.chart_previous_close);
    quote.market_state = meta
        .market_state
        .as_deref()
        .and_then(MarketState::from_upstream);

    debug!(symbol = %symbol, price = ?quote.price, "parsed chart payload");
    Ok(quote)
}

/// Offline source with deterministic, symbol-seeded prices.
#[derive(Debug, Clone, Default)]
pub struct SyntheticQuoteSource {
    latency: Duration,
}

impl SyntheticQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate network latency on every fetch.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }

    /// Quote for `symbol` as of `now`.
    pub fn quote_at(symbol: &Symbol, now: UtcDateTime) -> RawQuote {
        let seed = symbol_seed(symbol);
        let minute = u64::try_from(now.unix_timestamp() / 60).unwrap_or(0);

        let previous_close = 50.0 + (seed % 4_500) as f64 / 10.0;
        let drift = ((seed ^ minute) % 200) as f64 / 100.0 - 1.0;
        let price = round_cents(previous_close + drift);
        let high = round_cents(price.max(previous_close) + 0.5);
        let low = round_cents(price.min(previous_close) - 0.5);
        let volume = 100_000 + (seed % 5_000_000) as i64;

        RawQuote::new(
            symbol.clone(),
            Some(price),
            Some(volume),
            Some(now.truncate_to_seconds()),
        )
        .with_day_range(previous_close, high, low)
        .with_previous_close(previous_close)
        .with_market_state(MarketState::Regular)
    }
}

impl QuoteSource for SyntheticQuoteSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn fetch<'a>(
        &'a self,
        symbol: &'a Symbol,
    ) -> Pin<Box<dyn Future<Output = Result<RawQuote, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            Ok(Self::quote_at(symbol, UtcDateTime::now()))
        })
    }
}

fn symbol_seed(symbol: &Symbol) -> u64 {
    symbol.as_str().bytes().fold(7_u64, |acc, byte| {
        acc.wrapping_mul(37).wrapping_add(u64::from(byte))
    })
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::http_client::{HttpError, HttpErrorKind, HttpResponse};
    use crate::Validator;

    struct ScriptedHttpClient {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        seen_urls: Mutex<Vec<String>>,
    }

    impl ScriptedHttpClient {
        fn new(responses: Vec<Result<HttpResponse, HttpError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen_urls: Mutex::new(Vec::new()),
            })
        }
    }

    impl HttpClient for ScriptedHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.seen_urls.lock().expect("urls").push(request.url);
            let next = self
                .responses
                .lock()
                .expect("responses")
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(500, "")));
            Box::pin(async move { next })
        }
    }

    const CHART_BODY: &str = r#"{
        "chart": {
            "result": [{
                "meta": {
                    "symbol": "AAPL",
                    "regularMarketPrice": 189.5,
                    "regularMarketVolume": 51234567,
                    "regularMarketTime": 1709305200,
                    "regularMarketDayHigh": 190.1,
                    "regularMarketDayLow": 187.2,
                    "chartPreviousClose": 188.0,
                    "marketState": "REGULAR"
                },
                "indicators": { "quote": [{ "open": [null, 188.3] }] }
            }],
            "error": null
        }
    }"#;

    fn aapl() -> Symbol {
        Symbol::parse("AAPL").expect("symbol")
    }

    fn source(client: Arc<ScriptedHttpClient>) -> HttpQuoteSource {
        HttpQuoteSource::with_http_client(client, "https://charts.test/v8/chart/", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn parses_chart_payload_into_raw_quote() {
        let client = ScriptedHttpClient::new(vec![Ok(HttpResponse::new(200, CHART_BODY))]);
        let source = source(Arc::clone(&client));

        let quote = source.fetch(&aapl()).await.expect("fetch");

        assert_eq!(quote.price, Some(189.5));
        assert_eq!(quote.volume, Some(51_234_567));
        assert_eq!(quote.open, Some(188.3));
        assert_eq!(quote.previous_close, Some(188.0));
        assert_eq!(quote.market_state, Some(MarketState::Regular));
        assert_eq!(
            quote.observed_at.map(UtcDateTime::format_rfc3339).as_deref(),
            Some("2024-03-01T15:00:00Z")
        );
        assert_eq!(
            client.seen_urls.lock().expect("urls").as_slice(),
            ["https://charts.test/v8/chart/AAPL?interval=1d&range=1d"]
        );
    }

    #[tokio::test]
    async fn classifies_http_failures() {
        let client = ScriptedHttpClient::new(vec![
            Ok(HttpResponse::new(404, "")),
            Ok(HttpResponse::new(429, "")),
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::new(403, "")),
            Ok(HttpResponse::new(200, "<html>")),
            Err(HttpError::new(HttpErrorKind::Connect, "connection refused")),
        ]);
        let source = source(client);
        let symbol = aapl();

        let mut errors = Vec::new();
        for _ in 0..6 {
            errors.push(source.fetch(&symbol).await.expect_err("must fail"));
        }

        assert!(matches!(errors[0], FetchError::SymbolNotFound { .. }));
        assert!(matches!(errors[1], FetchError::RateLimited { status: 429 }));
        assert!(matches!(errors[2], FetchError::Upstream { status: 503 }));
        assert!(matches!(errors[3], FetchError::Rejected { status: 403 }));
        assert!(matches!(errors[4], FetchError::Parse(_)));
        assert!(matches!(errors[5], FetchError::Transport(_)));

        let transient: Vec<bool> = errors.iter().map(FetchError::is_transient).collect();
        assert_eq!(transient, [false, true, true, false, false, true]);
    }

    #[tokio::test]
    async fn chart_level_not_found_is_permanent() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        let client = ScriptedHttpClient::new(vec![Ok(HttpResponse::new(200, body))]);

        let error = source(client).fetch(&aapl()).await.expect_err("not found");

        assert!(matches!(error, FetchError::SymbolNotFound { .. }));
        assert!(!error.is_transient());
    }

    #[tokio::test]
    async fn repeated_upstream_failures_open_the_circuit() {
        let client = ScriptedHttpClient::new(vec![
            Ok(HttpResponse::new(502, "")),
            Ok(HttpResponse::new(502, "")),
        ]);
        let source = source(Arc::clone(&client)).with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        });

        let _ = source.fetch(&aapl()).await;
        let _ = source.fetch(&aapl()).await;
        let error = source.fetch(&aapl()).await.expect_err("circuit open");

        assert_eq!(error, FetchError::CircuitOpen);
        assert!(error.is_transient());
        assert_eq!(client.seen_urls.lock().expect("urls").len(), 2);
    }

    struct StalledHttpClient;

    impl HttpClient for StalledHttpClient {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn requests_abandoned_by_the_caller_count_against_the_circuit() {
        let source = HttpQuoteSource::with_http_client(
            Arc::new(StalledHttpClient),
            "https://charts.test/v8/chart",
            Duration::from_secs(5),
        )
        .with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        });
        let symbol = aapl();

        for _ in 0..2 {
            let outcome = tokio::time::timeout(Duration::from_secs(1), source.fetch(&symbol)).await;
            assert!(outcome.is_err(), "the stalled request is abandoned");
        }
        assert_eq!(source.circuit_breaker().state(), CircuitState::Open);

        // The half-open probe is abandoned too: the circuit reopens at once.
        tokio::time::advance(Duration::from_secs(61)).await;
        let probe = tokio::time::timeout(Duration::from_secs(1), source.fetch(&symbol)).await;
        assert!(probe.is_err());
        assert_eq!(source.circuit_breaker().state(), CircuitState::Open);
        assert_eq!(
            source.fetch(&symbol).await.expect_err("still open"),
            FetchError::CircuitOpen
        );
    }

    #[test]
    fn synthetic_quotes_are_deterministic_and_valid() {
        let now = UtcDateTime::parse("2024-03-01T15:00:00Z").expect("ts");

        let first = SyntheticQuoteSource::quote_at(&aapl(), now);
        let second = SyntheticQuoteSource::quote_at(&aapl(), now);

        assert_eq!(first, second);
        assert!(Validator::default().validate_at(first, now).is_ok());
    }
}
