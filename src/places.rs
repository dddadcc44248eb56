//! HTTP client for Google Places / Geocoding lookups with rate limiting.
//!
//! One request per cluster centroid, with:
//! - Connection pooling
//! - Dispatch rate limiting (spaces out request starts)
//! - Bounded concurrency
//! - Retry with exponential backoff on 429 / `OVER_QUERY_LIMIT` and network errors
//!
//! A failed lookup never aborts the batch: it is logged and reported in the
//! returned [`PlaceLookup`] with `success = false`.

use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::classify::PlaceInfo;
use crate::config::{PlacesConfig, PlacesProvider};
use crate::error::{Error, Result};
use crate::GpsPoint;

/// One centroid to look up.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRequest {
    pub cluster_id: usize,
    pub location: GpsPoint,
}

/// Outcome of looking up one centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceLookup {
    pub cluster_id: usize,
    /// `None` on failure or when the API had no results
    pub place: Option<PlaceInfo>,
    pub success: bool,
    pub error: Option<String>,
}

impl PlaceLookup {
    fn failed(cluster_id: usize, error: String) -> Self {
        Self { cluster_id, place: None, success: false, error: Some(error) }
    }
}

/// Progress callback type: (completed, total)
pub type ProgressCallback = Arc<dyn Fn(u32, u32) + Send + Sync>;

// ============================================================================
// API response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct NearbyResponse {
    status: String,
    #[serde(default)]
    results: Vec<NearbyResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NearbyResult {
    name: Option<String>,
    #[serde(default)]
    types: Vec<String>,
    vicinity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: Option<String>,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    #[serde(default)]
    types: Vec<String>,
}

/// How a response body should be treated.
#[derive(Debug, PartialEq)]
enum ApiOutcome {
    Found(PlaceInfo),
    NoResults,
    Throttled,
    Failed(String),
}

fn status_outcome(status: &str, error_message: Option<String>) -> Option<ApiOutcome> {
    match status {
        "OK" => None,
        "ZERO_RESULTS" => Some(ApiOutcome::NoResults),
        "OVER_QUERY_LIMIT" => Some(ApiOutcome::Throttled),
        other => Some(ApiOutcome::Failed(match error_message {
            Some(msg) => format!("{}: {}", other, msg),
            None => other.to_string(),
        })),
    }
}

fn parse_nearby(bytes: &[u8]) -> ApiOutcome {
    let data: NearbyResponse = match serde_json::from_slice(bytes) {
        Ok(d) => d,
        Err(e) => return ApiOutcome::Failed(format!("JSON parse error: {}", e)),
    };
    if let Some(outcome) = status_outcome(&data.status, data.error_message) {
        return outcome;
    }
    match data.results.into_iter().next() {
        Some(first) => ApiOutcome::Found(PlaceInfo {
            name: first.name,
            types: first.types,
            address: first.vicinity,
            business_name: None,
        }),
        None => ApiOutcome::NoResults,
    }
}

fn parse_geocode(bytes: &[u8]) -> ApiOutcome {
    let data: GeocodeResponse = match serde_json::from_slice(bytes) {
        Ok(d) => d,
        Err(e) => return ApiOutcome::Failed(format!("JSON parse error: {}", e)),
    };
    if let Some(outcome) = status_outcome(&data.status, data.error_message) {
        return outcome;
    }
    match data.results.into_iter().next() {
        Some(first) => {
            let business_name = first
                .address_components
                .iter()
                .find(|c| c.types.iter().any(|t| t == "point_of_interest"))
                .map(|c| c.long_name.clone());
            ApiOutcome::Found(PlaceInfo {
                name: None,
                types: first.types,
                address: first.formatted_address,
                business_name,
            })
        }
        None => ApiOutcome::NoResults,
    }
}

// ============================================================================
// Rate limiting
// ============================================================================

/// Dispatch rate limiter - spaces out when requests START.
struct DispatchRateLimiter {
    interval: Duration,
    next_dispatch: Mutex<Instant>,
    dispatched_count: AtomicU32,
    consecutive_throttles: AtomicU32,
}

impl DispatchRateLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_dispatch: Mutex::new(Instant::now()),
            dispatched_count: AtomicU32::new(0),
            consecutive_throttles: AtomicU32::new(0),
        }
    }

    /// Wait for our dispatch slot. Each caller gets a unique slot
    /// spaced `interval` apart.
    async fn wait_for_dispatch_slot(&self) -> u32 {
        let (wait_duration, dispatch_num) = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();

            let dispatch_at = if *next > now { *next } else { now };
            *next = dispatch_at + self.interval;

            let num = self.dispatched_count.fetch_add(1, Ordering::Relaxed) + 1;
            (dispatch_at.saturating_duration_since(now), num)
        };

        // Wait outside the lock
        if wait_duration > Duration::from_millis(5) {
            debug!("[Dispatch #{}] Waiting {:?} for slot", dispatch_num, wait_duration);
            tokio::time::sleep(wait_duration).await;
        }

        dispatch_num
    }

    fn record_success(&self) {
        self.consecutive_throttles.store(0, Ordering::Relaxed);
    }

    fn record_throttle(&self) -> Duration {
        let count = self.consecutive_throttles.fetch_add(1, Ordering::Relaxed) + 1;
        // Exponential backoff: 1s, 2s, 4s, 8s max
        let backoff = Duration::from_millis(500 * (1 << count.min(4)));
        warn!("[DispatchRateLimiter] Throttled! Consecutive: {}, backing off {:?}", count, backoff);
        backoff
    }
}

// ============================================================================
// Client
// ============================================================================

/// Rate-limited place lookup client.
pub struct PlacesClient {
    client: Client,
    api_key: String,
    config: PlacesConfig,
    rate_limiter: Arc<DispatchRateLimiter>,
}

impl PlacesClient {
    /// Create a client. The key must be non-empty.
    pub fn new(api_key: &str, config: PlacesConfig) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "no API key; set {} or places.api_key",
                config.api_key_env
            )));
        }

        let client = Client::builder()
            .pool_max_idle_per_host(config.max_concurrency * 2)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            rate_limiter: Arc::new(DispatchRateLimiter::new(Duration::from_millis(
                config.dispatch_interval_ms,
            ))),
            config,
        })
    }

    /// Create a client with the key from config or the environment.
    pub fn from_config(config: PlacesConfig) -> Result<Self> {
        let key = config.resolve_api_key().unwrap_or_default();
        Self::new(&key, config)
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match self.config.provider {
            PlacesProvider::NearbySearch => format!("{}/place/nearbysearch/json", base),
            PlacesProvider::ReverseGeocode => format!("{}/geocode/json", base),
        }
    }

    fn query_params(&self, location: &GpsPoint) -> Vec<(&'static str, String)> {
        let latlng = format!("{},{}", location.latitude, location.longitude);
        match self.config.provider {
            PlacesProvider::NearbySearch => vec![
                ("location", latlng),
                ("radius", self.config.radius_meters.to_string()),
                ("key", self.api_key.clone()),
            ],
            PlacesProvider::ReverseGeocode => vec![
                ("latlng", latlng),
                ("key", self.api_key.clone()),
            ],
        }
    }

    /// Look up every request, returning results in input order.
    pub async fn lookup_all(
        &self,
        requests: Vec<PlaceRequest>,
        on_progress: Option<ProgressCallback>,
    ) -> Vec<PlaceLookup> {
        use futures::stream::{self, StreamExt};

        let total = requests.len() as u32;
        let completed = Arc::new(AtomicU32::new(0));

        info!(
            "[PlacesClient] Looking up {} centroids via {:?} (dispatch interval: {}ms, max concurrent: {})",
            total, self.config.provider, self.config.dispatch_interval_ms, self.config.max_concurrency
        );

        let start = Instant::now();

        let results: Vec<PlaceLookup> = stream::iter(requests)
            .map(|request| {
                let completed = Arc::clone(&completed);
                let callback = on_progress.clone();

                async move {
                    let dispatch_num = self.rate_limiter.wait_for_dispatch_slot().await;
                    let result = self.lookup_single(&request).await;

                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(
                        "[Progress] {}/{} | dispatch #{} | cluster {} | success={}",
                        done, total, dispatch_num, request.cluster_id, result.success
                    );

                    if let Some(ref cb) = callback {
                        cb(done, total);
                    }

                    result
                }
            })
            .buffered(self.config.max_concurrency)
            .collect()
            .await;

        let success_count = results.iter().filter(|r| r.success).count();
        info!(
            "[PlacesClient] DONE: {}/{} success ({} errors) in {:.2}s",
            success_count,
            total,
            results.len() - success_count,
            start.elapsed().as_secs_f64()
        );

        results
    }

    /// Look up one centroid, retrying on throttling and transport errors.
    pub async fn lookup_single(&self, request: &PlaceRequest) -> PlaceLookup {
        let url = self.endpoint();
        let params = self.query_params(&request.location);
        let mut retries = 0;

        loop {
            let response = self.client.get(&url).query(&params).send().await;

            let resp = match response {
                Ok(resp) => resp,
                Err(e) => {
                    // The URL carries the API key
                    let e = e.without_url();
                    retries += 1;
                    if retries > self.config.max_retries {
                        warn!("[Lookup {}] Giving up: {}", request.cluster_id, e);
                        return PlaceLookup::failed(request.cluster_id, format!("Request error: {}", e));
                    }
                    let wait = Duration::from_millis(200 * (1 << retries.min(5)));
                    warn!(
                        "[Lookup {}] Error: {}, retry {} after {:?}",
                        request.cluster_id, e, retries, wait
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }
            };

            let status = resp.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > self.config.max_retries {
                    return PlaceLookup::failed(request.cluster_id, "Max retries exceeded (429)".to_string());
                }
                let wait = self.rate_limiter.record_throttle();
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                warn!("[Lookup {}] HTTP {}", request.cluster_id, status);
                return PlaceLookup::failed(request.cluster_id, format!("HTTP {}", status));
            }

            let bytes = match resp.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    let e = e.without_url();
                    return PlaceLookup::failed(request.cluster_id, format!("Body download error: {}", e));
                }
            };

            let outcome = match self.config.provider {
                PlacesProvider::NearbySearch => parse_nearby(&bytes),
                PlacesProvider::ReverseGeocode => parse_geocode(&bytes),
            };

            match outcome {
                ApiOutcome::Throttled => {
                    retries += 1;
                    if retries > self.config.max_retries {
                        return PlaceLookup::failed(
                            request.cluster_id,
                            "Max retries exceeded (OVER_QUERY_LIMIT)".to_string(),
                        );
                    }
                    let wait = self.rate_limiter.record_throttle();
                    tokio::time::sleep(wait).await;
                }
                ApiOutcome::Found(place) => {
                    self.rate_limiter.record_success();
                    debug!("[Lookup {}] {:?}", request.cluster_id, place.display_name());
                    return PlaceLookup {
                        cluster_id: request.cluster_id,
                        place: Some(place),
                        success: true,
                        error: None,
                    };
                }
                ApiOutcome::NoResults => {
                    self.rate_limiter.record_success();
                    return PlaceLookup {
                        cluster_id: request.cluster_id,
                        place: None,
                        success: true,
                        error: None,
                    };
                }
                ApiOutcome::Failed(msg) => {
                    warn!("[Lookup {}] API error: {}", request.cluster_id, msg);
                    return PlaceLookup::failed(request.cluster_id, msg);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_dispatch_rate_limiter() {
        let limiter = DispatchRateLimiter::new(Duration::from_millis(50));

        // First request should not wait
        let start = Instant::now();
        let num = limiter.wait_for_dispatch_slot().await;
        assert_eq!(num, 1);
        assert!(start.elapsed() < Duration::from_millis(10));

        // Second request should wait ~50ms
        let start2 = Instant::now();
        let num2 = limiter.wait_for_dispatch_slot().await;
        assert_eq!(num2, 2);
        let elapsed = start2.elapsed();
        assert!(elapsed >= Duration::from_millis(40), "Expected ~50ms wait, got {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(150), "Expected ~50ms wait, got {:?}", elapsed);
    }

    #[test]
    fn test_throttle_backoff_grows_and_resets() {
        let limiter = DispatchRateLimiter::new(Duration::ZERO);
        let first = limiter.record_throttle();
        let second = limiter.record_throttle();
        assert!(second > first);
        limiter.record_success();
        assert_eq!(limiter.record_throttle(), first);
    }

    #[test]
    fn test_parse_nearby_first_result() {
        let body = br#"{
            "status": "OK",
            "results": [
                { "name": "Grit Coffee", "types": ["cafe", "food", "establishment"], "vicinity": "19 Elliewood Ave" },
                { "name": "Corner Bookstore", "types": ["book_store"] }
            ]
        }"#;
        let ApiOutcome::Found(place) = parse_nearby(body) else {
            panic!("expected a place");
        };
        assert_eq!(place.name.as_deref(), Some("Grit Coffee"));
        assert_eq!(place.types, vec!["cafe", "food", "establishment"]);
        assert_eq!(place.address.as_deref(), Some("19 Elliewood Ave"));
    }

    #[test]
    fn test_parse_geocode_point_of_interest() {
        let body = br#"{
            "status": "OK",
            "results": [{
                "formatted_address": "Rotunda, 1826 University Ave, Charlottesville, VA 22904, USA",
                "types": ["establishment", "point_of_interest"],
                "address_components": [
                    { "long_name": "1826", "types": ["street_number"] },
                    { "long_name": "Rotunda", "types": ["point_of_interest", "establishment"] }
                ]
            }]
        }"#;
        let ApiOutcome::Found(place) = parse_geocode(body) else {
            panic!("expected a place");
        };
        assert_eq!(place.business_name.as_deref(), Some("Rotunda"));
        assert!(place.address.unwrap().starts_with("Rotunda, 1826"));
    }

    #[test]
    fn test_parse_statuses() {
        assert_eq!(parse_nearby(br#"{"status":"ZERO_RESULTS","results":[]}"#), ApiOutcome::NoResults);
        assert_eq!(parse_geocode(br#"{"status":"OVER_QUERY_LIMIT"}"#), ApiOutcome::Throttled);
        assert_eq!(
            parse_geocode(br#"{"status":"REQUEST_DENIED","error_message":"The provided API key is invalid."}"#),
            ApiOutcome::Failed("REQUEST_DENIED: The provided API key is invalid.".to_string())
        );
        assert!(matches!(parse_nearby(b"<html>"), ApiOutcome::Failed(_)));
    }

    #[test]
    fn test_client_requires_key() {
        let config = PlacesConfig::default();
        assert!(matches!(PlacesClient::new("  ", config.clone()), Err(Error::Config(_))));
        assert!(PlacesClient::new("test-key", config).is_ok());
    }

    #[test]
    fn test_endpoint_and_params() {
        let config = PlacesConfig {
            provider: PlacesProvider::NearbySearch,
            base_url: "http://localhost:9/maps/api/".to_string(),
            radius_meters: 75,
            ..PlacesConfig::default()
        };
        let client = PlacesClient::new("k", config).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:9/maps/api/place/nearbysearch/json");

        let params = client.query_params(&GpsPoint::new(38.5, -78.25));
        assert_eq!(params[0], ("location", "38.5,-78.25".to_string()));
        assert_eq!(params[1], ("radius", "75".to_string()));
        assert_eq!(params[2], ("key", "k".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_failure() {
        let config = PlacesConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            max_retries: 0,
            timeout_secs: 2,
            dispatch_interval_ms: 0,
            ..PlacesConfig::default()
        };
        let client = PlacesClient::new("SECRET-KEY-123", config).unwrap();
        let results = client
            .lookup_all(
                vec![PlaceRequest { cluster_id: 7, location: GpsPoint::new(38.0, -78.5) }],
                None,
            )
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].cluster_id, 7);
        assert!(!results[0].success);

        let error = results[0].error.as_deref().unwrap();
        assert!(error.starts_with("Request error"));
        assert!(!error.contains("SECRET-KEY-123"), "key leaked: {}", error);
    }

    // ------------------------------------------------------------------------
    // Local HTTP stub
    // ------------------------------------------------------------------------

    const GEOCODE_OK: &str = r#"{"status":"OK","results":[{"formatted_address":"1 Main St","types":["street_address"]}]}"#;

    /// Serve `responses` in order, one per connection; the last one repeats.
    /// Returns the base URL and a request counter.
    async fn stub_server(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses[n.min(responses.len() - 1)];

                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => break,
                        Ok(m) => read += m,
                    }
                }

                let reply = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), hits)
    }

    fn stub_client(base_url: String, max_retries: u32) -> PlacesClient {
        let config = PlacesConfig {
            base_url,
            max_retries,
            timeout_secs: 5,
            dispatch_interval_ms: 0,
            ..PlacesConfig::default()
        };
        PlacesClient::new("k", config).unwrap()
    }

    fn request() -> PlaceRequest {
        PlaceRequest { cluster_id: 3, location: GpsPoint::new(38.0, -78.5) }
    }

    #[tokio::test]
    async fn test_retries_after_429() {
        let (url, hits) = stub_server(vec![(429, "{}"), (200, GEOCODE_OK)]).await;
        let client = stub_client(url, 3);

        let result = client.lookup_single(&request()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.place.and_then(|p| p.address).as_deref(), Some("1 Main St"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_over_query_limit_gives_up_after_max_retries() {
        let (url, hits) = stub_server(vec![(200, r#"{"status":"OVER_QUERY_LIMIT"}"#)]).await;
        let client = stub_client(url, 1);

        let result = client.lookup_single(&request()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("OVER_QUERY_LIMIT"));
        // First attempt plus one retry
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_results_is_success_without_place() {
        let (url, hits) = stub_server(vec![(200, r#"{"status":"ZERO_RESULTS","results":[]}"#)]).await;
        let client = stub_client(url, 3);

        let results = client.lookup_all(vec![request()], None).await;
        assert!(results[0].success);
        assert!(results[0].place.is_none());
        assert!(results[0].error.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_failure_without_retry() {
        let (url, hits) = stub_server(vec![(500, "{}")]).await;
        let client = stub_client(url, 3);

        let result = client.lookup_single(&request()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("HTTP 500"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
