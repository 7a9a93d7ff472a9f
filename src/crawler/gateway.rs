//! Fetch gateway
//!
//! A gateway fires requests on behalf of a producer stage and queues every
//! outcome, success or failure, for a single consumer stage to drain. The
//! producer calls [`FetchGateway::close`] once it will submit nothing more;
//! the gateway then reports exhaustion as soon as in-flight fetches settle and
//! the queued outcomes have been drained.

use crate::crawler::fetcher::{fetch_url, BodyKind, FetchError, FetchOutcome};
use futures::future::join_all;
use reqwest::Client;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, Semaphore};

struct Outcomes {
    rx: mpsc::UnboundedReceiver<FetchOutcome>,
    // Outcomes received by `wait_ready` but not yet drained
    stash: VecDeque<FetchOutcome>,
}

/// Concurrent fetcher with a FIFO result stream
pub struct FetchGateway {
    label: &'static str,
    client: Client,
    kind: BodyKind,
    permits: Semaphore,
    sender: Mutex<Option<mpsc::UnboundedSender<FetchOutcome>>>,
    outcomes: tokio::sync::Mutex<Outcomes>,
}

impl FetchGateway {
    /// Creates a gateway
    ///
    /// # Arguments
    ///
    /// * `label` - Name used in logs (`pages`, `assets`)
    /// * `client` - HTTP client; timeouts are configured on it
    /// * `kind` - Whether bodies are read as text or bytes
    /// * `max_connections` - Cap on concurrent requests through this gateway
    pub fn new(label: &'static str, client: Client, kind: BodyKind, max_connections: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            label,
            client,
            kind,
            permits: Semaphore::new(max_connections.max(1)),
            sender: Mutex::new(Some(tx)),
            outcomes: tokio::sync::Mutex::new(Outcomes {
                rx,
                stash: VecDeque::new(),
            }),
        }
    }

    /// Fetches one URL without queuing the outcome
    ///
    /// Waits for a connection permit first. Failures are logged and returned
    /// as values; this never panics.
    pub async fn fetch_one(&self, url: &str) -> FetchOutcome {
        // The semaphore is never closed, so acquire only fails if that changes
        let _permit = self.permits.acquire().await.map_err(|_| FetchError::Closed {
            url: url.to_string(),
        })?;

        tracing::debug!(gateway = self.label, "Fetching {}", url);
        let outcome = fetch_url(&self.client, url, self.kind).await;
        match &outcome {
            Ok(fetched) => {
                tracing::debug!(
                    gateway = self.label,
                    bytes = fetched.body.len(),
                    "Received response from {}",
                    url
                );
            }
            Err(FetchError::Timeout { .. }) => {
                tracing::error!(gateway = self.label, "Timeout fetching {}", url);
            }
            Err(e) => {
                tracing::error!(gateway = self.label, "Failed to fetch {}: {}", url, e);
            }
        }
        outcome
    }

    /// Fetches all `urls` concurrently and queues each outcome
    ///
    /// Returns once every fetch has settled.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - All outcomes were queued
    /// * `Err(FetchError::Closed)` - The gateway was closed; nothing was fetched
    pub async fn submit<I>(&self, urls: I) -> Result<(), FetchError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut urls = urls.into_iter().peekable();
        let Some(tx) = self.sender_handle() else {
            let url = urls.peek().cloned().unwrap_or_default();
            return Err(FetchError::Closed { url });
        };

        let fetches = urls.map(|url| {
            let tx = tx.clone();
            async move {
                let outcome = self.fetch_one(&url).await;
                // The receiver lives as long as `self`
                let _ = tx.send(outcome);
            }
        });
        join_all(fetches).await;
        Ok(())
    }

    /// Waits until at least one outcome can be drained
    ///
    /// # Returns
    ///
    /// * `true` - An outcome is available
    /// * `false` - The gateway is closed and nothing is left
    pub async fn wait_ready(&self) -> bool {
        let mut outcomes = self.outcomes.lock().await;
        if !outcomes.stash.is_empty() {
            return true;
        }
        match outcomes.rx.recv().await {
            Some(outcome) => {
                outcomes.stash.push_back(outcome);
                true
            }
            None => false,
        }
    }

    /// Drains up to `batch_size` outcomes in FIFO order
    ///
    /// Blocks until `batch_size` outcomes are available. Returns fewer only
    /// when the gateway is exhausted, so an empty result means no more
    /// outcomes will ever arrive.
    pub async fn drain_results(&self, batch_size: usize) -> Vec<FetchOutcome> {
        let batch_size = batch_size.max(1);
        let mut outcomes = self.outcomes.lock().await;
        let mut batch = Vec::with_capacity(batch_size);

        while batch.len() < batch_size {
            if let Some(outcome) = outcomes.stash.pop_front() {
                batch.push(outcome);
                continue;
            }
            match outcomes.rx.recv().await {
                Some(outcome) => batch.push(outcome),
                None => break,
            }
        }

        batch
    }

    /// Declares that no further submissions will be made
    ///
    /// Submissions already running complete and their outcomes are still
    /// delivered. Closing twice is harmless.
    pub fn close(&self) {
        let mut sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.take().is_some() {
            tracing::debug!(gateway = self.label, "Gateway closed for submissions");
        }
    }

    /// Returns true once [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn sender_handle(&self) -> Option<mpsc::UnboundedSender<FetchOutcome>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetchConfig, UserAgentConfig};
    use crate::crawler::build_http_client;
    use crate::crawler::fetcher::Body;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn gateway(kind: BodyKind) -> FetchGateway {
        let client = build_http_client(&UserAgentConfig::default(), &FetchConfig::default()).unwrap();
        FetchGateway::new("test", client, kind, 4)
    }

    async fn server_with_pages(names: &[&str]) -> MockServer {
        let server = MockServer::start().await;
        for name in names {
            Mock::given(method("GET"))
                .and(path(format!("/wiki/{}", name)))
                .respond_with(ResponseTemplate::new(200).set_body_string(format!("page {}", name)))
                .mount(&server)
                .await;
        }
        server
    }

    /// Answers after `window`, tracking the most requests seen in flight
    struct Overlap {
        window: Duration,
        arrivals: Arc<Mutex<Vec<Instant>>>,
        peak: Arc<AtomicUsize>,
    }

    impl Respond for Overlap {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let now = Instant::now();
            let mut arrivals = self.arrivals.lock().unwrap();
            arrivals.retain(|at| now.duration_since(*at) < self.window);
            arrivals.push(now);
            self.peak.fetch_max(arrivals.len(), Ordering::SeqCst);
            ResponseTemplate::new(200).set_delay(self.window)
        }
    }

    #[tokio::test]
    async fn test_max_connections_caps_in_flight_requests() {
        let server = MockServer::start().await;
        let peak = Arc::new(AtomicUsize::new(0));
        Mock::given(method("GET"))
            .respond_with(Overlap {
                window: Duration::from_millis(150),
                arrivals: Arc::new(Mutex::new(Vec::new())),
                peak: Arc::clone(&peak),
            })
            .mount(&server)
            .await;

        let client = build_http_client(&UserAgentConfig::default(), &FetchConfig::default()).unwrap();
        let gateway = FetchGateway::new("test", client, BodyKind::Text, 3);
        let urls: Vec<String> = (0..8)
            .map(|i| format!("{}/wiki/P{}", server.uri(), i))
            .collect();
        gateway.submit(urls).await.unwrap();
        gateway.close();

        let outcomes = gateway.drain_results(100).await;
        assert_eq!(outcomes.len(), 8);
        assert!(outcomes.iter().all(Result::is_ok));

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "{} requests in flight", peak);
        assert!(peak > 1, "requests ran one at a time");
    }

    #[tokio::test]
    async fn test_submit_then_drain() {
        let server = server_with_pages(&["A", "B", "C"]).await;
        let gateway = gateway(BodyKind::Text);

        let urls: Vec<String> = ["A", "B", "C"]
            .iter()
            .map(|n| format!("{}/wiki/{}", server.uri(), n))
            .collect();
        gateway.submit(urls.clone()).await.unwrap();

        let batch = gateway.drain_results(3).await;
        assert_eq!(batch.len(), 3);
        let mut got: Vec<String> = batch.into_iter().map(|o| o.unwrap().url).collect();
        got.sort();
        assert_eq!(got, urls);
    }

    #[tokio::test]
    async fn test_failures_are_queued() {
        let server = server_with_pages(&["A"]).await;
        let gateway = gateway(BodyKind::Text);

        gateway
            .submit(vec![format!("{}/wiki/Missing", server.uri())])
            .await
            .unwrap();
        gateway.close();

        let batch = gateway.drain_results(5).await;
        assert_eq!(batch.len(), 1);
        assert!(matches!(batch[0], Err(FetchError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_drain_returns_short_batch_when_exhausted() {
        let server = server_with_pages(&["A", "B"]).await;
        let gateway = gateway(BodyKind::Text);

        gateway
            .submit(vec![
                format!("{}/wiki/A", server.uri()),
                format!("{}/wiki/B", server.uri()),
            ])
            .await
            .unwrap();
        gateway.close();

        assert_eq!(gateway.drain_results(10).await.len(), 2);
        assert!(gateway.drain_results(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_drain_blocks_until_batch_full() {
        let server = server_with_pages(&["A", "B"]).await;
        let gateway = Arc::new(gateway(BodyKind::Text));

        gateway
            .submit(vec![format!("{}/wiki/A", server.uri())])
            .await
            .unwrap();

        let drainer = {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.drain_results(2).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!drainer.is_finished());

        gateway
            .submit(vec![format!("{}/wiki/B", server.uri())])
            .await
            .unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(2), drainer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_wait_ready_keeps_outcome() {
        let server = server_with_pages(&["A"]).await;
        let gateway = gateway(BodyKind::Text);

        gateway
            .submit(vec![format!("{}/wiki/A", server.uri())])
            .await
            .unwrap();
        assert!(gateway.wait_ready().await);
        assert!(gateway.wait_ready().await);

        gateway.close();
        let batch = gateway.drain_results(5).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(
            batch[0].as_ref().unwrap().body,
            Body::Text("page A".to_string())
        );
    }

    #[tokio::test]
    async fn test_wait_ready_false_when_closed_empty() {
        let gateway = gateway(BodyKind::Binary);
        gateway.close();
        assert!(gateway.is_closed());
        assert!(!gateway.wait_ready().await);
    }

    #[tokio::test]
    async fn test_submit_after_close_is_rejected() {
        let gateway = gateway(BodyKind::Text);
        gateway.close();
        let err = gateway
            .submit(vec!["https://example.com/x".to_string()])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::Closed {
                url: "https://example.com/x".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_one_does_not_queue() {
        let server = server_with_pages(&["A"]).await;
        let gateway = gateway(BodyKind::Text);

        let fetched = gateway
            .fetch_one(&format!("{}/wiki/A", server.uri()))
            .await
            .unwrap();
        assert_eq!(fetched.body, Body::Text("page A".to_string()));

        gateway.close();
        assert!(gateway.drain_results(1).await.is_empty());
    }
}
