// Shared test helpers: scripted DataSource and aggregator builders

#![allow(dead_code)]

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use t1d_pulse::aggregator::{Aggregator, AggregatorOptions, Category};
use t1d_pulse::fetch_client::{DataSource, Endpoint, FetchError, FetchResponse};

type Scripted = (Duration, Result<FetchResponse, FetchError>);

/// Per-URL scripted replies. Queued replies are consumed in order; the last one repeats.
#[derive(Default)]
pub struct FakeSource {
    replies: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, url: &str, delay: Duration, result: Result<FetchResponse, FetchError>) {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back((delay, result));
    }

    pub fn ok(&self, url: &str, data: serde_json::Value) {
        self.reply(url, Duration::ZERO, Ok(FetchResponse::new(data)));
    }

    pub fn ok_after(&self, url: &str, delay: Duration, data: serde_json::Value) {
        self.reply(url, delay, Ok(FetchResponse::new(data)));
    }

    pub fn fail(&self, url: &str, error: FetchError) {
        self.reply(url, Duration::ZERO, Err(error));
    }

    pub fn fail_after(&self, url: &str, delay: Duration, error: FetchError) {
        self.reply(url, delay, Err(error));
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn next(&self, url: &str) -> Scripted {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => (
                Duration::ZERO,
                Err(FetchError::Network(format!("no reply scripted for {}", url))),
            ),
        }
    }
}

impl DataSource for FakeSource {
    fn fetch<'a>(
        &'a self,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<FetchResponse, FetchError>> {
        let (delay, result) = self.next(&endpoint.url);
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }
}

/// Category `name` fetched from `fake://name`.
pub fn url(name: &str) -> String {
    format!("fake://{}", name)
}

pub fn categories(names: &[&str]) -> Vec<Category> {
    names
        .iter()
        .map(|n| Category::new(*n, Endpoint::get(url(n))))
        .collect()
}

pub fn aggregator(names: &[&str], source: Arc<FakeSource>) -> Arc<Aggregator> {
    aggregator_with(names, source, AggregatorOptions::default())
}

pub fn aggregator_with(
    names: &[&str],
    source: Arc<FakeSource>,
    options: AggregatorOptions,
) -> Arc<Aggregator> {
    Arc::new(Aggregator::new(categories(names), source, options).expect("valid categories"))
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}
