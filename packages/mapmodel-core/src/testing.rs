// In-memory transport used by client and pipeline tests
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::upstream::{Transport, TransportResponse};

pub type Step = Result<TransportResponse, String>;

pub fn ok(body: &str) -> Step {
    Ok(TransportResponse {
        status: 200,
        body: body.to_string(),
    })
}

pub fn status(code: u16) -> Step {
    Ok(TransportResponse {
        status: code,
        body: String::new(),
    })
}

type Handler = Box<dyn Fn(&str) -> Step + Send + Sync>;

pub struct FakeTransport {
    script: Mutex<VecDeque<Step>>,
    handler: Option<Handler>,
    delay: Duration,
    calls: Mutex<Vec<(String, String)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeTransport {
    /// Answers calls with `steps` in order; a network error once exhausted.
    pub fn scripted(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            handler: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Answers every call by running `handler` on the query text.
    pub fn answering(handler: impl Fn(&str) -> Step + Send + Sync + 'static) -> Self {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::scripted(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    pub fn queries(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, q)| q.clone()).collect()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn post<'a>(&'a self, endpoint: &'a str, query: &'a str) -> BoxFuture<'a, Step> {
        async move {
            self.calls
                .lock()
                .push((endpoint.to_string(), query.to_string()));
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            match &self.handler {
                Some(handler) => handler(query),
                None => self
                    .script
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| Err("script exhausted".to_string())),
            }
        }
        .boxed()
    }
}
