use std::sync::{Arc, Mutex};
use tonic::codegen::{Context, Poll, Service, http};

/// Transport wrapper that records the URI path of every request it
/// dispatches, so tests can assert exactly how much network work happened.
#[derive(Clone)]
pub struct CountingService<S> {
    inner: S,
    calls: Arc<Mutex<Vec<String>>>,
}

impl<S> CountingService<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn log(&self) -> CallLog {
        CallLog(Arc::clone(&self.calls))
    }
}

impl<S, B> Service<http::Request<B>> for CountingService<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        self.calls
            .lock()
            .unwrap()
            .push(request.uri().path().to_string());
        self.inner.call(request)
    }
}

/// Snapshot access to the paths recorded by a [`CountingService`].
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn total(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn matching(&self, path: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|p| *p == path).count()
    }
}
