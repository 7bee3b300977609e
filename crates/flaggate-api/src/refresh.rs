//! Tells the flag evaluation runtime to reload its configuration.
//!
//! Mutations call [`RefreshQueue::signal`], which never blocks. One worker
//! drains the queue; every signal waiting when a refresh starts is satisfied
//! by that refresh. Failed refreshes are retried with exponential backoff and
//! finally logged.

use std::{future::Future, time::Duration};

use flaggate_core::{Error, Result};
use reqwest::Client;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const REFRESH_PATH: &str = "/admin/v1/retriever/refresh";

/// Something that can be asked to refresh.
pub trait RefreshTarget: Send + Sync + 'static {
  /// Fails with [`Error::UpstreamUnavailable`].
  fn refresh(&self) -> impl Future<Output = Result<()>> + Send + '_;
}

// ─── HTTP target ─────────────────────────────────────────────────────────────

/// POSTs to `{url}/admin/v1/retriever/refresh`.
#[derive(Clone)]
pub struct HttpRefreshTarget {
  client:       Client,
  endpoint:     String,
  bearer_token: Option<String>,
}

impl HttpRefreshTarget {
  pub fn new(url: &str, bearer_token: Option<String>) -> Result<Self, reqwest::Error> {
    let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
    Ok(Self {
      client,
      endpoint: format!("{}{REFRESH_PATH}", url.trim_end_matches('/')),
      bearer_token: bearer_token.filter(|t| !t.is_empty()),
    })
  }

  pub fn endpoint(&self) -> &str { &self.endpoint }
}

impl RefreshTarget for HttpRefreshTarget {
  async fn refresh(&self) -> Result<()> {
    let mut req = self.client.post(&self.endpoint);
    if let Some(token) = &self.bearer_token {
      req = req.bearer_auth(token);
    }
    let resp = req
      .send()
      .await
      .map_err(|e| Error::UpstreamUnavailable(format!("POST {}: {e}", self.endpoint)))?;
    if !resp.status().is_success() {
      return Err(Error::UpstreamUnavailable(format!(
        "POST {} → {}",
        self.endpoint,
        resp.status()
      )));
    }
    Ok(())
  }
}

// ─── Queue ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
  pub capacity:     usize,
  pub max_attempts: u32,
  /// Delay before the first retry; doubles on each further attempt.
  pub backoff:      Duration,
}

impl Default for RefreshSettings {
  fn default() -> Self {
    Self {
      capacity:     64,
      max_attempts: 3,
      backoff:      Duration::from_millis(500),
    }
  }
}

enum Request {
  Signal(String),
  Now(oneshot::Sender<Result<()>>),
}

/// Handle to the refresh worker. Cheap to clone.
#[derive(Clone)]
pub struct RefreshQueue {
  tx: Option<mpsc::Sender<Request>>,
}

impl RefreshQueue {
  /// Start the worker on the current runtime.
  pub fn spawn<T: RefreshTarget>(target: T, settings: RefreshSettings) -> Self {
    let (tx, rx) = mpsc::channel(settings.capacity.max(1));
    tokio::spawn(worker(target, settings, rx));
    Self { tx: Some(tx) }
  }

  /// A queue with no target: signals are ignored.
  pub fn disabled() -> Self { Self { tx: None } }

  pub fn is_enabled(&self) -> bool { self.tx.is_some() }

  /// Ask for a refresh without waiting for it.
  pub fn signal(&self, reason: impl Into<String>) {
    let Some(tx) = &self.tx else { return };
    match tx.try_send(Request::Signal(reason.into())) {
      Ok(()) => {}
      // A full queue already holds a refresh that will cover this one.
      Err(mpsc::error::TrySendError::Full(_)) => debug!("refresh already pending"),
      Err(mpsc::error::TrySendError::Closed(_)) => warn!("refresh worker stopped"),
    }
  }

  /// Refresh and wait for the outcome, retries included.
  pub async fn refresh_now(&self) -> Result<()> {
    let Some(tx) = &self.tx else {
      return Err(Error::UpstreamUnavailable("no refresh target configured".into()));
    };
    let (done, wait) = oneshot::channel();
    tx.send(Request::Now(done))
      .await
      .map_err(|_| Error::UpstreamUnavailable("refresh worker stopped".into()))?;
    wait
      .await
      .map_err(|_| Error::UpstreamUnavailable("refresh worker stopped".into()))?
  }
}

async fn worker<T: RefreshTarget>(
  target: T,
  settings: RefreshSettings,
  mut rx: mpsc::Receiver<Request>,
) {
  while let Some(first) = rx.recv().await {
    let mut reasons = Vec::new();
    let mut waiters = Vec::new();
    let mut take = |req: Request| match req {
      Request::Signal(reason) => reasons.push(reason),
      Request::Now(done) => waiters.push(done),
    };
    take(first);
    while let Ok(req) = rx.try_recv() {
      take(req);
    }

    let outcome = refresh_with_retry(&target, &settings).await;
    match &outcome {
      Ok(()) => info!(signals = reasons.len(), "refreshed evaluation runtime"),
      Err(e) => warn!(?reasons, error = %e, "refresh failed; giving up"),
    }
    for done in waiters {
      let _ = done.send(match &outcome {
        Ok(()) => Ok(()),
        Err(e) => Err(Error::UpstreamUnavailable(e.to_string())),
      });
    }
  }
}

async fn refresh_with_retry<T: RefreshTarget>(target: &T, settings: &RefreshSettings) -> Result<()> {
  let attempts = settings.max_attempts.max(1);
  let mut delay = settings.backoff;
  let mut attempt = 1;
  loop {
    match target.refresh().await {
      Ok(()) => return Ok(()),
      Err(e) if attempt >= attempts => return Err(e),
      Err(e) => {
        debug!(attempt, error = %e, "refresh attempt failed; retrying");
        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2);
        attempt += 1;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  use tokio::sync::Notify;

  use super::*;

  #[derive(Clone, Default)]
  struct Counting {
    calls: Arc<AtomicUsize>,
    gate:  Arc<Notify>,
    fail:  bool,
  }

  impl RefreshTarget for Counting {
    async fn refresh(&self) -> Result<()> {
      let n = self.calls.fetch_add(1, Ordering::SeqCst);
      if n == 0 && !self.fail {
        self.gate.notified().await;
      }
      if self.fail {
        Err(Error::UpstreamUnavailable("down".into()))
      } else {
        Ok(())
      }
    }
  }

  fn fast() -> RefreshSettings {
    RefreshSettings {
      capacity:     16,
      max_attempts: 3,
      backoff:      Duration::from_millis(1),
    }
  }

  #[tokio::test]
  async fn bursts_are_coalesced() {
    let target = Counting::default();
    let queue = RefreshQueue::spawn(target.clone(), fast());

    queue.signal("first");
    while target.calls.load(Ordering::SeqCst) == 0 {
      tokio::time::sleep(Duration::from_millis(1)).await;
    }
    for i in 0..5 {
      queue.signal(format!("burst {i}"));
    }
    let waiter = {
      let queue = queue.clone();
      tokio::spawn(async move { queue.refresh_now().await })
    };
    // Five signals and the waiter are queued behind the blocked refresh.
    let tx = queue.tx.clone().unwrap();
    while tx.capacity() > fast().capacity - 6 {
      tokio::time::sleep(Duration::from_millis(1)).await;
    }
    target.gate.notify_one();

    waiter.await.unwrap().unwrap();
    assert_eq!(target.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn failures_are_retried_then_reported() {
    let target = Counting {
      fail: true,
      ..Counting::default()
    };
    let queue = RefreshQueue::spawn(target.clone(), fast());

    let err = queue.refresh_now().await.unwrap_err();
    assert!(matches!(err, Error::UpstreamUnavailable(_)));
    assert_eq!(target.calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn disabled_queue_ignores_signals() {
    let queue = RefreshQueue::disabled();
    queue.signal("nothing happens");
    assert!(!queue.is_enabled());
    assert!(matches!(queue.refresh_now().await, Err(Error::UpstreamUnavailable(_))));
  }

  #[test]
  fn endpoint_joins_cleanly() {
    let t = HttpRefreshTarget::new("http://relay:1031/", None).unwrap();
    assert_eq!(t.endpoint(), "http://relay:1031/admin/v1/retriever/refresh");
  }
}
