//! Poll-driven HTTP GET client
//!
//! [`RetroHttp`] runs one GET at a time on a private tokio runtime. The
//! worker only streams owned events over a channel; the response body is
//! handed to the caller's sink from [`RetroHttp::poll_get`], on the caller's
//! thread.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, warn};

/// Receives each body chunk with the total length (0 if unknown).
pub type DataSink = Box<dyn FnMut(&[u8], u64) -> io::Result<()>>;

type Wakeup = Arc<dyn Fn() + Send + Sync>;

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// Events the worker may queue ahead of `poll_get`. A full queue pauses the
/// download until the caller catches up.
const CHANNEL_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    #[error("failed in init: {0}")]
    InInit(String),

    #[error("worker failed in data cb")]
    WorkerBadData,

    #[error("server HTTP status code failed: {0}")]
    HttpStatus(u16),

    #[error("dataCb failed: {0}")]
    DataCallback(String),

    #[error("{0}")]
    Transport(String),

    #[error("a request is already in progress")]
    Busy,
}

impl HttpError {
    /// Numeric code of the error, matching the classic status values.
    pub fn code(&self) -> i32 {
        match self {
            Self::InInit(_) => -4,
            Self::WorkerBadData => -3,
            Self::HttpStatus(_) => -2,
            Self::DataCallback(_) => -1,
            Self::Transport(_) => 1,
            Self::Busy => 2,
        }
    }
}

/// Client settings.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub user_agent: String,
    /// Limit on a whole transfer, body included
    pub timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            user_agent: "libretro".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollStatus {
    /// Fraction of the body received so far (0 while the length is unknown)
    InProgress(f32),
    /// Finished, with or without an error
    Done,
}

#[derive(Debug)]
enum TransferEvent {
    Status(u16),
    Length(Option<u64>),
    Chunk(Vec<u8>),
    Finished,
    Failed(String),
}

struct Outbox {
    tx: mpsc::Sender<TransferEvent>,
    wakeup: Option<Wakeup>,
}

impl Outbox {
    /// False once the client stopped listening.
    async fn send(&self, event: TransferEvent) -> bool {
        let ok = self.tx.send(event).await.is_ok();
        if let Some(wakeup) = &self.wakeup {
            wakeup();
        }
        ok
    }
}

async fn fetch(client: reqwest::Client, url: reqwest::Url, outbox: Outbox) {
    let mut response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            outbox.send(TransferEvent::Failed(e.to_string())).await;
            return;
        }
    };
    let status = response.status().as_u16();
    if !outbox.send(TransferEvent::Status(status)).await {
        return;
    }
    if status >= 400 {
        outbox.send(TransferEvent::Finished).await;
        return;
    }
    if !outbox.send(TransferEvent::Length(response.content_length())).await {
        return;
    }
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if !outbox.send(TransferEvent::Chunk(chunk.to_vec())).await {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                outbox.send(TransferEvent::Failed(e.to_string())).await;
                return;
            }
        }
    }
    outbox.send(TransferEvent::Finished).await;
}

struct Transfer {
    rx: mpsc::Receiver<TransferEvent>,
    pending: VecDeque<TransferEvent>,
    task: tokio::task::JoinHandle<()>,
    sink: DataSink,
    received: u64,
    total: u64,
    finished: bool,
}

/// HTTP client with a single active GET.
pub struct RetroHttp {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
    transfer: Option<Transfer>,
    error: Option<HttpError>,
    status_code: Option<u16>,
    url_path: Option<String>,
    wakeup: Option<Wakeup>,
}

impl RetroHttp {
    pub fn new(options: HttpOptions) -> Result<Self, HttpError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("retrohttp")
            .enable_all()
            .build()
            .map_err(|e| HttpError::InInit(e.to_string()))?;
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent)
            .timeout(options.timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| HttpError::InInit(e.to_string()))?;
        Ok(Self {
            runtime,
            client,
            transfer: None,
            error: None,
            status_code: None,
            url_path: None,
            wakeup: None,
        })
    }

    /// Call `f` from the worker thread whenever a transfer has news.
    pub fn set_wakeup(&mut self, f: impl Fn() + Send + Sync + 'static) {
        self.wakeup = Some(Arc::new(f));
    }

    /// Start fetching `url`, feeding the body to `sink` during [`Self::poll_get`].
    pub fn start_get(&mut self, url: &str, sink: DataSink) -> Result<(), HttpError> {
        if self.transfer.as_ref().is_some_and(|t| !t.finished) {
            return Err(HttpError::Busy);
        }
        self.remove_get();
        self.error = None;
        self.status_code = None;

        let url = reqwest::Url::parse(url)
            .map_err(|e| HttpError::Transport(format!("{url}: {e}")))?;
        self.url_path = Some(url.path().to_string());
        debug!("GET {}", url);

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let outbox = Outbox { tx, wakeup: self.wakeup.clone() };
        let task = self.runtime.spawn(fetch(self.client.clone(), url, outbox));
        self.transfer = Some(Transfer {
            rx,
            pending: VecDeque::new(),
            task,
            sink,
            received: 0,
            total: 0,
            finished: false,
        });
        Ok(())
    }

    /// Block until the worker has news or `timeout` elapses.
    ///
    /// Returns true if an event is ready for [`Self::poll_get`].
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let Some(t) = self.transfer.as_mut().filter(|t| !t.finished) else {
            return false;
        };
        if !t.pending.is_empty() {
            return true;
        }
        match self.runtime.block_on(tokio::time::timeout(timeout, t.rx.recv())) {
            Ok(Some(event)) => {
                t.pending.push_back(event);
                true
            }
            // poll_get reports the lost worker
            Ok(None) => true,
            Err(_elapsed) => false,
        }
    }

    /// Process everything the worker sent so far.
    pub fn poll_get(&mut self) -> PollStatus {
        let Some(t) = self.transfer.as_mut() else {
            return PollStatus::Done;
        };
        while !t.finished {
            let event = match t.pending.pop_front() {
                Some(event) => event,
                None => match t.rx.try_recv() {
                    Ok(event) => event,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        warn!("http worker exited without finishing");
                        self.error.get_or_insert(HttpError::WorkerBadData);
                        t.finished = true;
                        break;
                    }
                },
            };
            match event {
                TransferEvent::Status(code) => {
                    self.status_code = Some(code);
                    if code >= 400 {
                        self.error = Some(HttpError::HttpStatus(code));
                    }
                }
                TransferEvent::Length(total) => t.total = total.unwrap_or(0),
                TransferEvent::Chunk(bytes) => {
                    t.received += bytes.len() as u64;
                    if let Err(e) = (t.sink)(&bytes, t.total) {
                        self.error = Some(HttpError::DataCallback(e.to_string()));
                        t.task.abort();
                        t.finished = true;
                    }
                }
                TransferEvent::Finished => t.finished = true,
                TransferEvent::Failed(msg) => {
                    self.error = Some(HttpError::Transport(msg));
                    t.finished = true;
                }
            }
        }
        if t.finished {
            PollStatus::Done
        } else {
            PollStatus::InProgress(Self::fraction(t))
        }
    }

    fn fraction(t: &Transfer) -> f32 {
        if t.total == 0 {
            0.0
        } else {
            (t.received as f64 / t.total as f64).min(1.0) as f32
        }
    }

    /// Fraction of the current body received so far.
    pub fn progress(&self) -> f32 {
        self.transfer.as_ref().map_or(0.0, Self::fraction)
    }

    pub fn is_running(&self) -> bool {
        self.transfer.as_ref().is_some_and(|t| !t.finished)
    }

    pub fn error(&self) -> Option<&HttpError> {
        self.error.as_ref()
    }

    /// 0 when there is no error.
    pub fn error_code(&self) -> i32 {
        self.error.as_ref().map_or(0, HttpError::code)
    }

    pub fn error_string(&self) -> String {
        match &self.error {
            Some(e) => e.to_string(),
            None if self.transfer.is_some() => "request in progress".to_string(),
            None => "no error".to_string(),
        }
    }

    /// HTTP status of the current transfer, once headers arrived.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Path component of the last requested URL.
    pub fn url_path(&self) -> Option<&str> {
        self.url_path.as_deref()
    }

    /// Cancel and forget the current transfer. Error and status are kept.
    pub fn remove_get(&mut self) {
        if let Some(t) = self.transfer.take() {
            t.task.abort();
        }
    }

    /// Drop the transfer and every piece of state it left behind.
    pub fn reset(&mut self) {
        self.remove_get();
        self.error = None;
        self.status_code = None;
        self.url_path = None;
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }
}

impl std::fmt::Debug for RetroHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetroHttp")
            .field("running", &self.is_running())
            .field("error", &self.error)
            .field("status_code", &self.status_code)
            .field("url_path", &self.url_path)
            .finish_non_exhaustive()
    }
}
