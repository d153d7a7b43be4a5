//! Request dispatch
//!
//! Handlers never run on a connection's I/O thread. The connection submits
//! a fully assembled request to the shared [`WorkerPool`]; the worker runs
//! the [`Handler`], normalizes the response and sends it back over the
//! connection's completion channel, waking the I/O thread's `poll`.
//!
//! Cancellation is cooperative. Each request carries a [`CancelToken`] that
//! the connection trips on RST_STREAM, GOAWAY or teardown. A job whose token
//! is already tripped when a worker picks it up is skipped, and a response
//! produced for a cancelled request is dropped. Nothing is rolled back:
//! handlers with side effects must poll [`CancelToken::is_cancelled`]
//! themselves.

use crate::http::{HttpRequest, HttpResponse, Status};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Application request handler
///
/// Called on a worker thread with the request and the token of the stream
/// or connection serving it. Returns exactly one response. A panic becomes
/// a 500 response.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: &HttpRequest, cancel: &CancelToken) -> HttpResponse;
}

impl<F> Handler for F
where
    F: Fn(&HttpRequest, &CancelToken) -> HttpResponse + Send + Sync + 'static,
{
    fn handle(&self, request: &HttpRequest, cancel: &CancelToken) -> HttpResponse {
        self(request, cancel)
    }
}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The worker pool no longer accepts jobs
#[derive(Debug, thiserror::Error)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of handler threads
///
/// Dropping the pool closes the queue; workers finish queued jobs and exit.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one)
    pub fn new(size: usize) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size.max(1));
        for id in 0..size.max(1) {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("tlsmux-worker-{}", id))
                .spawn(move || worker_loop(&receiver))?;
            workers.push(handle);
        }

        Ok(WorkerPool {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Queue a job
    pub fn execute<F>(&self, job: F) -> Result<(), PoolClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock().map_err(|_| PoolClosed)?;
        let sender = guard.as_ref().ok_or(PoolClosed)?;
        sender.send(Box::new(job)).map_err(|_| PoolClosed)
    }

    /// Stop accepting jobs and wait for the workers to drain the queue
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let workers = self.workers.lock().map(|w| w.len()).unwrap_or(0);
        f.debug_struct("WorkerPool")
            .field("workers", &workers)
            .finish()
    }
}

fn worker_loop(receiver: &Mutex<mpsc::Receiver<Job>>) {
    loop {
        // the lock is released before the job runs
        let job = match receiver.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => return,
        };
        match job {
            Ok(job) => job(),
            Err(_) => return,
        }
    }
}

/// Write end of a waker; cloneable across worker threads
#[derive(Debug, Clone)]
pub struct Waker {
    writer: Arc<UnixStream>,
}

impl Waker {
    /// Make the paired [`WakeSignal`] readable
    pub fn wake(&self) {
        // a full socket buffer already means "readable"
        let _ = (&*self.writer).write(&[1]);
    }
}

/// Read end of a waker, polled next to the connection socket
#[derive(Debug)]
pub struct WakeSignal {
    reader: UnixStream,
}

impl WakeSignal {
    pub fn raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// Consume pending wake-ups
    pub fn drain(&mut self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = self.reader.read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }
}

/// Create a connected waker pair
pub fn waker() -> io::Result<(Waker, WakeSignal)> {
    let (writer, reader) = UnixStream::pair()?;
    writer.set_nonblocking(true)?;
    reader.set_nonblocking(true)?;
    Ok((
        Waker {
            writer: Arc::new(writer),
        },
        WakeSignal { reader },
    ))
}

/// A finished handler invocation
#[derive(Debug)]
pub struct Completion {
    /// HTTP/2 stream id, 0 on HTTP/1.1
    pub stream_id: u32,
    pub response: HttpResponse,
}

/// Sending half of a connection's completion channel
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::Sender<Completion>,
    waker: Waker,
}

impl CompletionSender {
    /// Deliver a completion and wake the connection
    ///
    /// Returns false when the connection is gone.
    pub fn send(&self, completion: Completion) -> bool {
        let delivered = self.tx.send(completion).is_ok();
        if delivered {
            self.waker.wake();
        }
        delivered
    }
}

/// Receiving half, owned by the connection's I/O thread
#[derive(Debug)]
pub struct CompletionReceiver {
    rx: mpsc::Receiver<Completion>,
    signal: WakeSignal,
}

impl CompletionReceiver {
    /// Descriptor that turns readable when completions arrive
    pub fn raw_fd(&self) -> RawFd {
        self.signal.raw_fd()
    }

    /// Take every completion delivered so far without blocking
    pub fn drain(&mut self) -> Vec<Completion> {
        self.signal.drain();
        self.rx.try_iter().collect()
    }

    /// Block until one completion arrives
    pub fn recv(&mut self) -> Option<Completion> {
        let completion = self.rx.recv().ok();
        self.signal.drain();
        completion
    }
}

/// Create a completion channel for one connection
pub fn completion_channel() -> io::Result<(CompletionSender, CompletionReceiver)> {
    let (tx, rx) = mpsc::channel();
    let (waker, signal) = waker()?;
    Ok((
        CompletionSender { tx, waker },
        CompletionReceiver { rx, signal },
    ))
}

/// Runs handlers on the worker pool
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn Handler>,
    pool: Arc<WorkerPool>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn Handler>, pool: Arc<WorkerPool>) -> Self {
        Dispatcher { handler, pool }
    }

    /// Submit a request; its response arrives on `completions`
    pub fn dispatch(
        &self,
        stream_id: u32,
        request: HttpRequest,
        cancel: CancelToken,
        completions: CompletionSender,
    ) -> Result<(), PoolClosed> {
        let handler = Arc::clone(&self.handler);
        self.pool.execute(move || {
            if cancel.is_cancelled() {
                tracing::debug!(stream_id, "skipping cancelled request");
                return;
            }
            let response = invoke(handler.as_ref(), &request, &cancel);
            if cancel.is_cancelled() {
                tracing::debug!(stream_id, "dropping response of cancelled request");
                return;
            }
            completions.send(Completion {
                stream_id,
                response,
            });
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Run the handler, turning a panic into a 500, then normalize headers
pub fn invoke(handler: &dyn Handler, request: &HttpRequest, cancel: &CancelToken) -> HttpResponse {
    let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request, cancel)));
    let response = result.unwrap_or_else(|_| {
        tracing::error!(path = request.path(), "handler panicked");
        HttpResponse::new(Status::INTERNAL_SERVER_ERROR)
    });
    finalize(response)
}

/// Default the content type of non-empty bodies and make
/// `content-length` match the body
pub fn finalize(mut response: HttpResponse) -> HttpResponse {
    let len = response.body().len();
    let headers = response.headers_mut();
    if len > 0 && !headers.contains("content-type") {
        headers.insert("content-type", "application/octet-stream");
    }
    headers.set("content-length", len.to_string());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use std::time::Duration;

    fn get(path: &str) -> HttpRequest {
        HttpRequest::new(Method::Get, path)
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_worker_pool_runs_jobs() {
        let pool = WorkerPool::new(4).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..16 {
            let tx = tx.clone();
            pool.execute(move || tx.send(i).unwrap()).unwrap();
        }
        let mut seen: Vec<i32> = (0..16)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());

        pool.shutdown();
        assert!(pool.execute(|| {}).is_err());
    }

    #[test]
    fn test_finalize_defaults() {
        let mut response = HttpResponse::new(Status::OK);
        response.set_body(b"raw".to_vec());
        let response = finalize(response);
        assert_eq!(
            response.headers().get("content-type"),
            Some("application/octet-stream")
        );
        assert_eq!(response.headers().get("content-length"), Some("3"));

        let response = finalize(
            HttpResponse::builder()
                .header("Content-Type", "application/json")
                .header("Content-Length", "999")
                .body(b"{}".to_vec())
                .build(),
        );
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        assert_eq!(response.headers().get_all("content-length"), vec!["2"]);

        let response = finalize(HttpResponse::new(Status::NOT_FOUND));
        assert!(!response.headers().contains("content-type"));
        assert_eq!(response.headers().get("content-length"), Some("0"));
    }

    #[test]
    fn test_panic_becomes_500() {
        let handler = |_: &HttpRequest, _: &CancelToken| -> HttpResponse { panic!("boom") };
        let response = invoke(&handler, &get("/"), &CancelToken::new());
        assert_eq!(response.status(), Status::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get("content-length"), Some("0"));
    }

    #[test]
    fn test_dispatch_delivers_completion() {
        let handler = |req: &HttpRequest, _: &CancelToken| {
            HttpResponse::builder()
                .body(req.path().as_bytes().to_vec())
                .build()
        };
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let dispatcher = Dispatcher::new(Arc::new(handler), pool);
        let (tx, mut rx) = completion_channel().unwrap();

        dispatcher
            .dispatch(7, get("/hello?x=1"), CancelToken::new(), tx)
            .unwrap();

        let ready = crate::http::session::poll_fds(
            &[(rx.raw_fd(), crate::http::session::PollEvents::Read)],
            Some(Duration::from_secs(5)),
        )
        .unwrap();
        assert!(ready[0]);

        let completions = rx.drain();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].stream_id, 7);
        assert_eq!(completions[0].response.body(), b"/hello");
    }

    #[test]
    fn test_cancelled_job_never_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handler = move |_: &HttpRequest, _: &CancelToken| {
            flag.store(true, Ordering::SeqCst);
            HttpResponse::new(Status::OK)
        };
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let dispatcher = Dispatcher::new(Arc::new(handler), Arc::clone(&pool));
        let (tx, mut rx) = completion_channel().unwrap();

        let token = CancelToken::new();
        token.cancel();
        dispatcher.dispatch(1, get("/"), token, tx).unwrap();
        drop(dispatcher);
        pool.shutdown();

        assert!(!ran.load(Ordering::SeqCst));
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_response_of_cancelled_request_dropped() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let handler = move |_: &HttpRequest, _: &CancelToken| {
            started_tx.send(()).unwrap();
            let _ = release_rx.lock().unwrap().recv();
            HttpResponse::new(Status::OK)
        };
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let dispatcher = Dispatcher::new(Arc::new(handler), Arc::clone(&pool));
        let (tx, mut rx) = completion_channel().unwrap();

        let token = CancelToken::new();
        dispatcher.dispatch(3, get("/"), token.clone(), tx).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        token.cancel();
        release_tx.send(()).unwrap();
        drop(dispatcher);
        pool.shutdown();

        assert!(rx.drain().is_empty());
    }
}
