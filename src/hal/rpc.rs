//! Process-wide blocking RPC dispatcher.
//!
//! All on-device service calls route through one worker pool so that the
//! transport has a bounded, pre-started set of call threads before the
//! first keystore operation. The pool is a process-wide singleton managed
//! by the engine's `init()`/`shutdown()` pair; dispatching before `start`
//! fails rather than silently running inline.

use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;

use super::HalError;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Pool {
    sender: mpsc::Sender<Job>,
    workers: Vec<thread::JoinHandle<()>>,
}

static POOL: Mutex<Option<Pool>> = Mutex::new(None);

/// Start the dispatcher with `threads` workers.
///
/// Returns `false` when the pool was already running (the call is a no-op
/// then; the existing pool is kept).
pub fn start(threads: usize) -> bool {
    let mut guard = POOL.lock().expect("rpc pool mutex poisoned");
    if guard.is_some() {
        return false;
    }
    let threads = threads.max(1);
    let (sender, receiver) = mpsc::channel::<Job>();
    let receiver = std::sync::Arc::new(Mutex::new(receiver));
    let mut workers = Vec::with_capacity(threads);
    for index in 0..threads {
        let receiver = receiver.clone();
        let handle = thread::Builder::new()
            .name(format!("hal-rpc-{index}"))
            .spawn(move || loop {
                let job = {
                    let receiver = receiver.lock().expect("rpc receiver mutex poisoned");
                    receiver.recv()
                };
                match job {
                    Ok(job) => job(),
                    // Channel closed: shutdown.
                    Err(_) => break,
                }
            })
            .expect("failed to spawn rpc worker");
        workers.push(handle);
    }
    *guard = Some(Pool { sender, workers });
    true
}

/// Stop the dispatcher and join all workers. Idempotent.
pub fn shutdown() {
    let pool = POOL.lock().expect("rpc pool mutex poisoned").take();
    let Some(pool) = pool else { return };
    drop(pool.sender);
    for worker in pool.workers {
        let _ = worker.join();
    }
}

/// True when the dispatcher is running.
pub fn is_running() -> bool {
    POOL.lock().expect("rpc pool mutex poisoned").is_some()
}

/// Run `call` on a dispatcher thread and wait for its result.
pub fn dispatch<T, F>(call: F) -> Result<T, HalError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (result_tx, result_rx) = mpsc::channel();
    {
        let guard = POOL.lock().expect("rpc pool mutex poisoned");
        let Some(pool) = guard.as_ref() else {
            return Err(HalError::Unavailable("rpc dispatcher not started".into()));
        };
        pool.sender
            .send(Box::new(move || {
                let _ = result_tx.send(call());
            }))
            .map_err(|_| HalError::Unavailable("rpc dispatcher stopped".into()))?;
    }
    result_rx
        .recv()
        .map_err(|_| HalError::Unavailable("rpc worker died mid-call".into()))
}
