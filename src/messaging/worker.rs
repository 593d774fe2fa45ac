// Background worker - deferred execution of non-realtime-safe work
// Record preparation and finalization allocate and run quadratic pairing
// scans; they are queued here instead of running in the audio callback.
// Tasks run strictly in submission order on one thread, so concurrent
// finalizations cannot interleave.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::thread::JoinHandle;

enum WorkerMessage {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// A single worker thread draining a FIFO task queue.
pub struct BackgroundWorker {
    sender: Sender<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    pub fn spawn() -> Self {
        let (sender, receiver): (Sender<WorkerMessage>, Receiver<WorkerMessage>) = unbounded();

        let handle = std::thread::Builder::new()
            .name("midi-player-worker".into())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    match message {
                        WorkerMessage::Run(task) => task(),
                        WorkerMessage::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn worker thread");

        Self {
            sender,
            handle: Some(handle),
        }
    }

    /// Queue a task without blocking the caller.
    pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
        if self.sender.send(WorkerMessage::Run(Box::new(task))).is_err() {
            log::warn!("worker queue closed, dropping deferred task");
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerMessage::Shutdown);

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
