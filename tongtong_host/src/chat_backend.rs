use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use tongtong_core::{ChatError, ChatInbox, ChatTransport, InboundMessage};

/// Local chat backend: a worker thread that answers every message by pushing
/// a reply into the session's inbox.
pub struct EchoBackend {
    sender: Option<Sender<String>>,
    connected: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    worker: Option<JoinHandle<()>>,
}

impl EchoBackend {
    pub fn spawn(inbox: ChatInbox) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel::<String>();
        let connected = Arc::new(AtomicBool::new(true));
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_connected = connected.clone();
        let worker_pending = pending.clone();
        let worker = thread::Builder::new()
            .name("tongtong_chat".to_string())
            .spawn(move || {
                for message in rx {
                    inbox.push(InboundMessage::Answer(reply_to(&message)));
                    worker_pending.fetch_sub(1, Ordering::SeqCst);
                }
                worker_connected.store(false, Ordering::SeqCst);
            })
            .context("spawning chat backend thread")?;
        Ok(Self {
            sender: Some(tx),
            connected,
            pending,
            worker: Some(worker),
        })
    }

    /// Blocks until every sent message has been answered or `timeout` passes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
        true
    }
}

fn reply_to(message: &str) -> String {
    let question = message.rsplit(" | ").next().unwrap_or(message);
    format!("Tongtong heard: {question}")
}

impl ChatTransport for EchoBackend {
    fn is_connected(&self) -> bool {
        self.sender.is_some() && self.connected.load(Ordering::SeqCst)
    }

    fn send(&mut self, message: &str) -> Result<(), ChatError> {
        let sender = self.sender.as_ref().ok_or(ChatError::NotConnected)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        sender.send(message.to_string()).map_err(|err| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            ChatError::Transport(err.to_string())
        })
    }
}

impl Drop for EchoBackend {
    fn drop(&mut self) {
        self.sender = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
