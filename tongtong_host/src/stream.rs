use std::io::{self, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use thiserror::Error;
use tongtong_stream::{
    encode_message, Heartbeat, Hello, MessageKind, PoseUpdate, SessionEventMessage,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream worker disconnected")]
    Disconnected,
    #[error("message encode failed: {0}")]
    Encode(#[from] tongtong_stream::ProtocolError),
}

enum Command {
    Send(Vec<u8>),
    Shutdown,
}

/// Publishes TongStream messages to a single connected subscriber.
pub struct StreamServer {
    sender: Sender<Command>,
    start: Instant,
    seq: AtomicU64,
}

impl StreamServer {
    pub fn bind<A: ToSocketAddrs>(addr: A, build: Option<String>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).context("binding stream socket")?;
        listener
            .set_nonblocking(true)
            .context("setting stream listener non-blocking")?;
        let (tx, rx) = mpsc::channel();
        let build_info = build.unwrap_or_else(|| "dev".to_string());
        thread::Builder::new()
            .name("tongtong_stream".to_string())
            .spawn(move || worker_loop(listener, rx, build_info))
            .context("spawning stream worker thread")?;
        Ok(Self {
            sender: tx,
            start: Instant::now(),
            seq: AtomicU64::new(0),
        })
    }

    fn stamp(&self) -> (u64, u64) {
        (
            self.seq.fetch_add(1, Ordering::Relaxed),
            self.start.elapsed().as_nanos() as u64,
        )
    }

    pub fn send_pose(&self, mut update: PoseUpdate) -> Result<(), StreamError> {
        let (seq, now) = self.stamp();
        update.seq = seq;
        if update.host_time_ns == 0 {
            update.host_time_ns = now;
        }
        self.send(encode_message(MessageKind::PoseUpdate, &update)?)
    }

    pub fn send_event(&self, label: &str, data: serde_json::Value) -> Result<(), StreamError> {
        let (seq, host_time_ns) = self.stamp();
        let message = SessionEventMessage {
            seq,
            host_time_ns,
            label: label.to_string(),
            data,
        };
        self.send(encode_message(MessageKind::SessionEvent, &message)?)
    }

    fn send(&self, bytes: Vec<u8>) -> Result<(), StreamError> {
        self.sender
            .send(Command::Send(bytes))
            .map_err(|_| StreamError::Disconnected)
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
    }
}

fn worker_loop(listener: TcpListener, rx: Receiver<Command>, build_info: String) {
    let mut stream: Option<TcpStream> = None;
    let mut last_heartbeat = Instant::now();
    let mut heartbeat_seq = 0u64;
    let started = Instant::now();
    loop {
        match rx.recv_timeout(Duration::from_millis(16)) {
            Ok(Command::Send(buffer)) => {
                if let Some(conn) = stream.as_mut() {
                    if let Err(err) = write_all(conn, &buffer) {
                        log::warn!("stream send failed: {err}; waiting for reconnect");
                        stream = None;
                    }
                }
            }
            Ok(Command::Shutdown) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if let Some(conn) = stream.as_mut() {
            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                last_heartbeat = Instant::now();
                heartbeat_seq += 1;
                let heartbeat = Heartbeat {
                    seq: heartbeat_seq,
                    host_time_ns: started.elapsed().as_nanos() as u64,
                };
                let sent = encode_message(MessageKind::Heartbeat, &heartbeat)
                    .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
                    .and_then(|bytes| write_all(conn, &bytes));
                if let Err(err) = sent {
                    log::warn!("stream heartbeat failed: {err}; waiting for reconnect");
                    stream = None;
                }
            }
        }

        if stream.is_none() {
            match listener.accept() {
                Ok((mut conn, addr)) => {
                    if let Err(err) = conn.set_nodelay(true) {
                        log::warn!("failed to configure stream connection from {addr}: {err}");
                        continue;
                    }
                    match send_hello(&mut conn, &build_info) {
                        Ok(()) => {
                            log::info!("stream subscriber connected from {addr}");
                            stream = Some(conn);
                        }
                        Err(err) => log::warn!("stream handshake error with {addr}: {err}"),
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    log::warn!("stream accept error: {err}");
                    thread::sleep(Duration::from_millis(200));
                }
            }
        }
    }
}

fn send_hello(stream: &mut TcpStream, build_info: &str) -> Result<(), io::Error> {
    let hello = Hello::new("tongtong_host", Some(build_info.to_string()));
    let message = encode_message(MessageKind::Hello, &hello)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    write_all(stream, &message)
}

fn write_all(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < bytes.len() {
        match stream.write(&bytes[offset..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "remote closed connection",
                ))
            }
            Ok(written) => offset += written,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
