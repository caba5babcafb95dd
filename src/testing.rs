//! In-memory HTTP source and progress recorder shared by the unit tests.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use url::Url;

use crate::downloader::{TaskId, TaskState};
use crate::error::{TaskError, TransportError};
use crate::progress::ProgressSink;
use crate::transport::{ByteStream, HttpSource, StreamHandle, Verification};

const CHUNK: usize = 1000;

#[derive(Clone)]
pub enum Script {
    Body(usize),
    /// Advertises no `Content-Length`.
    Unsized(usize),
    CertificateThenBody(usize),
    CertificateAlways,
    Refused,
    /// Yields `n` bytes, then a read error.
    BreakAfter(usize),
    /// `chunks` chunks with `delay` before each one.
    Slow { chunks: usize, delay: Duration },
}

impl Script {
    pub fn body(len: usize) -> Self {
        Script::Body(len)
    }

    pub fn certificate_then_body(len: usize) -> Self {
        Script::CertificateThenBody(len)
    }
}

#[derive(Default)]
pub struct ScriptedSource {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<(String, Verification)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, script: Script) -> Self {
        self.scripts.insert(url.to_string(), script);

        self
    }

    pub fn calls(&self) -> Vec<(String, Verification)> {
        self.calls.lock().clone()
    }
}

fn sized(len: usize, verification: Verification, advertise: bool) -> StreamHandle {
    let data = vec![7u8; len];
    let chunks: Vec<io::Result<Bytes>> = data
        .chunks(CHUNK)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();

    StreamHandle {
        total_size: advertise.then_some(len as u64),
        verified: verification == Verification::Enabled,
        body: stream::iter(chunks).boxed(),
    }
}

fn certificate_error(url: &Url) -> TransportError {
    TransportError::Certificate {
        url: url.to_string(),
        source: "invalid peer certificate: UnknownIssuer".into(),
    }
}

fn refused(url: &Url) -> TransportError {
    TransportError::Request {
        url: url.to_string(),
        source: Box::new(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        )),
    }
}

#[async_trait]
impl HttpSource for ScriptedSource {
    async fn get(
        &self,
        url: &Url,
        verification: Verification,
    ) -> Result<StreamHandle, TransportError> {
        self.calls.lock().push((url.to_string(), verification));

        let Some(script) = self.scripts.get(url.as_str()).cloned() else {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: 404,
            });
        };

        match (script, verification) {
            (Script::Body(len), _) => Ok(sized(len, verification, true)),
            (Script::Unsized(len), _) => Ok(sized(len, verification, false)),
            (Script::CertificateThenBody(_), Verification::Enabled) => Err(certificate_error(url)),
            (Script::CertificateThenBody(len), Verification::Disabled) => {
                Ok(sized(len, verification, true))
            }
            (Script::CertificateAlways, Verification::Enabled) => Err(certificate_error(url)),
            (Script::CertificateAlways, Verification::Disabled) => Err(refused(url)),
            (Script::Refused, _) => Err(refused(url)),
            (Script::BreakAfter(len), _) => {
                let body: ByteStream = stream::iter(vec![
                    Ok(Bytes::from(vec![1u8; len])),
                    Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
                ])
                .boxed();
                Ok(StreamHandle {
                    total_size: Some(len as u64 * 2),
                    verified: true,
                    body,
                })
            }
            (Script::Slow { chunks, delay }, _) => {
                let body = stream::unfold(0usize, move |sent| async move {
                    if sent == chunks {
                        return None;
                    }
                    tokio::time::sleep(delay).await;
                    Some((Ok(Bytes::from(vec![0u8; CHUNK])), sent + 1))
                })
                .boxed();
                Ok(StreamHandle {
                    total_size: Some((chunks * CHUNK) as u64),
                    verified: true,
                    body,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    State(TaskId, TaskState),
    Start(TaskId, Option<u64>),
    Chunk(TaskId, u64),
    Done(TaskId, bool),
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn bytes_for(&self, id: TaskId) -> u64 {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Chunk(task, n) if *task == id => Some(*n),
                _ => None,
            })
            .sum()
    }
}

impl ProgressSink for RecordingSink {
    fn on_state(&self, id: TaskId, state: TaskState) {
        self.events.lock().push(Event::State(id, state));
    }

    fn on_task_start(&self, id: TaskId, _url: &Url, total_size: Option<u64>) {
        self.events.lock().push(Event::Start(id, total_size));
    }

    fn on_chunk(&self, id: TaskId, bytes: u64) {
        self.events.lock().push(Event::Chunk(id, bytes));
    }

    fn on_task_done(&self, id: TaskId, outcome: Result<u64, &TaskError>) {
        self.events.lock().push(Event::Done(id, outcome.is_ok()));
    }
}
