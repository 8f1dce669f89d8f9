//! In-process simulated target.
//!
//! Produces deterministic artifact bytes and keeps an in-memory environment
//! block. Used by the CLI's `run` command and throughout the tests in place of
//! a real diagnostics channel.

use super::{ArtifactStream, CaptureRequest, TargetError, TargetProcess};
use async_trait::async_trait;
use bytes::Bytes;
use dm_protocol::process_models::ProcessInfo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CHUNK_SIZE: usize = 64 * 1024;

pub struct SimulatedTarget {
    info: ProcessInfo,
    environment: Mutex<HashMap<String, String>>,
    profilers: Mutex<Vec<(Uuid, PathBuf)>>,
    resume_count: AtomicUsize,
    capture_count: AtomicUsize,
    dump_size: usize,
    stream_interval: Duration,
    capture_failure: Option<String>,
}

impl SimulatedTarget {
    pub fn new(info: ProcessInfo) -> Self {
        Self {
            info,
            environment: Mutex::new(HashMap::new()),
            profilers: Mutex::new(Vec::new()),
            resume_count: AtomicUsize::new(0),
            capture_count: AtomicUsize::new(0),
            dump_size: 256 * 1024,
            stream_interval: Duration::from_millis(50),
            capture_failure: None,
        }
    }

    /// A simulated target with a fresh runtime id.
    pub fn with_pid(pid: u32, name: &str) -> Self {
        Self::new(ProcessInfo {
            pid,
            uid: Uuid::new_v4(),
            name: name.to_string(),
            command_line: format!("/usr/local/bin/{name}"),
        })
    }

    pub fn with_environment_variable(self, name: &str, value: &str) -> Self {
        self.environment
            .lock()
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Size in bytes of every dump this target produces.
    pub fn with_dump_size(mut self, dump_size: usize) -> Self {
        self.dump_size = dump_size;
        self
    }

    /// Delay between chunks of streaming captures (trace, logs, metrics).
    pub fn with_stream_interval(mut self, interval: Duration) -> Self {
        self.stream_interval = interval;
        self
    }

    /// Make every capture request fail with the given message.
    pub fn with_capture_failure(mut self, message: &str) -> Self {
        self.capture_failure = Some(message.to_string());
        self
    }

    pub fn resume_count(&self) -> usize {
        self.resume_count.load(Ordering::SeqCst)
    }

    pub fn capture_count(&self) -> usize {
        self.capture_count.load(Ordering::SeqCst)
    }

    pub fn loaded_profilers(&self) -> Vec<(Uuid, PathBuf)> {
        self.profilers.lock().clone()
    }

    /// The exact bytes a dump of `len` bytes contains.
    pub fn dump_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn fixed_stream(content: Vec<u8>, token: CancellationToken) -> ArtifactStream {
        let stream = async_stream::stream! {
            for chunk in content.chunks(CHUNK_SIZE) {
                if token.is_cancelled() {
                    yield Err(std::io::Error::new(std::io::ErrorKind::Interrupted, "capture cancelled"));
                    return;
                }
                yield Ok(Bytes::copy_from_slice(chunk));
                tokio::task::yield_now().await;
            }
        };
        Box::pin(StreamReader::new(stream))
    }

    fn timed_stream(
        &self,
        header: String,
        duration: Duration,
        stop: CancellationToken,
        token: CancellationToken,
    ) -> ArtifactStream {
        let interval = self.stream_interval;
        let pid = self.info.pid;
        let stream = async_stream::stream! {
            yield Ok::<Bytes, std::io::Error>(Bytes::from(header));
            let deadline = tokio::time::sleep(duration);
            tokio::pin!(deadline);
            let mut sequence: u64 = 0;
            loop {
                let tick = tokio::select! {
                    _ = token.cancelled() => None,
                    _ = stop.cancelled() => Some(false),
                    _ = &mut deadline => Some(false),
                    _ = tokio::time::sleep(interval) => Some(true),
                };
                match tick {
                    None => {
                        yield Err(std::io::Error::new(std::io::ErrorKind::Interrupted, "capture cancelled"));
                        return;
                    }
                    Some(false) => break,
                    Some(true) => {
                        sequence += 1;
                        yield Ok(Bytes::from(format!("{{\"pid\":{pid},\"sequence\":{sequence}}}\n")));
                    }
                }
            }
        };
        Box::pin(StreamReader::new(stream))
    }
}

#[async_trait]
impl TargetProcess for SimulatedTarget {
    fn info(&self) -> &ProcessInfo {
        &self.info
    }

    async fn capture(
        &self,
        request: CaptureRequest,
        stop: CancellationToken,
        token: CancellationToken,
    ) -> Result<ArtifactStream, TargetError> {
        if token.is_cancelled() {
            return Err(TargetError::Cancelled);
        }
        if let Some(message) = &self.capture_failure {
            return Err(TargetError::RequestFailed(message.clone()));
        }
        self.capture_count.fetch_add(1, Ordering::SeqCst);

        let stream = match &request {
            CaptureRequest::Dump { .. } => {
                Self::fixed_stream(Self::dump_bytes(self.dump_size), token)
            }
            CaptureRequest::GcDump => Self::fixed_stream(
                format!("{{\"pid\":{},\"heap\":{{\"objects\":0}}}}", self.info.pid).into_bytes(),
                token,
            ),
            CaptureRequest::Stacks { .. } => Self::fixed_stream(
                format!("{{\"pid\":{},\"threads\":[]}}", self.info.pid).into_bytes(),
                token,
            ),
            CaptureRequest::Exceptions { .. } => Self::fixed_stream(
                format!("{{\"pid\":{},\"exceptions\":[]}}\n", self.info.pid).into_bytes(),
                token,
            ),
            CaptureRequest::Trace { duration, .. }
            | CaptureRequest::Logs { duration, .. }
            | CaptureRequest::LiveMetrics { duration, .. } => self.timed_stream(
                format!("# {} capture for pid {}\n", request.kind(), self.info.pid),
                *duration,
                stop,
                token,
            ),
        };
        Ok(stream)
    }

    async fn get_environment(&self) -> Result<HashMap<String, String>, TargetError> {
        Ok(self.environment.lock().clone())
    }

    async fn set_environment_variable(
        &self,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), TargetError> {
        let mut environment = self.environment.lock();
        match value {
            Some(value) => {
                environment.insert(name.to_string(), value.to_string());
            }
            None => {
                environment.remove(name);
            }
        }
        Ok(())
    }

    async fn load_profiler(&self, clsid: Uuid, path: &Path) -> Result<(), TargetError> {
        self.profilers.lock().push((clsid, path.to_path_buf()));
        Ok(())
    }

    async fn resume_runtime(&self) -> Result<(), TargetError> {
        self.resume_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
