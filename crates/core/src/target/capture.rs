//! Capture requests understood by a target process.

use crate::operation::ArtifactKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Kind of memory dump to collect.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DumpType {
    Mini,
    Full,
    #[default]
    WithHeap,
    Triage,
}

/// Minimum level of captured log entries.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Trace,
    Debug,
    Information,
    #[default]
    Warning,
    Error,
    Critical,
    None,
}

/// Serialization format of event-style artifacts (logs, exceptions).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EventFormat {
    JsonSequence,
    #[default]
    NewlineDelimitedJson,
    PlainText,
}

impl EventFormat {
    fn content_type(self) -> &'static str {
        match self {
            EventFormat::JsonSequence => "application/json-seq",
            EventFormat::NewlineDelimitedJson => "application/x-ndjson",
            EventFormat::PlainText => "text/plain",
        }
    }

    fn file_extension(self) -> &'static str {
        match self {
            EventFormat::JsonSequence | EventFormat::NewlineDelimitedJson => "json",
            EventFormat::PlainText => "txt",
        }
    }
}

/// Output format of captured call stacks.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StackFormat {
    #[default]
    Json,
    PlainText,
    Speedscope,
}

/// Predefined sets of trace providers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TraceProfile {
    Cpu,
    Http,
    Logs,
    Metrics,
}

/// A custom event provider enabled for a trace.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct EventProvider {
    pub name: String,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub event_level: Option<String>,
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
}

/// A metric source enabled for a live-metrics capture.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct MetricProvider {
    pub provider_name: String,
    #[serde(default)]
    pub counter_names: Vec<String>,
}

/// A request for one artifact from a target process.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureRequest {
    Dump {
        dump_type: DumpType,
    },
    GcDump,
    Trace {
        profiles: Vec<TraceProfile>,
        providers: Vec<EventProvider>,
        request_rundown: bool,
        buffer_size_mb: u32,
        duration: Duration,
    },
    Logs {
        default_level: LogLevel,
        filter_specs: BTreeMap<String, LogLevel>,
        use_app_filters: bool,
        format: EventFormat,
        duration: Duration,
    },
    LiveMetrics {
        include_default_providers: bool,
        providers: Vec<MetricProvider>,
        duration: Duration,
    },
    Stacks {
        format: StackFormat,
    },
    Exceptions {
        format: EventFormat,
    },
}

impl CaptureRequest {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            CaptureRequest::Dump { .. } => ArtifactKind::Dump,
            CaptureRequest::GcDump => ArtifactKind::GcDump,
            CaptureRequest::Trace { .. } => ArtifactKind::Trace,
            CaptureRequest::Logs { .. } => ArtifactKind::Logs,
            CaptureRequest::LiveMetrics { .. } => ArtifactKind::LiveMetrics,
            CaptureRequest::Stacks { .. } => ArtifactKind::Stacks,
            CaptureRequest::Exceptions { .. } => ArtifactKind::Exceptions,
        }
    }

    /// Duration of a streaming capture, `None` for single-shot artifacts.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            CaptureRequest::Trace { duration, .. }
            | CaptureRequest::Logs { duration, .. }
            | CaptureRequest::LiveMetrics { duration, .. } => Some(*duration),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            CaptureRequest::Dump { .. }
            | CaptureRequest::GcDump
            | CaptureRequest::Trace { .. } => "application/octet-stream",
            CaptureRequest::Logs { format, .. } | CaptureRequest::Exceptions { format } => {
                format.content_type()
            }
            CaptureRequest::LiveMetrics { .. } => "application/json-seq",
            CaptureRequest::Stacks { format } => match format {
                StackFormat::PlainText => "text/plain",
                StackFormat::Json | StackFormat::Speedscope => "application/json",
            },
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            CaptureRequest::Dump { .. } => "dmp",
            CaptureRequest::GcDump => "gcdump",
            CaptureRequest::Trace { .. } => "nettrace",
            CaptureRequest::Logs { format, .. } | CaptureRequest::Exceptions { format } => {
                format.file_extension()
            }
            CaptureRequest::LiveMetrics { .. } => "json",
            CaptureRequest::Stacks { format } => match format {
                StackFormat::PlainText => "txt",
                StackFormat::Json => "json",
                StackFormat::Speedscope => "speedscope.json",
            },
        }
    }
}
