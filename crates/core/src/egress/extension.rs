//! Egress through an external extension program.
//!
//! The extension is launched once per artifact. It receives on stdin a
//! little-endian `u32` length, a JSON header of that length, and then the
//! artifact bytes until end of input. It answers on stdout with a JSON
//! [`ExtensionEgressResult`].

use super::provider::{EgressArtifactSettings, EgressProvider, EgressSource};
use super::EgressError;
use async_trait::async_trait;
use dm_protocol::config_models::ExtensionEgressProviderOptions;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Serialize, Debug)]
struct ExtensionEgressHeader<'a> {
    provider_name: &'a str,
    settings: &'a serde_json::Value,
    artifact_name: &'a str,
    content_type: &'a str,
    metadata: &'a [(String, String)],
}

/// The answer an extension writes to stdout.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExtensionEgressResult {
    pub succeeded: bool,
    #[serde(default)]
    pub artifact_path: Option<String>,
    #[serde(default)]
    pub failure_message: Option<String>,
}

pub struct ExtensionEgressProvider {
    name: String,
    options: ExtensionEgressProviderOptions,
}

impl ExtensionEgressProvider {
    pub fn new(name: impl Into<String>, options: ExtensionEgressProviderOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }

    fn failure(&self, message: impl Into<String>) -> EgressError {
        EgressError::provider(&self.name, message)
    }

    async fn run(
        &self,
        source: EgressSource,
        settings: &EgressArtifactSettings,
        token: CancellationToken,
    ) -> Result<ExtensionEgressResult, EgressError> {
        let program = which::which(&self.options.command).map_err(|e| {
            self.failure(format!("extension '{}' not found: {e}", self.options.command))
        })?;

        let mut child = Command::new(&program)
            .args(&self.options.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failure(format!("failed to launch extension: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.failure("extension stdin unavailable"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.failure("extension stdout unavailable"))?;

        let header = serde_json::to_vec(&ExtensionEgressHeader {
            provider_name: &self.name,
            settings: &self.options.settings,
            artifact_name: &settings.name,
            content_type: &settings.content_type,
            metadata: &settings.metadata,
        })
        .map_err(|e| self.failure(format!("cannot encode header: {e}")))?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| self.failure("extension header is too large"))?;

        let cancelled = token.clone();
        let send = async move {
            stdin.write_u32_le(header_len).await?;
            stdin.write_all(&header).await?;
            source.write_into(&mut stdin, token).await?;
            stdin.shutdown().await?;
            Ok::<(), EgressError>(())
        };
        let receive = async move {
            let mut response = Vec::new();
            stdout.read_to_end(&mut response).await?;
            Ok::<Vec<u8>, EgressError>(response)
        };

        let (sent, received) = tokio::select! {
            exchanged = async { tokio::join!(send, receive) } => exchanged,
            () = cancelled.cancelled() => {
                let _ = child.kill().await;
                return Err(EgressError::Cancelled);
            }
        };
        sent?;
        let response = received?;
        let status = child.wait().await?;

        serde_json::from_slice::<ExtensionEgressResult>(&response).map_err(|e| {
            self.failure(format!(
                "extension exited with {status} and an unreadable result: {e}"
            ))
        })
    }
}

#[async_trait]
impl EgressProvider for ExtensionEgressProvider {
    fn kind(&self) -> &'static str {
        "extension"
    }

    async fn egress(
        &self,
        source: EgressSource,
        settings: &EgressArtifactSettings,
        token: CancellationToken,
    ) -> Result<String, EgressError> {
        let result = self.run(source, settings, token).await?;
        match result {
            ExtensionEgressResult {
                succeeded: true,
                artifact_path: Some(path),
                ..
            } => Ok(path),
            ExtensionEgressResult {
                succeeded: true, ..
            } => Err(self.failure("extension reported success without an artifact path")),
            ExtensionEgressResult {
                failure_message, ..
            } => Err(self.failure(
                failure_message.unwrap_or_else(|| "extension reported failure".to_string()),
            )),
        }
    }
}
