//! Analyzer backed by an external sentiment engine process
//!
//! The engine receives one JSON request on stdin and must print one JSON
//! verdict on stdout:
//!
//! ```text
//! stdin:  {"upload_id": "...", "text": "...", "summarize": true, "forecast_period": 7}
//! stdout: {"sentiment": "positive", "sentiment_score": 0.8, "dialect": "egyptian",
//!          "dialect_confidence": 0.7, "summary": "...", "forecast": {...}}
//! ```
//!
//! The rows the verdict implies are written through the configured
//! `ResourceService`, the same way the remote procedure writes them.

use super::traits::{record_verdict, resolve_target, AnalyzeRequest, AnalyzeResponse, AnalyzeService, Verdict};
use crate::persistence::{ResourceService, ServiceError, ServiceResult};
use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs a configured command once per analyze call.
pub struct SubprocessAnalyzer {
    resources: Arc<dyn ResourceService>,
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SubprocessAnalyzer {
    pub fn new(resources: Arc<dyn ResourceService>, command: impl Into<String>) -> Self {
        Self {
            resources,
            command: command.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_engine(&self, payload: &str) -> ServiceResult<Verdict> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // The deadline covers feeding stdin as well as collecting output
        let stdin = child.stdin.take();
        let feed = async move {
            match stdin {
                // Dropping stdin afterwards gives the engine its EOF
                Some(mut stdin) => stdin.write_all(payload.as_bytes()).await,
                None => Ok(()),
            }
        };
        let (fed, output) = tokio::time::timeout(self.timeout, async {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        .map_err(|_| ServiceError::Timeout(self.timeout))?;
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(command = %self.command, status = %output.status, "sentiment engine failed");
            return Err(ServiceError::Protocol(format!(
                "engine exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        match fed {
            // An engine may answer without consuming its input
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
            _ => {}
        }

        let verdict: Verdict = serde_json::from_slice(&output.stdout)?;
        Ok(verdict)
    }
}

#[async_trait]
impl AnalyzeService for SubprocessAnalyzer {
    async fn analyze(&self, request: &AnalyzeRequest) -> ServiceResult<AnalyzeResponse> {
        let upload = resolve_target(self.resources.as_ref(), &request.target).await?;
        let payload = json!({
            "upload_id": upload.id,
            "text": upload.raw_text,
            "summarize": request.summarize,
            "forecast_period": request.forecast_period,
        })
        .to_string();

        debug!(upload = %upload.id, command = %self.command, "invoking sentiment engine");
        let verdict = self.run_engine(&payload).await?;
        record_verdict(self.resources.as_ref(), upload, verdict, request).await
    }
}
