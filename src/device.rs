use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::error::{FacegateError, Result};

/// One command sent to the capture device and what came back.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub ok: bool,
    pub response: Value,
}

/// Fire-and-forget command channel to the capture device's HTTP endpoint.
pub struct DeviceClient {
    base_url: Option<String>,
    http: reqwest::Client,
    log: Mutex<Vec<CommandRecord>>,
}

impl DeviceClient {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FacegateError::Device(e.to_string()))?;
        Ok(Self {
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            http,
            log: Mutex::new(Vec::new()),
        })
    }

    /// Post `cmd` to the device and record the outcome.
    pub async fn send_command(&self, cmd: &str) -> Result<CommandRecord> {
        let timestamp = Utc::now();
        let result = self.post(cmd).await;

        let record = CommandRecord {
            timestamp,
            command: cmd.to_string(),
            ok: result.is_ok(),
            response: match &result {
                Ok(body) => body.clone(),
                Err(e) => Value::String(e.to_string()),
            },
        };
        self.log.lock().push(record.clone());

        match result {
            Ok(_) => {
                info!("device accepted command '{}'", cmd);
                Ok(record)
            }
            Err(e) => {
                warn!("device command '{}' failed: {}", cmd, e);
                Err(e)
            }
        }
    }

    pub fn command_log(&self) -> Vec<CommandRecord> {
        self.log.lock().clone()
    }

    async fn post(&self, cmd: &str) -> Result<Value> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| FacegateError::Device("no device_url configured".into()))?;

        let response = self
            .http
            .post(format!("{base}/send-command"))
            .form(&[("cmd", cmd)])
            .send()
            .await
            .map_err(|e| FacegateError::Device(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FacegateError::Device(e.to_string()))?;
        if !status.is_success() {
            return Err(FacegateError::Device(format!(
                "device returned {status}: {}",
                text.trim()
            )));
        }
        Ok(parse_body(&text))
    }
}

/// Devices answer with JSON or bare text; bare text is wrapped.
fn parse_body(text: &str) -> Value {
    let trimmed = text.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| serde_json::json!({ "response": trimmed }))
}
