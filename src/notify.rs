use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, RequestBuilder, multipart};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Settings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Clone)]
pub struct Delivery {
    pub path: PathBuf,
    pub caption: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: Option<SentMessage>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramRelay {
    client: Client,
    api_url: String,
    token: String,
    chat_id: String,
}

impl TelegramRelay {
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let token = settings.telegram_bot_token.clone()?;
        let chat_id = settings.telegram_chat_id.clone()?;

        let client = match Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("security-updater/", env!("CARGO_PKG_VERSION")))
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "failed to build HTTP client; relay disabled");
                return None;
            }
        };

        Some(Self {
            client,
            api_url: settings.telegram_api_url.clone(),
            token,
            chat_id,
        })
    }

    pub fn deliver(&self, delivery: &Delivery) -> bool {
        let path = &delivery.path;
        match self.send_document(path, &delivery.caption) {
            Ok(message_id) => {
                info!(path = %path.display(), message_id, "report delivered");
                true
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "document upload failed; sending text instead");
                self.deliver_text(&format!(
                    "{}\n\nThe PDF could not be attached. It is stored at {}",
                    delivery.caption,
                    path.display()
                ))
            }
        }
    }

    fn deliver_text(&self, text: &str) -> bool {
        match self.send_message(text) {
            Ok(message_id) => {
                info!(message_id, "text notification delivered");
                true
            }
            Err(err) => {
                warn!(error = %err, "text notification failed");
                false
            }
        }
    }

    fn send_document(&self, path: &Path, caption: &str) -> Result<i64> {
        let form = multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", clip(caption, 1024))
            .file("document", path)
            .with_context(|| format!("failed to attach {}", path.display()))?;

        self.call(
            "sendDocument",
            self.client.post(self.endpoint("sendDocument")).multipart(form),
        )
    }

    fn send_message(&self, text: &str) -> Result<i64> {
        let params = [
            ("chat_id", self.chat_id.clone()),
            ("text", clip(text, MAX_MESSAGE_CHARS)),
        ];
        self.call(
            "sendMessage",
            self.client.post(self.endpoint("sendMessage")).form(&params),
        )
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_url, self.token)
    }

    // The request URL embeds the token; keep it out of errors.
    fn call(&self, method: &str, request: RequestBuilder) -> Result<i64> {
        let response = request
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("{method} request failed"))?;

        let status = response.status();
        let envelope: Envelope = response
            .json()
            .map_err(|err| err.without_url())
            .with_context(|| format!("{method} returned an unreadable body (HTTP {status})"))?;

        if !envelope.ok {
            bail!(
                "{method} rejected (HTTP {status}): {}",
                envelope.description.as_deref().unwrap_or("no description")
            );
        }

        Ok(envelope
            .result
            .map(|message| message.message_id)
            .unwrap_or_default())
    }
}

pub fn send(delivery: &Delivery, settings: &Settings) -> bool {
    match TelegramRelay::from_settings(settings) {
        Some(relay) => relay.deliver(delivery),
        None => {
            info!("telegram relay not configured; skipping delivery");
            false
        }
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
