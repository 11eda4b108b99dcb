//! Telegram Bot API step.

use super::{ActionSpec, SettingKind, SettingSpec, StepContext};
use crate::config::Config;
use crate::error::{RenderwatchError, Result};
use crate::event::{EventPayload, InternalEvent};
use crate::format::render_template;
use crate::job::RenderJob;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub(super) const ACTIONS: &[ActionSpec] = &[ActionSpec {
    keyword: "send_message",
    settings: &[
        SettingSpec {
            name: "chat_id",
            kind: SettingKind::IntegerOrString,
            required: true,
        },
        SettingSpec {
            name: "message",
            kind: SettingKind::String,
            required: true,
        },
    ],
}];

// ---------------------------------------------------------------------------
// TelegramConfig
// ---------------------------------------------------------------------------

/// `steps.telegram` in config. Token sources are tried in field order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Name of an environment variable holding the bot token.
    #[serde(default)]
    pub token_env_var: Option<String>,
    #[serde(default)]
    pub token_filepath: Option<PathBuf>,
    #[serde(default)]
    pub token_plaintext: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Check each candidate token with `getMe` before accepting it.
    #[serde(default = "default_verify_token")]
    pub verify_token: bool,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_verify_token() -> bool {
    true
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token_env_var: None,
            token_filepath: None,
            token_plaintext: None,
            api_base: default_api_base(),
            verify_token: default_verify_token(),
        }
    }
}

impl TelegramConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.step_config(super::StepKind::Telegram) {
            Value::Null => Ok(Self::default()),
            value => Ok(serde_json::from_value(value.clone())?),
        }
    }

    /// Candidate tokens as `(source, token)`, in priority order.
    fn candidates(&self, config: &Config) -> Vec<(&'static str, String)> {
        let mut found = Vec::new();

        if let Some(var) = &self.token_env_var {
            match std::env::var(var) {
                Ok(token) if !token.trim().is_empty() => {
                    found.push(("token_env_var", token.trim().to_string()));
                }
                _ => tracing::warn!(var = %var, "token environment variable is unset or empty"),
            }
        }

        if let Some(path) = &self.token_filepath {
            let path = config.resolve_path(path);
            match std::fs::read_to_string(&path) {
                Ok(token) if !token.trim().is_empty() => {
                    found.push(("token_filepath", token.trim().to_string()));
                }
                Ok(_) => tracing::warn!(path = %path.display(), "token file is empty"),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "could not read token file")
                }
            }
        }

        if let Some(token) = &self.token_plaintext {
            if !token.trim().is_empty() {
                found.push(("token_plaintext", token.trim().to_string()));
            }
        }

        found
    }
}

// ---------------------------------------------------------------------------
// TelegramClient
// ---------------------------------------------------------------------------

pub struct TelegramClient {
    http: reqwest::blocking::Client,
    api_base: String,
    token: String,
}

impl fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_base", &self.api_base)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl TelegramClient {
    pub fn new(api_base: &str, token: String) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// True when `getMe` answers 200 with `"ok": true`.
    pub fn check_token(&self) -> Result<bool> {
        let resp = self.http.get(self.url("getMe")).send()?;
        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "getMe rejected token");
            return Ok(false);
        }
        let body: Value = resp.json()?;
        Ok(body.get("ok") == Some(&Value::Bool(true)))
    }

    pub fn send_message(&self, chat_id: &Value, text: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url("sendMessage"))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(RenderwatchError::StepFailed(format!(
                "telegram sendMessage returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TelegramStep
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TelegramStep {
    client: TelegramClient,
}

impl TelegramStep {
    /// Pick the first usable token. With `verify_token` off the first
    /// candidate is taken as is.
    pub fn validate(config: &Config) -> Result<Self> {
        let cfg = TelegramConfig::from_config(config)?;

        for (source, token) in cfg.candidates(config) {
            let client = TelegramClient::new(&cfg.api_base, token)?;
            if !cfg.verify_token {
                return Ok(Self { client });
            }
            match client.check_token() {
                Ok(true) => {
                    tracing::debug!(source, "telegram token is valid");
                    return Ok(Self { client });
                }
                Ok(false) => {
                    tracing::warn!(source, "telegram token was refused, trying the next one")
                }
                Err(e) => {
                    tracing::warn!(source, error = %e, "could not verify telegram token, trying the next one")
                }
            }
        }

        tracing::error!(
            "no valid telegram token; set token_env_var, token_filepath or token_plaintext under steps.telegram"
        );
        Err(RenderwatchError::StepValidation("telegram".to_string()))
    }

    pub fn execute(&self, ctx: &StepContext<'_>) -> Result<()> {
        match ctx.binding.keyword {
            "send_message" => self.send_message(ctx),
            other => Err(RenderwatchError::StepFailed(format!(
                "telegram has no action '{other}'"
            ))),
        }
    }

    fn send_message(&self, ctx: &StepContext<'_>) -> Result<()> {
        let chat_id = ctx.required("chat_id")?;
        let template = ctx.required("message")?.as_str().unwrap_or_default();
        let attributes = ctx.job.map(RenderJob::attributes).unwrap_or_default();
        let text = render_template(template, &attributes)?;

        self.client.send_message(chat_id, &text)?;

        let data = json!({ "chat_id": chat_id, "text": text });
        ctx.hub.emit_internal(
            InternalEvent::ActionStepTelegramMessageSent,
            EventPayload {
                job: ctx.job,
                data: &data,
            },
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::test_binding;
    use crate::config::SourceConfig;
    use crate::event::EventHub;
    use crate::step::{StepInstance, StepKind};
    use mockito::Matcher;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn config_with(telegram: Value) -> Config {
        let mut config = Config::new(SourceConfig::File {
            path: "queue.json".into(),
        });
        config.steps.insert("telegram".into(), telegram);
        config
    }

    #[test]
    fn defaults_point_at_public_api() {
        let cfg: TelegramConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(cfg.api_base, DEFAULT_API_BASE);
        assert!(cfg.verify_token);
    }

    #[test]
    fn first_verified_token_wins() {
        let mut server = mockito::Server::new();
        let bad = server
            .mock("GET", "/botFROMFILE/getMe")
            .with_status(401)
            .with_body(r#"{"ok":false}"#)
            .expect(1)
            .create();
        let good = server
            .mock("GET", "/botPLAIN/getMe")
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{}}"#)
            .expect(1)
            .create();

        let dir = TempDir::new().unwrap();
        let token_file = dir.path().join("token");
        std::fs::write(&token_file, "FROMFILE\n").unwrap();

        let config = config_with(json!({
            "token_env_var": "RENDERWATCH_TEST_UNSET_TOKEN_VAR",
            "token_filepath": token_file,
            "token_plaintext": "PLAIN",
            "api_base": server.url(),
        }));
        let step = TelegramStep::validate(&config).unwrap();
        assert_eq!(step.client.token, "PLAIN");
        bad.assert();
        good.assert();
    }

    #[test]
    fn env_var_token_is_tried_first() {
        std::env::set_var("RENDERWATCH_TEST_TG_TOKEN", "FROMENV");
        let config = config_with(json!({
            "token_env_var": "RENDERWATCH_TEST_TG_TOKEN",
            "token_plaintext": "PLAIN",
            "verify_token": false,
        }));
        let step = TelegramStep::validate(&config).unwrap();
        assert_eq!(step.client.token, "FROMENV");
    }

    #[test]
    fn no_valid_token_fails_validation() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/botNOPE/getMe")
            .with_status(404)
            .create();
        let config = config_with(json!({"token_plaintext": "NOPE", "api_base": server.url()}));
        let err = TelegramStep::validate(&config).unwrap_err();
        assert!(matches!(err, RenderwatchError::StepValidation(_)));
    }

    #[test]
    fn send_message_posts_rendered_text_and_emits_sent() {
        let mut server = mockito::Server::new();
        let sent = server
            .mock("POST", "/botTOKEN/sendMessage")
            .match_body(Matcher::PartialJson(json!({
                "chat_id": -1001,
                "text": "render {done}",
            })))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .expect(1)
            .create();

        let config = config_with(json!({
            "token_plaintext": "TOKEN",
            "api_base": server.url(),
            "verify_token": false,
        }));
        let instance = Rc::new(StepInstance::Telegram(TelegramStep::validate(&config).unwrap()));
        let binding = test_binding(
            StepKind::Telegram,
            "send_message",
            json!({"chat_id": -1001, "message": "render {{done}}"}),
            Rc::clone(&instance),
        );

        let seen = Rc::new(RefCell::new(0));
        let mut hub = EventHub::new();
        {
            let seen = Rc::clone(&seen);
            hub.internal
                .subscribe(InternalEvent::ActionStepTelegramMessageSent, move |_, p| {
                    assert_eq!(p.data["chat_id"], -1001);
                    *seen.borrow_mut() += 1;
                });
        }

        let ctx = StepContext {
            hub: &hub,
            binding: &binding,
            job: None,
        };
        instance.execute(&ctx).unwrap();
        sent.assert();
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn api_error_is_step_failure() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/botTOKEN/sendMessage")
            .with_status(400)
            .with_body(r#"{"ok":false,"description":"chat not found"}"#)
            .create();
        let config = config_with(json!({
            "token_plaintext": "TOKEN",
            "api_base": server.url(),
            "verify_token": false,
        }));
        let instance = Rc::new(StepInstance::Telegram(TelegramStep::validate(&config).unwrap()));
        let binding = test_binding(
            StepKind::Telegram,
            "send_message",
            json!({"chat_id": "@nobody", "message": "hi"}),
            Rc::clone(&instance),
        );
        let hub = EventHub::new();
        let ctx = StepContext {
            hub: &hub,
            binding: &binding,
            job: None,
        };
        let err = instance.execute(&ctx).unwrap_err();
        assert!(err.to_string().contains("chat not found"));
    }
}
