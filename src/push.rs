//! Push payload decoding and notification click handling.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::clients::{Client, Clients};
use crate::config::Config;

/// Push payload as sent by the server. Every field is optional.
///
/// `requireInteraction` is kept as raw JSON since senders use `1`, `"true"`
/// and the like as well as booleans.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub tag: Option<String>,
  pub data: Option<Value>,
  pub require_interaction: Option<Value>,
}

/// JavaScript truthiness of a JSON value.
fn truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
    Value::String(s) => !s.is_empty(),
    Value::Array(_) | Value::Object(_) => true,
  }
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

/// Everything needed to display a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationIntent {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub data: Value,
  pub actions: Vec<NotificationAction>,
  pub require_interaction: bool,
  pub vibrate: Vec<u32>,
}

pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";

fn standard_actions() -> Vec<NotificationAction> {
  vec![
    NotificationAction {
      action: ACTION_VIEW.to_string(),
      title: "View Details".to_string(),
      icon: "/action-view.png".to_string(),
    },
    NotificationAction {
      action: ACTION_DISMISS.to_string(),
      title: "Dismiss".to_string(),
      icon: "/action-dismiss.png".to_string(),
    },
  ]
}

impl NotificationIntent {
  pub fn from_payload(config: &Config, payload: PushPayload) -> Self {
    let push = &config.push;
    Self {
      title: non_empty(payload.title).unwrap_or_else(|| config.app_name.clone()),
      body: non_empty(payload.body).unwrap_or_else(|| push.default_body.clone()),
      icon: push.icon.clone(),
      badge: push.badge.clone(),
      tag: non_empty(payload.tag).unwrap_or_else(|| push.default_tag.clone()),
      data: payload
        .data
        .filter(|d| !d.is_null())
        .unwrap_or_else(|| Value::Object(Default::default())),
      actions: standard_actions(),
      require_interaction: payload.require_interaction.as_ref().is_some_and(truthy),
      vibrate: push.vibrate.clone(),
    }
  }

  /// Deep link carried in the notification data, if any.
  pub fn deep_link(&self) -> Option<&str> {
    self.data.get("url").and_then(Value::as_str)
  }
}

/// Decode a raw push payload. Absent or malformed payloads produce no notification.
pub fn decode(config: &Config, raw: Option<&[u8]>) -> Option<NotificationIntent> {
  let Some(raw) = raw else {
    debug!("push without payload ignored");
    return None;
  };

  match serde_json::from_slice::<PushPayload>(raw) {
    Ok(payload) => Some(NotificationIntent::from_payload(config, payload)),
    Err(e) => {
      warn!(error = %e, "push notification error");
      None
    }
  }
}

/// What a notification click resulted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ClickResult {
  /// Notification closed, nothing else
  Closed,
  Opened { client: Client },
  Focused { client: Client },
}

/// Resolve a notification click against the open clients.
///
/// `view` opens a window at the deep link (or the app shell). No action focuses
/// an existing app window, navigating it to the deep link when there is one,
/// or opens a new window. `dismiss` and unknown actions only close.
pub fn click(
  config: &Config,
  clients: &mut Clients,
  action: Option<&str>,
  data: &Value,
) -> ClickResult {
  let deep_link = data
    .get("url")
    .and_then(Value::as_str)
    .and_then(|link| resolve(config, link));
  let shell = resolve(config, &config.shell.document);

  match action {
    Some(ACTION_VIEW) => match deep_link.or(shell) {
      Some(target) => ClickResult::Opened {
        client: clients.open_window(target),
      },
      None => ClickResult::Closed,
    },
    None | Some("") => {
      let existing = clients
        .find_by_url(&config.shell.document)
        .map(|c| c.id.clone());

      if let Some(id) = existing {
        if let Some(link) = deep_link.clone() {
          clients.navigate(&id, link);
        }
        clients.focus(&id);
        if let Some(client) = clients.get(&id) {
          return ClickResult::Focused {
            client: client.clone(),
          };
        }
      }

      match deep_link.or(shell) {
        Some(target) => ClickResult::Opened {
          client: clients.open_window(target),
        },
        None => ClickResult::Closed,
      }
    }
    Some(_) => ClickResult::Closed,
  }
}

fn resolve(config: &Config, link: &str) -> Option<Url> {
  match config.resolve(link) {
    Ok(url) => Some(url),
    Err(e) => {
      warn!(link, error = %e, "ignoring invalid notification link");
      None
    }
  }
}
