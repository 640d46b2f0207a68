use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned, de::IgnoredAny};
use subwatch_core::ports::MessageOptions;

use super::NotifyError;

pub const API_URL: &str = "https://api.telegram.org";

/// Bot API client bound to one chat. Sends HTML messages and long-polls for
/// incoming updates.
#[derive(Clone)]
pub struct TelegramNotifier {
  http:    Client,
  base:    String,
  chat_id: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
  chat_id:                  &'a str,
  text:                     &'a str,
  parse_mode:               &'static str,
  disable_web_page_preview: bool,
  disable_notification:     bool,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
  ok:          bool,
  #[serde(default)]
  description: Option<String>,
  result:      Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
  pub update_id: i64,
  #[serde(default)]
  pub message:   Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
  pub chat: Chat,
  #[serde(default)]
  pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
  pub id: i64,
}

impl TelegramNotifier {
  pub fn new(bot_token: &str, chat_id: impl Into<String>) -> Result<Self, NotifyError> {
    let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
    Ok(Self { http, base: format!("{API_URL}/bot{bot_token}"), chat_id: chat_id.into() })
  }

  pub fn chat_id(&self) -> &str { &self.chat_id }

  pub async fn send(&self, text: &str, options: MessageOptions) -> Result<(), NotifyError> {
    let body = SendMessage {
      chat_id: &self.chat_id,
      text,
      parse_mode: "HTML",
      disable_web_page_preview: options.disable_web_page_preview,
      disable_notification: options.disable_notification,
    };
    let resp = self.http.post(format!("{}/sendMessage", self.base)).json(&body).send().await?;
    read_result::<IgnoredAny>(resp).await?;
    Ok(())
  }

  /// Long-poll `getUpdates`, waiting up to `wait` for new messages.
  pub async fn get_updates(
    &self,
    offset: Option<i64>,
    wait: Duration,
  ) -> Result<Vec<Update>, NotifyError> {
    let mut query = vec![
      ("timeout", wait.as_secs().to_string()),
      ("allowed_updates", r#"["message"]"#.to_owned()),
    ];
    if let Some(offset) = offset {
      query.push(("offset", offset.to_string()));
    }
    let resp = self
      .http
      .get(format!("{}/getUpdates", self.base))
      .query(&query)
      .timeout(wait + Duration::from_secs(10))
      .send()
      .await?;
    Ok(read_result(resp).await?.unwrap_or_default())
  }
}

async fn read_result<T: DeserializeOwned>(resp: reqwest::Response) -> Result<Option<T>, NotifyError> {
  let status = resp.status();
  let api: ApiResponse<T> = resp.json().await?;
  if !status.is_success() || !api.ok {
    return Err(NotifyError::Telegram {
      status:      status.as_u16(),
      description: api.description.unwrap_or_default(),
    });
  }
  Ok(api.result)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn updates_decode_with_and_without_text() {
    let body = r#"{"ok":true,"result":[
      {"update_id":10,"message":{"message_id":1,"chat":{"id":42,"type":"private"},"text":"/list"}},
      {"update_id":11,"message":{"message_id":2,"chat":{"id":42,"type":"private"}}},
      {"update_id":12,"edited_message":{"message_id":1,"chat":{"id":42}}}
    ]}"#;
    let api: ApiResponse<Vec<Update>> = serde_json::from_str(body).unwrap();
    let updates = api.result.unwrap();
    assert_eq!(updates.len(), 3);
    let first = updates[0].message.as_ref().unwrap();
    assert_eq!(first.chat.id, 42);
    assert_eq!(first.text.as_deref(), Some("/list"));
    assert!(updates[1].message.as_ref().unwrap().text.is_none());
    assert!(updates[2].message.is_none());
  }
}
