use async_trait::async_trait;
use reqwest::Url;
use teloxide::{
  ApiError, RequestError,
  prelude::*,
  types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode},
};

use tracing::info;

use super::Button;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
  pub delivery_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
  /// Nobody can be reached at this address; retrying will not help.
  #[error("invalid address: {0}")]
  InvalidAddress(String),
  #[error("{0}")]
  Failed(String),
}

/// Outbound message channel.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send_text(
    &self,
    address: &str,
    text: &str,
  ) -> Result<Receipt, TransportError>;

  async fn send_image(
    &self,
    address: &str,
    url: &str,
    caption: &str,
  ) -> Result<Receipt, TransportError>;

  async fn send_buttons(
    &self,
    address: &str,
    text: &str,
    buttons: &[Button],
  ) -> Result<Receipt, TransportError>;

  async fn send_list(
    &self,
    address: &str,
    text: &str,
    items: &[Button],
  ) -> Result<Receipt, TransportError>;
}

/// Telegram delivery; the address is the numeric chat id.
#[derive(Clone)]
pub struct TelegramTransport {
  bot: Bot,
}

impl TelegramTransport {
  pub fn new(bot: Bot) -> Self {
    Self { bot }
  }

  fn chat(address: &str) -> Result<ChatId, TransportError> {
    address
      .trim()
      .parse::<i64>()
      .map(ChatId)
      .map_err(|_| TransportError::InvalidAddress(address.to_string()))
  }

  fn receipt(msg: &Message) -> Receipt {
    Receipt { delivery_id: format!("{}:{}", msg.chat.id.0, msg.id.0) }
  }
}

fn map_err(err: RequestError) -> TransportError {
  match err {
    RequestError::Api(
      ApiError::BotBlocked | ApiError::ChatNotFound | ApiError::UserDeactivated,
    ) => TransportError::InvalidAddress(err.to_string()),
    other => TransportError::Failed(other.to_string()),
  }
}

/// One button per row, in the order given.
pub fn keyboard(buttons: &[Button]) -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(buttons.iter().map(|b| {
    vec![InlineKeyboardButton::callback(b.label.clone(), b.action.clone())]
  }))
}

#[async_trait]
impl Transport for TelegramTransport {
  async fn send_text(
    &self,
    address: &str,
    text: &str,
  ) -> Result<Receipt, TransportError> {
    let msg = self
      .bot
      .send_message(Self::chat(address)?, text)
      .parse_mode(ParseMode::Html)
      .await
      .map_err(map_err)?;
    Ok(Self::receipt(&msg))
  }

  async fn send_image(
    &self,
    address: &str,
    url: &str,
    caption: &str,
  ) -> Result<Receipt, TransportError> {
    let url = Url::parse(url)
      .map_err(|e| TransportError::Failed(format!("bad image url: {e}")))?;
    let msg = self
      .bot
      .send_photo(Self::chat(address)?, InputFile::url(url))
      .caption(caption)
      .parse_mode(ParseMode::Html)
      .await
      .map_err(map_err)?;
    Ok(Self::receipt(&msg))
  }

  async fn send_buttons(
    &self,
    address: &str,
    text: &str,
    buttons: &[Button],
  ) -> Result<Receipt, TransportError> {
    let msg = self
      .bot
      .send_message(Self::chat(address)?, text)
      .parse_mode(ParseMode::Html)
      .reply_markup(keyboard(buttons))
      .await
      .map_err(map_err)?;
    Ok(Self::receipt(&msg))
  }

  async fn send_list(
    &self,
    address: &str,
    text: &str,
    items: &[Button],
  ) -> Result<Receipt, TransportError> {
    // Telegram has no list widget; a column of buttons reads the same.
    self.send_buttons(address, text, items).await
  }
}

/// Writes every message to the log instead of delivering it.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

impl LogTransport {
  fn receipt(address: &str, text: &str, extras: usize) -> Receipt {
    info!(address, extras, "outbound: {text}");
    Receipt { delivery_id: uuid::Uuid::new_v4().to_string() }
  }
}

#[async_trait]
impl Transport for LogTransport {
  async fn send_text(
    &self,
    address: &str,
    text: &str,
  ) -> Result<Receipt, TransportError> {
    Ok(Self::receipt(address, text, 0))
  }

  async fn send_image(
    &self,
    address: &str,
    url: &str,
    caption: &str,
  ) -> Result<Receipt, TransportError> {
    Ok(Self::receipt(address, &format!("[{url}] {caption}"), 1))
  }

  async fn send_buttons(
    &self,
    address: &str,
    text: &str,
    buttons: &[Button],
  ) -> Result<Receipt, TransportError> {
    Ok(Self::receipt(address, text, buttons.len()))
  }

  async fn send_list(
    &self,
    address: &str,
    text: &str,
    items: &[Button],
  ) -> Result<Receipt, TransportError> {
    Ok(Self::receipt(address, text, items.len()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_log_transport_gives_unique_receipts() {
    let log = LogTransport;
    let a = log.send_text("1", "hi").await.unwrap();
    let b = log.send_buttons("1", "hi", &[]).await.unwrap();
    assert_ne!(a.delivery_id, b.delivery_id);
  }

  #[test]
  fn test_chat_address() {
    assert_eq!(TelegramTransport::chat("12345"), Ok(ChatId(12345)));
    assert_eq!(TelegramTransport::chat(" -100 "), Ok(ChatId(-100)));
    assert!(matches!(
      TelegramTransport::chat("not-a-chat"),
      Err(TransportError::InvalidAddress(_))
    ));
  }
}
