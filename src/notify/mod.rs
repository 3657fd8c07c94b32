//! Outbound fan-out: what to send, when to send it, and how hard to try.

pub mod dispatcher;
pub mod schedule;
pub mod transport;

use serde::{Deserialize, Serialize};

pub use self::{
  dispatcher::{BroadcastReport, Delivery, Dispatcher, SweepReport},
  schedule::Schedule,
  transport::{Receipt, TelegramTransport, Transport, TransportError},
};
use crate::entity::{Cadence, MessageKind, recipient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
  Low,
  Normal,
  High,
  Urgent,
  FlashCritical,
}

impl Priority {
  /// High and above skip quiet hours and cadence batching.
  pub fn is_urgent(self) -> bool {
    self >= Priority::High
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
  pub label: String,
  pub action: String,
}

impl Button {
  pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
    Self { label: label.into(), action: action.into() }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
  Text(String),
  Image { url: String, caption: String },
  Buttons { text: String, buttons: Vec<Button> },
  List { text: String, items: Vec<Button> },
}

impl Body {
  /// Buttons carried by the body, if any.
  pub fn actions(&self) -> &[Button] {
    match self {
      Body::Buttons { buttons, .. } => buttons,
      Body::List { items, .. } => items,
      Body::Text(_) | Body::Image { .. } => &[],
    }
  }

  /// Text part of the body, used when the message is folded into a batch.
  pub fn text(&self) -> &str {
    match self {
      Body::Text(text) => text,
      Body::Image { caption, .. } => caption,
      Body::Buttons { text, .. } | Body::List { text, .. } => text,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
  pub kind: MessageKind,
  pub deal_id: Option<i32>,
  pub priority: Priority,
  pub body: Body,
}

impl Message {
  pub fn text(kind: MessageKind, text: impl Into<String>) -> Self {
    Self {
      kind,
      deal_id: None,
      priority: Priority::Normal,
      body: Body::Text(text.into()),
    }
  }

  pub fn deal(mut self, deal_id: i32) -> Self {
    self.deal_id = Some(deal_id);
    self
  }

  pub fn priority(mut self, priority: Priority) -> Self {
    self.priority = priority;
    self
  }

  pub fn buttons(mut self, buttons: Vec<Button>) -> Self {
    let text = self.body.text().to_string();
    self.body = Body::Buttons { text, buttons };
    self
  }
}

/// Where and how a single person wants to be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
  pub id: i64,
  pub address: String,
  pub language: String,
  pub cadence: Cadence,
}

impl From<recipient::Model> for Recipient {
  fn from(model: recipient::Model) -> Self {
    Self {
      id: model.id,
      address: model.address,
      language: model.language,
      cadence: model.cadence,
    }
  }
}
