//! Delivery policy: urgent messages go out now, the rest wait for the
//! recipient's cadence slot or the end of quiet hours. Waiting messages are
//! appended to a per-recipient batch that a sweep sends as one unit.

use futures::future;
use governor::DefaultDirectRateLimiter;
use sea_orm::sea_query::Expr;

use super::{
  Body, Button, Message, Recipient, Schedule, Transport, TransportError,
};
use crate::{
  clock::Clock,
  config::Config,
  entity::{BatchReason, BatchStatus, Cadence, MessageKind, batch, item},
  prelude::*,
  sync::KeyedLocks,
};

/// Batches are keyed by recipient, reason and cadence.
pub type BatchKey = (i64, BatchReason, Cadence);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
  Sent { delivery_id: String },
  Skipped { reason: String },
  Failed { reason: String },
  Deferred { batch_id: i32, scheduled_for: DateTime },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
  pub sent: usize,
  pub failed: usize,
  pub skipped: usize,
  pub deferred: usize,
}

impl BroadcastReport {
  fn record(&mut self, delivery: &Delivery) {
    match delivery {
      Delivery::Sent { .. } => self.sent += 1,
      Delivery::Failed { .. } => self.failed += 1,
      Delivery::Skipped { .. } => self.skipped += 1,
      Delivery::Deferred { .. } => self.deferred += 1,
    }
  }

  pub fn total(&self) -> usize {
    self.sent + self.failed + self.skipped + self.deferred
  }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
  pub batches: usize,
  pub sent: usize,
  pub skipped: usize,
  pub failed: usize,
}

enum Route {
  Now,
  Later(BatchReason, DateTime),
}

pub struct Dispatcher<'a> {
  db: &'a DatabaseConnection,
  transport: &'a dyn Transport,
  limiter: &'a DefaultDirectRateLimiter,
  locks: &'a KeyedLocks<BatchKey>,
  config: &'a Config,
  clock: &'a dyn Clock,
}

impl<'a> Dispatcher<'a> {
  pub fn new(
    db: &'a DatabaseConnection,
    transport: &'a dyn Transport,
    limiter: &'a DefaultDirectRateLimiter,
    locks: &'a KeyedLocks<BatchKey>,
    config: &'a Config,
    clock: &'a dyn Clock,
  ) -> Self {
    Self { db, transport, limiter, locks, config, clock }
  }

  fn route(&self, to: &Recipient, msg: &Message, now: DateTime) -> Route {
    if msg.priority.is_urgent() {
      return Route::Now;
    }

    let schedule = Schedule::from_config(self.config);
    if to.cadence != Cadence::Immediate {
      let at = schedule.next_send(to.cadence, now);
      Route::Later(BatchReason::FrequencyBatch, at)
    } else if schedule.in_quiet_hours(now) {
      Route::Later(BatchReason::QuietHours, schedule.quiet_end_after(now))
    } else {
      Route::Now
    }
  }

  /// Deliver one message to one recipient, or park it in their batch.
  pub async fn notify(&self, to: &Recipient, msg: &Message) -> Delivery {
    match self.route(to, msg, self.clock.now()) {
      Route::Now => self.send(to, &msg.body, msg.deal_id).await,
      Route::Later(reason, at) => self.defer(to, msg, reason, at).await,
    }
  }

  /// Fan one message out to many recipients.
  ///
  /// Deferred recipients are batched. The rest are submitted in chunks of
  /// `broadcast_batch_size`, chunk `k` waiting `k * broadcast_delay_step`
  /// after the previous one.
  pub async fn broadcast(
    &self,
    recipients: &[Recipient],
    msg: &Message,
  ) -> BroadcastReport {
    let now = self.clock.now();
    let mut report = BroadcastReport::default();
    let mut immediate = Vec::new();

    for to in recipients {
      match self.route(to, msg, now) {
        Route::Now => immediate.push(to),
        Route::Later(reason, at) => {
          report.record(&self.defer(to, msg, reason, at).await);
        }
      }
    }

    let size = self.config.broadcast_batch_size.max(1);
    for (k, chunk) in immediate.chunks(size).enumerate() {
      if k > 0 {
        tokio::time::sleep(self.config.broadcast_delay_step * k as u32).await;
      }

      let sends =
        chunk.iter().map(|to| self.send(to, &msg.body, msg.deal_id));
      for delivery in future::join_all(sends).await {
        report.record(&delivery);
      }
    }

    debug!(
      kind = ?msg.kind,
      deal_id = ?msg.deal_id,
      sent = report.sent,
      failed = report.failed,
      skipped = report.skipped,
      deferred = report.deferred,
      "broadcast finished"
    );

    report
  }

  async fn defer(
    &self,
    to: &Recipient,
    msg: &Message,
    reason: BatchReason,
    at: DateTime,
  ) -> Delivery {
    match self.enqueue(to, msg, reason, at).await {
      Ok((batch_id, scheduled_for)) => {
        Delivery::Deferred { batch_id, scheduled_for }
      }
      Err(err) => {
        error!(
          recipient_id = to.id,
          deal_id = ?msg.deal_id,
          reason = %err,
          "failed to queue notification"
        );
        Delivery::Failed { reason: err.to_string() }
      }
    }
  }

  /// Appends to the pending batch for the key, opening one if needed.
  async fn enqueue(
    &self,
    to: &Recipient,
    msg: &Message,
    reason: BatchReason,
    at: DateTime,
  ) -> Result<(i32, DateTime)> {
    let _guard = self.locks.lock((to.id, reason, to.cadence)).await;
    let now = self.clock.now();

    let pending = batch::Entity::find()
      .filter(batch::Column::RecipientId.eq(to.id))
      .filter(batch::Column::Reason.eq(reason))
      .filter(batch::Column::Cadence.eq(to.cadence))
      .filter(batch::Column::Status.eq(BatchStatus::Pending))
      .one(self.db)
      .await?;

    let batch = match pending {
      Some(batch) => batch,
      None => {
        batch::ActiveModel {
          id: NotSet,
          recipient_id: Set(to.id),
          address: Set(to.address.clone()),
          reason: Set(reason),
          cadence: Set(to.cadence),
          scheduled_for: Set(at),
          status: Set(BatchStatus::Pending),
          created_at: Set(now),
          sent_at: Set(None),
        }
        .insert(self.db)
        .await?
      }
    };

    let body = json::to_string(&msg.body)
      .map_err(|e| Error::Internal(format!("unencodable body: {e}")))?;
    item::ActiveModel {
      id: NotSet,
      batch_id: Set(batch.id),
      kind: Set(msg.kind),
      deal_id: Set(msg.deal_id),
      body: Set(body),
      created_at: Set(now),
    }
    .insert(self.db)
    .await?;

    trace!(recipient_id = to.id, batch_id = batch.id, "notification queued");
    Ok((batch.id, batch.scheduled_for))
  }

  /// Moves a batch out of the pending set. Holding the key lock means no
  /// item can be appended between the check and the flip.
  async fn take(&self, batch: &batch::Model) -> Result<bool> {
    let _guard = self
      .locks
      .lock((batch.recipient_id, batch.reason, batch.cadence))
      .await;

    let res = batch::Entity::update_many()
      .col_expr(batch::Column::Status, Expr::value(BatchStatus::InFlight))
      .filter(batch::Column::Id.eq(batch.id))
      .filter(batch::Column::Status.eq(BatchStatus::Pending))
      .exec(self.db)
      .await?;

    Ok(res.rows_affected == 1)
  }

  /// Sends every pending batch whose time has come, each exactly once.
  pub async fn deliver_due(&self) -> Result<SweepReport> {
    let now = self.clock.now();
    let due = batch::Entity::find()
      .filter(batch::Column::Status.eq(BatchStatus::Pending))
      .filter(batch::Column::ScheduledFor.lte(now))
      .order_by_asc(batch::Column::ScheduledFor)
      .all(self.db)
      .await?;

    let mut report = SweepReport::default();
    for batch in due {
      if !self.take(&batch).await? {
        continue;
      }

      let items = item::Entity::find()
        .filter(item::Column::BatchId.eq(batch.id))
        .order_by_asc(item::Column::Id)
        .all(self.db)
        .await?;

      let to = Recipient {
        id: batch.recipient_id,
        address: batch.address.clone(),
        language: String::new(),
        cadence: batch.cadence,
      };

      // the whole batch is one message, so it lands or fails as a unit
      let deal_id = items
        .first()
        .and_then(|i| i.deal_id)
        .filter(|&d| items.iter().all(|i| i.deal_id == Some(d)));
      let delivery = match compose(&items, self.config.digest_threshold) {
        Some(body) => self.send(&to, &body, deal_id).await,
        None => Delivery::Skipped { reason: "empty batch".into() },
      };

      let status = batch_status(&delivery);
      match status {
        BatchStatus::Sent => report.sent += 1,
        BatchStatus::Skipped => report.skipped += 1,
        _ => report.failed += 1,
      }
      report.batches += 1;

      let batch_id = batch.id;
      batch::ActiveModel {
        status: Set(status),
        sent_at: Set(Some(self.clock.now())),
        ..batch.into()
      }
      .update(self.db)
      .await?;

      debug!(batch_id, items = items.len(), ?status, "batch dispatched");
    }

    if report.batches > 0 {
      info!(
        batches = report.batches,
        sent = report.sent,
        failed = report.failed,
        "delivered due notification batches"
      );
    }
    Ok(report)
  }

  /// One logical send: rate limited, time boxed, retried with backoff.
  async fn send(
    &self,
    to: &Recipient,
    body: &Body,
    deal_id: Option<i32>,
  ) -> Delivery {
    if to.address.trim().is_empty() {
      debug!(recipient_id = to.id, ?deal_id, "no address, skipping");
      return Delivery::Skipped { reason: "no address".into() };
    }

    let attempts = self.config.send_attempts.max(1);
    let mut last_err = String::new();

    for attempt in 1..=attempts {
      self.limiter.until_ready().await;

      let sent = tokio::time::timeout(
        self.config.send_timeout,
        self.transmit(&to.address, body),
      )
      .await;

      match sent {
        Ok(Ok(receipt)) => {
          return Delivery::Sent { delivery_id: receipt.delivery_id };
        }
        Ok(Err(TransportError::InvalidAddress(reason))) => {
          debug!(recipient_id = to.id, ?deal_id, %reason, "skipping");
          return Delivery::Skipped { reason };
        }
        Ok(Err(TransportError::Failed(reason))) => last_err = reason,
        Err(_) => {
          last_err = format!("timed out after {:?}", self.config.send_timeout)
        }
      }

      warn!(
        recipient_id = to.id,
        ?deal_id,
        attempt,
        reason = %last_err,
        "delivery attempt failed"
      );

      if attempt < attempts {
        tokio::time::sleep(self.config.retry_base * 2u32.pow(attempt - 1))
          .await;
      }
    }

    error!(
      recipient_id = to.id,
      ?deal_id,
      reason = %last_err,
      "delivery failed after {} attempts",
      attempts
    );
    Delivery::Failed { reason: last_err }
  }

  async fn transmit(
    &self,
    address: &str,
    body: &Body,
  ) -> Result<super::Receipt, TransportError> {
    match body {
      Body::Text(text) => self.transport.send_text(address, text).await,
      Body::Image { url, caption } => {
        self.transport.send_image(address, url, caption).await
      }
      Body::Buttons { text, buttons } => {
        self.transport.send_buttons(address, text, buttons).await
      }
      Body::List { text, items } => {
        self.transport.send_list(address, text, items).await
      }
    }
  }
}

fn batch_status(delivery: &Delivery) -> BatchStatus {
  match delivery {
    Delivery::Sent { .. } => BatchStatus::Sent,
    Delivery::Skipped { .. } => BatchStatus::Skipped,
    Delivery::Failed { .. } | Delivery::Deferred { .. } => BatchStatus::Failed,
  }
}

/// Body as queued. Rows written before bodies were stored whole hold text.
fn decode(raw: &str) -> Body {
  json::from_str(raw).unwrap_or_else(|_| Body::Text(raw.to_string()))
}

fn section(body: &Body) -> String {
  match body {
    Body::Image { url, caption } => format!("{caption}\n{url}"),
    other => other.text().to_string(),
  }
}

fn push_unique(buttons: &mut Vec<Button>, button: Button) {
  if !buttons.iter().any(|b| b.action == button.action) {
    buttons.push(button);
  }
}

/// Folds a batch's items into the single message that delivers them.
///
/// A lone item goes out exactly as queued. Otherwise every item becomes a
/// section; at or above `threshold` items, kinds with more than one item
/// collapse into a digest of headlines. Every item's buttons are kept and,
/// when several items carry them, numbered to match their section.
pub fn compose(items: &[item::Model], threshold: usize) -> Option<Body> {
  let bodies: Vec<Body> = items.iter().map(|i| decode(&i.body)).collect();
  match bodies.as_slice() {
    [] => return None,
    [single] => return Some(single.clone()),
    _ => {}
  }

  let numbered =
    bodies.iter().filter(|b| !b.actions().is_empty()).count() > 1;
  let mut buttons = Vec::new();
  let mut next = 0;
  let marks: Vec<String> = bodies
    .iter()
    .map(|body| {
      if body.actions().is_empty() {
        return String::new();
      }
      if !numbered {
        for b in body.actions() {
          push_unique(&mut buttons, b.clone());
        }
        return String::new();
      }
      next += 1;
      for b in body.actions() {
        let label = format!("{} ({next})", b.label);
        push_unique(&mut buttons, Button::new(label, b.action.clone()));
      }
      format!("{next}. ")
    })
    .collect();

  let sections: Vec<String> = if items.len() < threshold {
    bodies
      .iter()
      .zip(&marks)
      .map(|(body, mark)| format!("{mark}{}", section(body)))
      .collect()
  } else {
    let mut groups: Vec<(MessageKind, Vec<usize>)> = Vec::new();
    for (idx, item) in items.iter().enumerate() {
      match groups.iter_mut().find(|(kind, _)| *kind == item.kind) {
        Some((_, group)) => group.push(idx),
        None => groups.push((item.kind, vec![idx])),
      }
    }

    groups
      .into_iter()
      .map(|(kind, group)| match group.as_slice() {
        [one] => format!("{}{}", marks[*one], section(&bodies[*one])),
        many => {
          let mut text =
            format!("📬 <b>{} {}</b>\n", many.len(), kind.digest_label());
          for &idx in many {
            let headline = section(&bodies[idx]);
            let headline = headline.lines().next().unwrap_or_default();
            text.push_str(&format!("\n• {}{headline}", marks[idx]));
          }
          text
        }
      })
      .collect()
  };

  let text = sections.join("\n\n");
  Some(if buttons.is_empty() {
    Body::Text(text)
  } else {
    Body::List { text, items: buttons }
  })
}
