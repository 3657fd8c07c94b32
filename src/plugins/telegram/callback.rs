use teloxide::prelude::*;

use super::ReplyBot;
use crate::{
  action::Action,
  notify::{Button, transport::keyboard},
  prelude::*,
  state::AppState,
  sv::{ClaimReceipt, RescueAction, RescueOutcome, deals::describe},
};

/// Runs the pressed action and returns the short toast to show.
pub async fn handle(
  app: &AppState,
  bot: &ReplyBot,
  data: &str,
) -> ResponseResult<String> {
  let action = match Action::from_data(data) {
    Ok(action) => action,
    Err(err) => {
      warn!(user_id = bot.user_id, data, %err, "rejected callback");
      return Ok(err.reason(&bot.lang).to_string());
    }
  };

  let sv = app.sv();
  if let Err(err) = sv.recipients.set_language(bot.user_id, &bot.lang).await {
    warn!(user_id = bot.user_id, %err, "failed to store recipient language");
  }

  match action {
    Action::Claim(deal_id) => {
      match sv.flash.claim(deal_id, bot.user_id, None).await {
        Ok(receipt) => {
          bot.reply_html(claim_text(&receipt)).await?;
          let toast =
            if receipt.duplicate { "Already claimed" } else { "Claimed!" };
          Ok(toast.into())
        }
        Err(err) => {
          debug!(deal_id, user_id = bot.user_id, %err, "claim refused");
          Ok(err.reason(&bot.lang).to_string())
        }
      }
    }
    Action::Info(deal_id) => match sv.deals.get(deal_id).await {
      Ok(deal) => {
        let kb = keyboard(&[Button::new(
          "🙋 Claim",
          Action::Claim(deal_id).to_data(),
        )]);
        bot.reply_with_keyboard(describe(&deal, app.now()), kb).await?;
        Ok(String::new())
      }
      Err(err) => Ok(err.reason(&bot.lang).to_string()),
    },
    Action::Rescue(kind, deal_id) => {
      match sv.rescue.apply(deal_id, bot.user_id, kind).await {
        Ok(outcome) => {
          bot.reply_html(rescue_text(&outcome)).await?;
          Ok("Done".into())
        }
        Err(err) => {
          warn!(deal_id, user_id = bot.user_id, %err, "rescue refused");
          Ok(err.reason(&bot.lang).to_string())
        }
      }
    }
  }
}

pub fn claim_text(receipt: &ClaimReceipt) -> String {
  let mut text = if receipt.duplicate {
    format!("You already claimed this deal (#{}).", receipt.position)
  } else {
    format!(
      "✅ You're in! #{} of {} needed.",
      receipt.position, receipt.target_claims
    )
  };

  if let Some(reveal) = &receipt.reveal {
    text += &format!(
      "\n🎁 Surprise revealed: <b>{}</b>, {}% off {}",
      reveal.title, reveal.discount_percent, reveal.product
    );
  }
  if let Some(code) = &receipt.coupon_code {
    text += &format!("\n🎟 Your coupon: <code>{code}</code>");
  } else if !receipt.duplicate {
    let left = receipt.target_claims - receipt.current_claims;
    text += &format!("\n{left} more to unlock. Invite your friends!");
  }
  for unlock in &receipt.tiers_unlocked {
    text += &format!(
      "\n🔓 Level {} unlocked: {}% off",
      unlock.level, unlock.discount_percent
    );
  }
  text
}

fn rescue_text(outcome: &RescueOutcome) -> String {
  if outcome.action == RescueAction::Expire {
    return "⌛ Okay, the deal will run out as planned.".into();
  }
  if !outcome.changed() {
    return "Nothing changed, this boost was already applied.".into();
  }
  format!(
    "🛟 Boost applied. Ends at {} UTC, {}% off.",
    outcome.deal.expires_at.format("%H:%M"),
    outcome.deal.discount_percent
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{entity::DealState, sv::Reveal};

  fn receipt() -> ClaimReceipt {
    ClaimReceipt {
      deal_id: 1,
      claimant_id: 2,
      position: 3,
      current_claims: 3,
      target_claims: 10,
      state: DealState::Live,
      activated: false,
      duplicate: false,
      coupon_code: None,
      reveal: None,
      tiers_unlocked: Vec::new(),
    }
  }

  #[test]
  fn test_claim_text() {
    let text = claim_text(&receipt());
    assert!(text.contains("#3 of 10"));
    assert!(text.contains("7 more to unlock"));

    let text = claim_text(&ClaimReceipt {
      coupon_code: Some("FLASH-AB12CD".into()),
      reveal: Some(Reveal {
        title: "Secret Sushi".into(),
        product: "omakase".into(),
        discount_percent: 70,
      }),
      ..receipt()
    });
    assert!(text.contains("<code>FLASH-AB12CD</code>"));
    assert!(text.contains("Secret Sushi"));
    assert!(!text.contains("more to unlock"));
  }
}
