use std::sync::Arc;

use teloxide::{prelude::*, utils::command::BotCommands};

use super::{ReplyBot, callback::claim_text};
use crate::{
  action::Action,
  entity::Cadence,
  notify::{Button, transport::keyboard},
  prelude::*,
  state::AppState,
  sv::deals::describe,
};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Flash Mob Deals")]
pub enum Command {
  #[command(description = "start, or join a deal from an invite")]
  Start(String),
  #[command(description = "show help")]
  Help,
  #[command(description = "show a deal: /deal <id>")]
  Deal(String),
  #[command(description = "redeem a coupon at your store: /redeem <code>")]
  Redeem(String),
  #[command(description = "how often to hear about deals")]
  Cadence(String),
}

const HELP: &str = "\
<b>⚡ Flash Mob Deals</b>

Deals unlock only when enough people nearby claim them before time runs out.
Press <b>Claim</b> on a deal to join. Once it unlocks, everyone gets a coupon.

/deal &lt;id&gt; - Show a deal
/redeem &lt;code&gt; - Redeem a coupon (store owners)
/cadence &lt;immediate|every-2-hours|twice-daily|daily&gt; - How often to hear about deals
/help - Show this message";

/// Invite payload `join_{deal_id}_{referrer_id}`.
pub fn parse_invite(payload: &str) -> Option<(i32, i64)> {
  let rest = payload.trim().strip_prefix("join_")?;
  let (deal, referrer) = rest.split_once('_')?;
  Some((deal.parse().ok()?, referrer.parse().ok()?))
}

pub fn invite_payload(deal_id: i32, referrer_id: i64) -> String {
  format!("join_{deal_id}_{referrer_id}")
}

pub async fn handle(
  app: Arc<AppState>,
  bot: ReplyBot,
  cmd: Command,
) -> ResponseResult<()> {
  let sv = app.sv();

  if let Err(err) = sv.recipients.set_language(bot.user_id, &bot.lang).await {
    warn!(user_id = bot.user_id, %err, "failed to store recipient");
  }

  match cmd {
    Command::Start(payload) => match parse_invite(&payload) {
      Some((deal_id, referrer)) => {
        match sv.flash.claim(deal_id, bot.user_id, Some(referrer)).await {
          Ok(receipt) => {
            let invite = invite_payload(deal_id, bot.user_id);
            bot
              .reply_html(format!(
                "{}\n\nShare your invite: <code>/start {invite}</code>",
                claim_text(&receipt)
              ))
              .await?;
          }
          Err(err) => {
            bot.reply_err(&err).await?;
          }
        }
      }
      None => {
        bot.reply_html(HELP).await?;
      }
    },
    Command::Help => {
      bot.reply_html(HELP).await?;
    }
    Command::Deal(id) => {
      let deal = match id.trim().parse::<i32>() {
        Ok(id) => sv.deals.get(id).await,
        Err(_) => Err(Error::OutOfRange("Usage: /deal <id>".into())),
      };
      match deal {
        Ok(deal) => {
          let kb = keyboard(&[Button::new(
            "🙋 Claim",
            Action::Claim(deal.id).to_data(),
          )]);
          bot.reply_with_keyboard(describe(&deal, app.now()), kb).await?;
        }
        Err(Error::OutOfRange(usage)) => {
          bot.reply_html(usage).await?;
        }
        Err(err) => {
          bot.reply_err(&err).await?;
        }
      }
    }
    Command::Redeem(code) => {
      if code.trim().is_empty() {
        bot.reply_html("Usage: /redeem &lt;code&gt;").await?;
        return Ok(());
      }
      match sv.coupons.redeem(&code, bot.user_id).await {
        Ok(coupon) => {
          bot
            .reply_html(format!(
              "✅ <code>{}</code> redeemed: {}% off.",
              coupon.code, coupon.discount_percent
            ))
            .await?;
        }
        Err(err) => {
          bot.reply_err(&err).await?;
        }
      }
    }
    Command::Cadence(value) => match value.parse::<Cadence>() {
      Ok(cadence) => {
        match sv.recipients.set_cadence(bot.user_id, cadence).await {
          Ok(_) => {
            let text = format!("🔔 Alerts set to <b>{}</b>.", cadence.as_str());
            bot.reply_html(text).await?;
          }
          Err(err) => {
            bot.reply_err(&err).await?;
          }
        }
      }
      Err(_) => {
        bot
          .reply_html(
            "Usage: /cadence &lt;immediate|every-2-hours|twice-daily|daily&gt;",
          )
          .await?;
      }
    },
  }

  Ok(())
}
