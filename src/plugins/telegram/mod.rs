mod callback;
mod command;

use std::sync::Arc;

use command::Command;
use teloxide::{
  Bot,
  dispatching::{Dispatcher, HandlerExt, UpdateFilterExt},
  prelude::*,
  types::{
    BotCommandScope, CallbackQuery, ChatId, InlineKeyboardMarkup, Message,
    ParseMode, Update,
  },
  utils::command::BotCommands,
};

use crate::{prelude::*, state::AppState};

pub struct Plugin {
  bot: Bot,
}

impl Plugin {
  pub fn new(bot: Bot) -> Self {
    Self { bot }
  }
}

#[async_trait::async_trait]
impl super::Plugin for Plugin {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    run_bot(app, self.bot.clone()).await;
    Ok(())
  }
}

async fn setup_commands(bot: &Bot) {
  if let Err(e) = bot
    .set_my_commands(Command::bot_commands())
    .scope(BotCommandScope::Default)
    .await
  {
    warn!("Failed to set default commands: {}", e);
  }
}

pub async fn run_bot(app: Arc<AppState>, bot: Bot) {
  info!("Starting Telegram bot...");

  setup_commands(&bot).await;

  let handler = teloxide::dptree::entry()
    .branch(Update::filter_message().filter_command::<Command>().endpoint({
      let app = app.clone();
      move |bot: Bot, msg: Message, cmd: Command| {
        let app = app.clone();
        let lang = msg
          .from
          .as_ref()
          .and_then(|u| u.language_code.clone())
          .unwrap_or_default();
        let user_id =
          msg.from.as_ref().map_or(msg.chat.id.0, |u| u.id.0 as i64);
        let bot = ReplyBot::new(bot, user_id, msg.chat.id, lang);
        command::handle(app, bot, cmd)
      }
    }))
    .branch(Update::filter_callback_query().endpoint({
      let app = app.clone();
      move |bot: Bot, query: CallbackQuery| {
        let app = app.clone();
        callback_handle(app, bot, query)
      }
    }));

  Dispatcher::builder(bot, handler).build().dispatch().await;
}

async fn callback_handle(
  app: Arc<AppState>,
  bot: Bot,
  query: CallbackQuery,
) -> ResponseResult<()> {
  let Some(data) = query.data.as_deref() else {
    return Ok(());
  };

  let chat_id = query
    .message
    .as_ref()
    .map_or(ChatId(query.from.id.0 as i64), |msg| msg.chat().id);
  let lang = query.from.language_code.clone().unwrap_or_default();
  let bot = ReplyBot::new(bot, query.from.id.0 as i64, chat_id, lang);

  let answer = callback::handle(&app, &bot, data).await?;

  // answer callback to remove loading state
  bot.inner.answer_callback_query(query.id.clone()).text(answer).await?;
  Ok(())
}

#[derive(Debug, Clone)]
struct ReplyBot {
  inner: Bot,
  pub user_id: i64,
  pub chat_id: ChatId,
  pub lang: String,
}

impl ReplyBot {
  pub fn new(inner: Bot, user_id: i64, chat_id: ChatId, lang: String) -> Self {
    Self { inner, user_id, chat_id, lang }
  }

  async fn reply_html(
    &self,
    text: impl Into<String>,
  ) -> ResponseResult<Message> {
    self
      .inner
      .send_message(self.chat_id, text.into())
      .parse_mode(ParseMode::Html)
      .await
  }

  async fn reply_with_keyboard(
    &self,
    text: impl Into<String>,
    keyboard: InlineKeyboardMarkup,
  ) -> ResponseResult<Message> {
    self
      .inner
      .send_message(self.chat_id, text.into())
      .parse_mode(ParseMode::Html)
      .reply_markup(keyboard)
      .await
  }

  async fn reply_err(&self, err: &Error) -> ResponseResult<Message> {
    self.reply_html(format!("❌ {}", err.reason(&self.lang))).await
  }
}
