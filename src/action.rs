//! Inbound button actions, encoded as `{verb}_{deal_id}`.

use std::{fmt, str::FromStr};

use crate::{prelude::*, sv::RescueAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
  Claim(i32),
  Info(i32),
  Rescue(RescueAction, i32),
}

impl Action {
  pub fn to_data(self) -> String {
    self.to_string()
  }

  pub fn from_data(data: &str) -> Result<Self> {
    data.parse()
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Action::Claim(id) => write!(f, "flash_claim_{id}"),
      Action::Info(id) => write!(f, "flash_info_{id}"),
      Action::Rescue(action, id) => {
        write!(f, "rescue_{}_{id}", action.as_str())
      }
    }
  }
}

impl FromStr for Action {
  type Err = Error;

  fn from_str(data: &str) -> Result<Self> {
    let malformed = || Error::OutOfRange(format!("malformed action `{data}`"));

    let (verb, id) = data.rsplit_once('_').ok_or_else(malformed)?;
    // digits only, so signs and whitespace are rejected
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
      return Err(malformed());
    }
    let id: i32 = id.parse().map_err(|_| malformed())?;
    if id <= 0 {
      return Err(malformed());
    }

    match verb {
      "flash_claim" => Ok(Action::Claim(id)),
      "flash_info" => Ok(Action::Info(id)),
      _ => match verb.strip_prefix("rescue_") {
        Some(action) => Ok(Action::Rescue(action.parse()?, id)),
        None => Err(malformed()),
      },
    }
  }
}
