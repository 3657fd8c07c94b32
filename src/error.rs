use sea_orm::{DbErr, SqlErr};

use crate::entity::DealState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  NotFound,
  InvalidState,
  AlreadyDone,
  OutOfRange,
  Transient,
  /// A fault on our side that retrying will not fix.
  Internal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Redeem {
  #[error("coupon was issued by another merchant")]
  WrongMerchant,
  #[error("coupon already redeemed at {0}")]
  AlreadyRedeemed(DateTime),
  #[error("coupon validity window has passed")]
  Expired,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("deal not found")]
  DealNotFound,
  #[error("claim not found")]
  ClaimNotFound,
  #[error("coupon not found")]
  CouponNotFound,
  #[error("deal has not started yet")]
  NotStarted,
  #[error("deal has expired")]
  DealExpired,
  #[error("action not allowed while deal is {0:?}")]
  InvalidState(DealState),
  #[error("only the deal owner may do this")]
  NotOwner,
  #[error(transparent)]
  Redeem(#[from] Redeem),
  #[error("out of range: {0}")]
  OutOfRange(String),
  #[error("temporarily unavailable: {0}")]
  Transient(String),
  #[error("database error: {0}")]
  Database(#[from] DbErr),
  #[error("internal error: {0}")]
  Internal(String),
}

type DateTime = chrono::NaiveDateTime;

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::DealNotFound | Error::ClaimNotFound | Error::CouponNotFound => {
        ErrorKind::NotFound
      }
      Error::NotStarted
      | Error::DealExpired
      | Error::InvalidState(_)
      | Error::NotOwner
      | Error::Redeem(Redeem::WrongMerchant)
      | Error::Redeem(Redeem::Expired) => ErrorKind::InvalidState,
      Error::Redeem(Redeem::AlreadyRedeemed(_)) => ErrorKind::AlreadyDone,
      Error::OutOfRange(_) => ErrorKind::OutOfRange,
      Error::Transient(_) => ErrorKind::Transient,
      Error::Database(err) if is_transient(err) => ErrorKind::Transient,
      Error::Database(_) | Error::Internal(_) => ErrorKind::Internal,
    }
  }

  /// Short reason shown to the person who pressed the button.
  pub fn reason(&self, lang: &str) -> &'static str {
    let es = lang.starts_with("es");
    match (self, es) {
      (Error::DealNotFound, false) => "This deal does not exist.",
      (Error::DealNotFound, true) => "Esta oferta no existe.",
      (Error::NotStarted, false) => "This deal has not started yet.",
      (Error::NotStarted, true) => "Esta oferta aún no ha comenzado.",
      (Error::DealExpired, false) => "Sorry, this deal has expired.",
      (Error::DealExpired, true) => "Lo sentimos, esta oferta ha expirado.",
      (Error::InvalidState(_), false) => "This deal is not open for claims.",
      (Error::InvalidState(_), true) => "Esta oferta no acepta reclamos.",
      (Error::NotOwner, false) => "Only the deal owner can do that.",
      (Error::NotOwner, true) => "Solo el dueño de la oferta puede hacerlo.",
      (Error::CouponNotFound, false) => "Coupon code not found.",
      (Error::CouponNotFound, true) => "Código de cupón no encontrado.",
      (Error::Redeem(Redeem::WrongMerchant), false) => {
        "This coupon belongs to another store."
      }
      (Error::Redeem(Redeem::WrongMerchant), true) => {
        "Este cupón pertenece a otra tienda."
      }
      (Error::Redeem(Redeem::AlreadyRedeemed(_)), false) => {
        "This coupon was already used."
      }
      (Error::Redeem(Redeem::AlreadyRedeemed(_)), true) => {
        "Este cupón ya fue usado."
      }
      (Error::Redeem(Redeem::Expired), false) => "This coupon has expired.",
      (Error::Redeem(Redeem::Expired), true) => "Este cupón ha expirado.",
      (_, false) => "Something went wrong, please try again.",
      (_, true) => "Algo salió mal, inténtalo de nuevo.",
    }
  }
}

/// Whether a database error is worth retrying.
pub fn is_transient(err: &DbErr) -> bool {
  if let Some(SqlErr::UniqueConstraintViolation(_)) = err.sql_err() {
    return true;
  }
  match err {
    DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
    other => {
      let msg = other.to_string().to_lowercase();
      msg.contains("database is locked")
        || msg.contains("busy")
        || msg.contains("deadlock")
        || msg.contains("could not serialize")
    }
  }
}
