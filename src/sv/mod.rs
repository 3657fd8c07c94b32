pub mod activation;
pub mod coupon;
pub mod deals;
pub mod flash;
pub mod ledger;
pub mod recipients;
pub mod rescue;
#[cfg(test)]
pub mod test_utils;
pub mod tiers;

pub use activation::{Activation, ActivationReport, ActivationSummary};
pub use coupon::{Coupons, Issued};
pub use deals::{Deals, NewDeal, Surprise};
pub use flash::{ClaimReceipt, Flash, Reveal};
pub use ledger::{ClaimOutcome, Ledger};
pub use recipients::Recipients;
pub use rescue::{Rescue, RescueAction, RescueOutcome};
pub use tiers::{NewTier, TierUnlock, Tiers};
