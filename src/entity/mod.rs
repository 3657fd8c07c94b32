pub mod batch;
pub mod claim;
pub mod coupon;
pub mod deal;
pub mod item;
pub mod recipient;
pub mod tier;

pub use batch::{BatchReason, BatchStatus};
pub use deal::DealState;
pub use item::MessageKind;
pub use recipient::Cadence;
