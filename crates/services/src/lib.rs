//! 业务服务
//!
//! - `ledger_service`: 账户额度预留、扣减、结算与补充
//! - `refill_task`: 定时补充额度的后台任务

pub mod ledger_service;
pub mod refill_task;

pub use ledger_service::{CaptureGuard, Ledger, RefillSummary, Reservation};
pub use refill_task::spawn_refill_task;
