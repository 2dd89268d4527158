pub mod claim;
pub mod dispatch;
pub mod expiry;
pub mod notify;
