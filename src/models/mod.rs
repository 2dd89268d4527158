pub mod assignment;
pub mod driver;
pub mod event;
pub mod order;
pub mod rpc;
