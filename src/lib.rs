pub mod action;
pub mod batch;
pub mod browser;
pub mod error;
pub mod pool;
pub mod session;
pub mod trace;
pub mod viewport;
