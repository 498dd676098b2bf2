//! ember 各个 crate 共享的小工具

pub mod init_log;

pub use init_log::{init_log, init_test_log};
