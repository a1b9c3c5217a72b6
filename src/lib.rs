//! 考勤完整性核心库
//! 状态机校验、追加写审计账本、时间权威与提权检测

pub mod background;
pub mod checksum;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
