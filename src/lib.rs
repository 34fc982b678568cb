pub mod api;
pub mod auth;
pub mod cache;
pub mod calculator;
pub mod config;
pub mod db;
pub mod error;
pub mod headhunt;
pub mod llms_txt;
pub mod metrics;
pub mod rate_limit;
