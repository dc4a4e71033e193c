pub mod approval;
pub mod assess;
pub mod audit;
pub mod cli;
pub mod config;
pub mod core;
pub mod exit;
pub mod export;
pub mod fmea;
pub mod identity;
pub mod regulatory;
pub mod store;
pub mod ui;
