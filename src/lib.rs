#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::ignored_unit_patterns
)]

pub mod backend;
pub mod bandplan;
pub mod button;
pub mod config;
pub mod connection;
pub mod daemon;
pub mod deck;
pub mod device;
pub mod error;
pub mod event;
pub mod factory;
pub mod hamlib;
pub mod mqtt;
pub mod page;
pub mod pulse;
pub mod render;
pub mod tci;
