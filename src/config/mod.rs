// src/config/mod.rs

//! Bot configuration: TOML model, loading and validation.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default};
pub use model::{
    BotConfig, BotSection, BrokerSection, MetricsSection, NonceSection, RawBotConfig,
    StateSection,
};
