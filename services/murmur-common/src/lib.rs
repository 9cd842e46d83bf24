//! Murmur Common - shared configuration, errors, and logging for the Murmur agent.
//!
//! This crate provides:
//! - Configuration types and loading
//! - The unified error taxonomy used across services
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    AgentConfig, BrainConfig, Config, ModelTierConfig, ObservabilityConfig, PlatformConfig,
    TelegramConfig,
};
pub use error::{Error, Result};
