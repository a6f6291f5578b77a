//! CLI command handlers

pub mod ask;
pub mod config;
pub mod conversation;
pub mod document;
pub mod health;
