//! Real-time chat and notification gateway.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod broker;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod observability;
pub mod p2p;
pub mod routes;
pub mod state;
pub mod ws;
