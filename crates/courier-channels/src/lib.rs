//! # Courier Channels
//!
//! Channel adapter implementations consumed by the dispatch engine through
//! the `courier_core::traits::Channel` trait.

pub mod whatsapp;

pub use whatsapp::WhatsAppBridgeChannel;
