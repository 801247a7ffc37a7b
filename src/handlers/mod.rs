//! HTTP and WebSocket request handlers
//!
//! This module organizes all handlers into logical groups:
//! - `api` - Health check endpoint
//! - `twiml` - Call-setup markup for incoming calls
//! - `oauth` - Google Calendar consent flow
//! - `media_stream` - Telephony media-stream WebSocket

pub mod api;
pub mod media_stream;
pub mod oauth;
pub mod twiml;

// Re-export commonly used handlers for convenient access
pub use media_stream::media_stream_handler;
