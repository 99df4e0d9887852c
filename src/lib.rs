//! whatsapp-mcp: WhatsApp tools for AI assistants over the Model Context
//! Protocol.
//!
//! Twelve tools (search, read, send, download) are validated against static
//! schemas and routed to a WhatsApp bridge over HTTP.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod mcp;
pub mod tools;
pub mod whatsapp;
