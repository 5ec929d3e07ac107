//! CalDAV integration for calbridge.
//!
//! Provides the iCalendar encoder/decoder, a reqwest-backed CalDAV client,
//! the [`service::CalendarService`] wrapper that resolves calendars and
//! events, and the MCP tools that expose it.

pub mod client;
pub mod discovery;
pub mod error;
pub mod ical;
pub mod service;
#[cfg(test)]
mod testing;
pub mod time;
pub mod tools;
pub mod types;
pub mod xml;

pub use {
    client::{CalDavClient, HttpCalDavClient, SharedCalDavClient},
    error::{Error, Result},
    service::CalendarService,
    tools::{ServerDetails, register_calendar_tools},
};
