//! Typed SQLite data access for the personal-assistant backend: users and
//! the companies, projects, reminders, appointments and provider settings
//! they own.

pub mod config;
pub mod db;
pub mod error;
pub mod model;

pub use error::{Result, StoreError};
