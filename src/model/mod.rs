//! Typed entities and the input shapes used to create and change them.
//!
//! Structs here carry data and input validation only. SQL lives in
//! `crate::db`.

use crate::error::{Result, StoreError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

mod ai_config;
mod appointment;
mod company;
mod messaging_config;
mod project;
mod reminder;
mod user;

pub use ai_config::{AiConfig, AiConfigChanges, NewAiConfig, Provider, ProviderSettings};
pub use appointment::{Appointment, AppointmentChanges, NewAppointment};
pub use company::{Company, CompanyChanges, NewCompany};
pub use messaging_config::{MessagingConfig, MessagingConfigChanges, NewMessagingConfig};
pub use project::{NewProject, Project, ProjectChanges};
pub use reminder::{NewReminder, Reminder, ReminderChanges};
pub use user::{Include, NewUser, User, UserChanges, UserWithRelations};

/// Update operation for ordered string-list columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListUpdate {
    /// Replace the whole list.
    Set(Vec<String>),
    /// Append to the end, keeping existing entries in order.
    Push(Vec<String>),
}

/// Result of a multi-row mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub count: u64,
}

/// One bucket of a `group_by` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupCount {
    pub key: Option<String>,
    pub count: i64,
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Emails are compared and stored lower-cased without surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn check_email(email: &str) -> Result<()> {
    if !EMAIL_RE.is_match(email) {
        return Err(StoreError::validation(format!(
            "email '{email}' is not a valid address"
        )));
    }
    Ok(())
}

pub(crate) fn check_required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StoreError::validation(format!("{field} must be non-empty")));
    }
    Ok(())
}

pub(crate) fn check_http_url(field: &str, value: &str) -> Result<()> {
    let v = value.trim();
    if !(v.starts_with("http://") || v.starts_with("https://")) {
        return Err(StoreError::validation(format!(
            "{field} must be an http(s) URL"
        )));
    }
    Ok(())
}

/// Drop blank entries and trim the rest; ordering is kept.
/// Reads a present field as `Some(value)`, so an explicit `null` becomes
/// `Some(None)` while a missing field keeps the `None` default.
pub(crate) fn double_option<'de, T, D>(d: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

pub(crate) fn clean_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ListUpdate {
    pub fn cleaned(&self) -> ListUpdate {
        match self {
            ListUpdate::Set(items) => ListUpdate::Set(clean_list(items)),
            ListUpdate::Push(items) => ListUpdate::Push(clean_list(items)),
        }
    }

    /// Apply to an in-memory list, mirroring what the SQL update does.
    pub fn apply(&self, current: &mut Vec<String>) {
        match self {
            ListUpdate::Set(items) => *current = items.clone(),
            ListUpdate::Push(items) => current.extend(items.iter().cloned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(check_email("ana@example.com").is_ok());
        assert!(check_email("ana@example").is_err());
        assert!(check_email("not an email").is_err());
        assert!(check_email("").is_err());
    }

    #[test]
    fn normalizes_email() {
        assert_eq!(normalize_email("  Ana@Example.COM "), "ana@example.com");
    }

    #[test]
    fn list_update_apply() {
        let mut skills = vec!["rust".to_string()];
        ListUpdate::Push(vec!["sql".into(), "go".into()]).apply(&mut skills);
        assert_eq!(skills, vec!["rust", "sql", "go"]);
        ListUpdate::Set(vec!["zig".into()]).apply(&mut skills);
        assert_eq!(skills, vec!["zig"]);
    }

    #[test]
    fn cleaned_drops_blank_entries() {
        let update = ListUpdate::Push(vec![" a ".into(), "".into(), "  ".into(), "b".into()]);
        assert_eq!(update.cleaned(), ListUpdate::Push(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn http_urls() {
        assert!(check_http_url("url", "https://evo.example.com").is_ok());
        assert!(check_http_url("url", "ftp://evo").is_err());
    }
}
