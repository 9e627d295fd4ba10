use super::check_required;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub completed: bool,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    /// Not completed and due at or before `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due_date <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReminder {
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
}

impl NewReminder {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>, due_date: DateTime<Utc>) -> Self {
        NewReminder {
            user_id: user_id.into(),
            title: title.into(),
            description: None,
            due_date,
            completed: false,
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        check_required("reminder.user_id", &self.user_id)?;
        check_required("reminder.title", &self.title)?;
        self.title = self.title.trim().to_string();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReminderChanges {
    pub title: Option<String>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed: Option<bool>,
}

impl ReminderChanges {
    pub fn prepare(&mut self) -> Result<()> {
        if let Some(title) = self.title.as_mut() {
            check_required("reminder.title", title)?;
            *title = title.trim().to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn overdue_only_when_pending() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        let mut r = Reminder {
            id: "r1".into(),
            title: "call".into(),
            description: None,
            due_date: now - Duration::hours(1),
            completed: false,
            user_id: "u1".into(),
            created_at: now,
            updated_at: now,
        };
        assert!(r.is_overdue(now));
        r.completed = true;
        assert!(!r.is_overdue(now));
        r.completed = false;
        r.due_date = now + Duration::minutes(5);
        assert!(!r.is_overdue(now));
    }
}
