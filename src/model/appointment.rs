use super::check_required;
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && self.end_time > start
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
}

impl NewAppointment {
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        NewAppointment {
            user_id: user_id.into(),
            title: title.into(),
            description: None,
            start_time,
            end_time,
            location: None,
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        check_required("appointment.user_id", &self.user_id)?;
        check_required("appointment.title", &self.title)?;
        self.title = self.title.trim().to_string();
        check_window(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppointmentChanges {
    pub title: Option<String>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "super::double_option", skip_serializing_if = "Option::is_none")]
    pub location: Option<Option<String>>,
}

impl AppointmentChanges {
    pub fn prepare(&mut self) -> Result<()> {
        if let Some(title) = self.title.as_mut() {
            check_required("appointment.title", title)?;
            *title = title.trim().to_string();
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            check_window(start, end)?;
        }
        Ok(())
    }
}

pub(crate) fn check_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if end < start {
        return Err(StoreError::validation(
            "appointment.end_time must not be before start_time",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn rejects_inverted_window() {
        let start = Utc.with_ymd_and_hms(2026, 10, 18, 10, 0, 0).unwrap();
        let mut appt = NewAppointment::new("u1", "sync", start, start - Duration::minutes(1));
        assert!(matches!(appt.prepare(), Err(StoreError::Validation(_))));
    }

    #[test]
    fn zero_length_is_allowed() {
        let start = Utc.with_ymd_and_hms(2026, 10, 18, 10, 0, 0).unwrap();
        let mut appt = NewAppointment::new("u1", "ping", start, start);
        assert!(appt.prepare().is_ok());
    }
}
