//! API models for timetable entries and the weekly calendar grid.

use super::{pagination::Pagination, users::UserSummary};
use crate::{
    db::models::timetable::{TimetableEntryDBResponse, Weekday},
    types::{CLASS_CHOICES, COLOR_CHOICES, DEFAULT_COLOR, SECTION_CHOICES, TimetableEntryId, UserId},
};
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// First and last hourly slot shown on the calendar (08:00 .. 17:00).
pub const CALENDAR_FIRST_HOUR: u32 = 8;
pub const CALENDAR_LAST_HOUR: u32 = 17;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TimetableEntryCreate {
    pub day: Weekday,
    #[schema(value_type = String, example = "09:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, example = "09:45:00")]
    pub end_time: NaiveTime,
    pub subject: String,
    /// Required for admins; teachers always create entries for themselves
    #[schema(value_type = Option<String>, format = "uuid")]
    pub teacher_id: Option<UserId>,
    pub student_class: String,
    pub section: String,
    pub classroom: String,
    /// One of the palette colours; defaults to `#3357FF`
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TimetableEntryUpdate {
    pub day: Option<Weekday>,
    #[schema(value_type = Option<String>)]
    pub start_time: Option<NaiveTime>,
    #[schema(value_type = Option<String>)]
    pub end_time: Option<NaiveTime>,
    pub subject: Option<String>,
    /// Only admins may reassign an entry
    #[schema(value_type = Option<String>, format = "uuid")]
    pub teacher_id: Option<UserId>,
    pub student_class: Option<String>,
    pub section: Option<String>,
    pub classroom: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TimetableEntryResponse {
    pub id: TimetableEntryId,
    pub day: Weekday,
    #[schema(value_type = String)]
    pub start_time: NaiveTime,
    #[schema(value_type = String)]
    pub end_time: NaiveTime,
    pub subject: String,
    #[schema(value_type = String, format = "uuid")]
    pub teacher_id: UserId,
    /// Filled in when the teacher could be loaded
    pub teacher: Option<UserSummary>,
    pub student_class: String,
    pub section: String,
    pub classroom: String,
    pub color: String,
}

impl From<TimetableEntryDBResponse> for TimetableEntryResponse {
    fn from(db: TimetableEntryDBResponse) -> Self {
        Self {
            id: db.id,
            day: db.day,
            start_time: db.start_time,
            end_time: db.end_time,
            subject: db.subject,
            teacher_id: db.teacher_id,
            teacher: None,
            student_class: db.student_class,
            section: db.section,
            classroom: db.classroom,
            color: db.color,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListTimetableQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    pub day: Option<Weekday>,
    /// Admin only: narrow to one class
    pub student_class: Option<String>,
    /// Admin only: narrow to one section
    pub section: Option<String>,
}

/// The fixed choices a timetable form offers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TimetableChoices {
    pub days: Vec<Weekday>,
    pub classes: Vec<String>,
    pub sections: Vec<String>,
    pub colors: Vec<String>,
    pub default_color: String,
}

impl Default for TimetableChoices {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            days: Weekday::ALL.to_vec(),
            classes: owned(&CLASS_CHOICES),
            sections: owned(&SECTION_CHOICES),
            colors: owned(&COLOR_CHOICES),
            default_color: DEFAULT_COLOR.to_string(),
        }
    }
}

/// One hourly row of the calendar: the entries starting in that hour, per day.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CalendarSlot {
    /// Hour of day, 8..=17
    pub hour: u32,
    /// Display label such as "08:00"
    pub label: String,
    /// One cell per day, Monday first
    pub cells: Vec<Vec<TimetableEntryResponse>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CalendarResponse {
    pub days: Vec<Weekday>,
    pub slots: Vec<CalendarSlot>,
}

impl CalendarResponse {
    /// Lay entries out on a Monday..Sunday x 08:00..17:00 grid.
    ///
    /// An entry lands in the cell whose hour equals its start hour; entries starting outside the
    /// grid are not shown.
    pub fn build(entries: Vec<TimetableEntryResponse>) -> Self {
        let mut slots: Vec<CalendarSlot> = (CALENDAR_FIRST_HOUR..=CALENDAR_LAST_HOUR)
            .map(|hour| CalendarSlot {
                hour,
                label: format!("{hour:02}:00"),
                cells: vec![Vec::new(); Weekday::ALL.len()],
            })
            .collect();

        for entry in entries {
            let hour = entry.start_time.hour();
            if !(CALENDAR_FIRST_HOUR..=CALENDAR_LAST_HOUR).contains(&hour) {
                continue;
            }
            let Some(day) = Weekday::ALL.iter().position(|d| *d == entry.day) else {
                continue;
            };
            slots[(hour - CALENDAR_FIRST_HOUR) as usize].cells[day].push(entry);
        }
        for slot in &mut slots {
            for cell in &mut slot.cells {
                cell.sort_by_key(|e| e.start_time);
            }
        }

        Self {
            days: Weekday::ALL.to_vec(),
            slots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(id: i64, day: Weekday, h: u32, m: u32) -> TimetableEntryResponse {
        TimetableEntryResponse {
            id,
            day,
            start_time: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(h + 1, 0, 0).unwrap(),
            subject: "Maths".to_string(),
            teacher_id: Uuid::nil(),
            teacher: None,
            student_class: "Class 1".to_string(),
            section: "A".to_string(),
            classroom: "R1".to_string(),
            color: "#3357FF".to_string(),
        }
    }

    #[test]
    fn test_calendar_grid_shape() {
        let calendar = CalendarResponse::build(vec![]);
        assert_eq!(calendar.days.len(), 7);
        assert_eq!(calendar.days[0], Weekday::Monday);
        assert_eq!(calendar.slots.len(), 10);
        assert_eq!(calendar.slots[0].label, "08:00");
        assert_eq!(calendar.slots[9].label, "17:00");
        assert!(calendar.slots.iter().all(|s| s.cells.len() == 7));
    }

    #[test]
    fn test_entries_land_in_start_hour_cell() {
        let calendar = CalendarResponse::build(vec![
            entry(1, Weekday::Wednesday, 9, 30),
            entry(2, Weekday::Wednesday, 9, 0),
            entry(3, Weekday::Sunday, 17, 15),
            entry(4, Weekday::Monday, 7, 0),
            entry(5, Weekday::Monday, 18, 0),
        ]);

        let nine = &calendar.slots[1];
        assert_eq!(nine.hour, 9);
        let ids: Vec<_> = nine.cells[2].iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(calendar.slots[9].cells[6][0].id, 3);

        let placed: usize = calendar.slots.iter().flat_map(|s| &s.cells).map(Vec::len).sum();
        assert_eq!(placed, 3);
    }
}
