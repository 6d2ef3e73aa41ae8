//! Batch aggregation
//!
//! Computes every derived fact table for one import batch from its rows.
//! Grouping goes through `BTreeMap`s so output order is fixed by key.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;

use super::classify::{classify, ActivityFamily};
use super::LogRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyQueryCount {
    pub date: NaiveDate,
    pub total_queries: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyUserQueryCount {
    pub date: NaiveDate,
    pub user: String,
    pub total_queries: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyAffectedRows {
    pub date: NaiveDate,
    pub total_affected_rows: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyUserAffectedRows {
    pub date: NaiveDate,
    pub user: String,
    pub total_affected_rows: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyQueryVolume {
    pub date: NaiveDate,
    pub hour: u32,
    pub query_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspiciousQuery {
    pub timestamp: Option<NaiveDateTime>,
    pub date: Option<NaiveDate>,
    pub user: String,
    pub query_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityEvent {
    pub timestamp: Option<NaiveDateTime>,
    pub date: Option<NaiveDate>,
    pub user: String,
    pub event_type: String,
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DmlActivity {
    pub date: NaiveDate,
    pub user: String,
    pub dml_type: String,
    pub table_name: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DdlActivity {
    pub date: NaiveDate,
    pub user: String,
    pub ddl_type: String,
    pub object_name: Option<String>,
    pub count: i64,
}

/// All derived facts of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FactSet {
    pub daily_query_counts: Vec<DailyQueryCount>,
    pub daily_user_query_counts: Vec<DailyUserQueryCount>,
    pub daily_affected_rows: Vec<DailyAffectedRows>,
    pub daily_user_affected_rows: Vec<DailyUserAffectedRows>,
    pub hourly_query_volume: Vec<HourlyQueryVolume>,
    pub suspicious_queries: Vec<SuspiciousQuery>,
    pub security_events: Vec<SecurityEvent>,
    pub dml_activity: Vec<DmlActivity>,
    pub ddl_activity: Vec<DdlActivity>,
}

impl FactSet {
    pub fn total_rows(&self) -> usize {
        self.daily_query_counts.len()
            + self.daily_user_query_counts.len()
            + self.daily_affected_rows.len()
            + self.daily_user_affected_rows.len()
            + self.hourly_query_volume.len()
            + self.suspicious_queries.len()
            + self.security_events.len()
            + self.dml_activity.len()
            + self.ddl_activity.len()
    }
}

#[derive(Default)]
struct Totals {
    queries: i64,
    affected_rows: i64,
}

type ActivityKey = (NaiveDate, String, &'static str, Option<String>);

pub fn aggregate(rows: &[LogRow]) -> FactSet {
    let mut per_date: BTreeMap<NaiveDate, Totals> = BTreeMap::new();
    let mut per_date_user: BTreeMap<(NaiveDate, &str), Totals> = BTreeMap::new();
    let mut per_hour: BTreeMap<(NaiveDate, u32), i64> = BTreeMap::new();
    let mut dml: BTreeMap<ActivityKey, i64> = BTreeMap::new();
    let mut ddl: BTreeMap<ActivityKey, i64> = BTreeMap::new();
    let mut facts = FactSet::default();

    for row in rows {
        let tags = classify(row);

        if tags.suspicious {
            facts.suspicious_queries.push(SuspiciousQuery {
                timestamp: row.timestamp,
                date: row.date(),
                user: row.user.clone(),
                query_text: row.query.clone(),
            });
        }
        if let Some(kind) = tags.security_event {
            facts.security_events.push(SecurityEvent {
                timestamp: row.timestamp,
                date: row.date(),
                user: row.user.clone(),
                event_type: kind.as_str().to_string(),
                details: row.query.clone(),
            });
        }

        // Everything below is keyed by date
        let (Some(date), Some(hour)) = (row.date(), row.hour()) else {
            continue;
        };

        let day = per_date.entry(date).or_default();
        day.queries += 1;
        day.affected_rows = day.affected_rows.saturating_add(row.affected_rows);

        let user_day = per_date_user.entry((date, row.user.as_str())).or_default();
        user_day.queries += 1;
        user_day.affected_rows = user_day.affected_rows.saturating_add(row.affected_rows);

        *per_hour.entry((date, hour)).or_default() += 1;

        let activity = match tags.family() {
            Some(ActivityFamily::Dml) => &mut dml,
            Some(ActivityFamily::Ddl) => &mut ddl,
            None => continue,
        };
        let key = (date, row.user.clone(), tags.query_type.as_str(), tags.object_name);
        *activity.entry(key).or_default() += 1;
    }

    for (date, totals) in per_date {
        facts.daily_query_counts.push(DailyQueryCount { date, total_queries: totals.queries });
        facts.daily_affected_rows.push(DailyAffectedRows {
            date,
            total_affected_rows: totals.affected_rows,
        });
    }
    for ((date, user), totals) in per_date_user {
        facts.daily_user_query_counts.push(DailyUserQueryCount {
            date,
            user: user.to_string(),
            total_queries: totals.queries,
        });
        facts.daily_user_affected_rows.push(DailyUserAffectedRows {
            date,
            user: user.to_string(),
            total_affected_rows: totals.affected_rows,
        });
    }
    facts.hourly_query_volume = per_hour
        .into_iter()
        .map(|((date, hour), query_count)| HourlyQueryVolume { date, hour, query_count })
        .collect();
    facts.dml_activity = dml
        .into_iter()
        .map(|((date, user, kind, table_name), count)| DmlActivity {
            date,
            user,
            dml_type: kind.to_string(),
            table_name,
            count,
        })
        .collect();
    facts.ddl_activity = ddl
        .into_iter()
        .map(|((date, user, kind, object_name), count)| DdlActivity {
            date,
            user,
            ddl_type: kind.to_string(),
            object_name,
            count,
        })
        .collect();

    facts
}
