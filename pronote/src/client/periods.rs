use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::client::json;
use crate::error::{PronoteError, Result};

/// Parse a Pronote date or date-time string.
///
/// Accepted shapes: `dd/mm/yyyy`, `dd/mm/yy`, `dd/mm/yyyy HH:MM:SS`,
/// `dd/mm/yy HHhMM`. Plain dates resolve to midnight.
pub fn parse_datetime(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    let (date_part, time_part) = match raw.split_once(' ') {
        Some((d, t)) => (d, Some(t.trim())),
        None => (raw, None),
    };
    let long_year = date_part.rsplit('/').next().map(str::len) == Some(4);

    let parsed = match (time_part, long_year) {
        (None, _) => parse_date(date_part).map(|d| d.and_hms_opt(0, 0, 0)).ok().flatten(),
        (Some(t), true) if t.contains(':') => {
            NaiveDateTime::parse_from_str(raw, "%d/%m/%Y %H:%M:%S").ok()
        }
        (Some(t), false) if t.contains('h') => {
            NaiveDateTime::parse_from_str(raw, "%d/%m/%y %Hh%M").ok()
        }
        _ => None,
    };
    parsed.ok_or_else(|| PronoteError::parsing(format!("could not parse date {raw}"), &[]))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    let format = if raw.rsplit('/').next().map(str::len) == Some(4) {
        "%d/%m/%Y"
    } else {
        "%d/%m/%y"
    };
    NaiveDate::parse_from_str(raw, format)
        .map_err(|e| PronoteError::parsing(format!("could not parse date {raw}: {e}"), &[]))
}

fn datetime_at(value: &Value, path: &[&str]) -> Result<NaiveDateTime> {
    let raw = json::str_at(value, path)?;
    parse_datetime(raw).map_err(|_| PronoteError::parsing(format!("could not parse date {raw}"), path))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub id: String,
    pub name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Period {
    fn from_json(value: &Value) -> Result<Self> {
        let id = match json::at(value, &["N"])? {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Ok(Self {
            id,
            name: json::str_at(value, &["L"])?.to_string(),
            start: datetime_at(value, &["dateDebut", "V"])?,
            end: datetime_at(value, &["dateFin", "V"])?,
        })
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Periods declared by one session, looked up by id.
#[derive(Debug, Clone, Default)]
pub struct PeriodRepository {
    periods: BTreeMap<String, Period>,
    order: Vec<String>,
}

impl PeriodRepository {
    /// Build from the parameters response (`dataSec.data.General.ListePeriodes`).
    /// A response without a period list yields an empty repository.
    pub fn from_options(options: &Value) -> Result<Self> {
        let mut repository = Self::default();
        let list = json::get(options, &["dataSec", "data", "General", "ListePeriodes"]);
        if let Some(Value::Array(items)) = list {
            for item in items {
                repository.insert(Period::from_json(item)?);
            }
        }
        tracing::debug!("Loaded {} periods", repository.len());
        Ok(repository)
    }

    pub fn insert(&mut self, period: Period) {
        if !self.periods.contains_key(&period.id) {
            self.order.push(period.id.clone());
        }
        self.periods.insert(period.id.clone(), period);
    }

    pub fn get(&self, id: &str) -> Option<&Period> {
        self.periods.get(id)
    }

    /// Periods in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Period> {
        self.order.iter().filter_map(|id| self.periods.get(id))
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// First declared period containing `at`
    pub fn current(&self, at: NaiveDateTime) -> Option<&Period> {
        self.iter().find(|p| p.contains(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_date_shapes() {
        assert_eq!(parse_datetime("02/09/2024").unwrap(), dt(2024, 9, 2, 0, 0, 0));
        assert_eq!(parse_datetime("02/09/24").unwrap(), dt(2024, 9, 2, 0, 0, 0));
        assert_eq!(
            parse_datetime("02/09/2024 08:30:15").unwrap(),
            dt(2024, 9, 2, 8, 30, 15)
        );
        assert_eq!(parse_datetime("02/09/24 14h05").unwrap(), dt(2024, 9, 2, 14, 5, 0));
        assert!(parse_datetime("2024-09-02").is_err());
        assert!(parse_datetime("02/09/2024 14h05").is_err());
    }

    #[test]
    fn test_bad_period_date_is_a_parsing_error() {
        let options = json!({"dataSec": {"data": {"General": {"ListePeriodes": [
            {"N": "1A", "L": "Trimestre 1", "dateDebut": {"V": "2024-09-02"}, "dateFin": {"V": "30/11/2024"}}
        ]}}}});
        match PeriodRepository::from_options(&options) {
            Err(PronoteError::Parsing { path, .. }) => assert_eq!(path, vec!["dateDebut", "V"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(parse_date("31/02/2024"), Err(PronoteError::Parsing { .. })));
    }

    #[test]
    fn test_repository_from_options() {
        let options = json!({"dataSec": {"data": {"General": {"ListePeriodes": [
            {"N": "1A", "L": "Trimestre 1", "dateDebut": {"V": "02/09/2024"}, "dateFin": {"V": "30/11/2024"}},
            {"N": "2A", "L": "Trimestre 2", "dateDebut": {"V": "01/12/2024"}, "dateFin": {"V": "28/02/2025"}}
        ]}}}});
        let repository = PeriodRepository::from_options(&options).unwrap();
        assert_eq!(repository.len(), 2);
        assert_eq!(repository.get("2A").unwrap().name, "Trimestre 2");
        assert!(repository.get("9Z").is_none());
        assert_eq!(
            repository.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["1A", "2A"]
        );
        let current = repository.current(dt(2024, 10, 10, 12, 0, 0)).unwrap();
        assert_eq!(current.id, "1A");
    }

    #[test]
    fn test_repository_tolerates_missing_list() {
        let repository = PeriodRepository::from_options(&json!({"dataSec": {"data": {}}})).unwrap();
        assert!(repository.is_empty());
    }

    #[test]
    fn test_malformed_period_is_parsing_error() {
        let options = json!({"dataSec": {"data": {"General": {"ListePeriodes": [{"N": "1"}]}}}});
        assert!(matches!(
            PeriodRepository::from_options(&options),
            Err(PronoteError::Parsing { .. })
        ));
    }
}
