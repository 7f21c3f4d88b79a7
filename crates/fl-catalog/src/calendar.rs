//! Date-keyed lookup of reading and saint pages.

use fl_core::ProxyError;
use fl_core::ProxyResult;
use fl_core::ResourceRequest;
use chrono::Datelike;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub const TAMIL_MONTHS: [&str; 12] = [
    "ஜனவரி",
    "பிப்ரவரி",
    "மார்ச்",
    "ஏப்ரல்",
    "மே",
    "ஜூன்",
    "ஜூலை",
    "ஆகஸ்ட்",
    "செப்டம்பர்",
    "அக்டோபர்",
    "நவம்பர்",
    "டிசம்பர்",
];

/// Parses a `YYYY-MM-DD` key into a calendar date.
pub fn parse_date(key: &str) -> ProxyResult<NaiveDate> {
    NaiveDate::parse_from_str(key.trim(), DATE_FORMAT).map_err(|error| {
        ProxyError::config(
            "calendar.date_invalid",
            format!("`{key}` is not a YYYY-MM-DD date: {error}"),
        )
    })
}

pub fn tamil_month(date: NaiveDate) -> &'static str {
    let index = usize::try_from(date.month0()).unwrap_or_default();
    TAMIL_MONTHS.get(index).copied().unwrap_or_default()
}

/// Links recorded for one day. Either may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    #[serde(default)]
    pub reading_url: Option<String>,
    #[serde(default)]
    pub saint_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarLinks {
    pub reading: String,
    pub saint: String,
}

/// Read-only `YYYY-MM-DD -> {readingUrl, saintUrl}` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarLookup {
    origin: String,
    entries: BTreeMap<NaiveDate, CalendarEntry>,
}

impl CalendarLookup {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.trim_end_matches('/').to_owned(),
            entries: BTreeMap::new(),
        }
    }

    /// Loads the table; keys that are not dates are skipped with a warning.
    pub fn from_json(origin: &str, json: &str) -> ProxyResult<Self> {
        let raw: BTreeMap<String, CalendarEntry> = serde_json::from_str(json).map_err(|error| {
            ProxyError::config(
                "calendar.invalid",
                format!("failed to parse calendar table: {error}"),
            )
        })?;

        let mut lookup = Self::new(origin);
        for (key, entry) in raw {
            match parse_date(&key) {
                Ok(date) => {
                    lookup.entries.insert(date, entry);
                }
                Err(error) => warn!(key = %key, code = error.code, "skipping calendar entry"),
            }
        }
        Ok(lookup)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, date: NaiveDate) -> Option<&CalendarEntry> {
        self.entries.get(&date)
    }

    /// Reading and saint pages for `date`, falling back to the site's
    /// per-year calendar and per-day saint pages.
    pub fn links_for(&self, date: NaiveDate) -> CalendarLinks {
        let entry = self.entry(date);
        let reading = entry
            .and_then(|entry| non_empty(entry.reading_url.as_deref()))
            .map(|reading| format!("{}/ref2009/{reading}", self.origin))
            .unwrap_or_else(|| format!("{}/ref2009/u_calendar{:04}.htm", self.origin, date.year()));
        let saint = entry
            .and_then(|entry| non_empty(entry.saint_url.as_deref()))
            .map(|saint| {
                let path = saint.strip_prefix("../").unwrap_or(saint).trim_start_matches('/');
                format!("{}/{path}", self.origin)
            })
            .unwrap_or_else(|| {
                format!(
                    "{}/saints/{:02}{:02}.htm",
                    self.origin,
                    date.month(),
                    date.day()
                )
            });

        CalendarLinks { reading, saint }
    }

    pub fn reading_request(&self, date: NaiveDate) -> ResourceRequest {
        ResourceRequest::new(
            self.links_for(date).reading,
            format!("இன்றைய சிந்தனை - {} {}", date.day(), tamil_month(date)),
        )
    }

    pub fn saint_request(&self, date: NaiveDate) -> ResourceRequest {
        ResourceRequest::new(
            self.links_for(date).saint,
            format!("இன்றைய புனிதர் - {} {}", date.day(), tamil_month(date)),
        )
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::CalendarLookup;
    use super::parse_date;
    use super::tamil_month;
    use chrono::NaiveDate;

    const ORIGIN: &str = "https://www.bibleintamil.com";

    fn date(key: &str) -> NaiveDate {
        match parse_date(key) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn lookup() -> CalendarLookup {
        let lookup = CalendarLookup::from_json(
            ORIGIN,
            r#"{
                "2026-01-06": {"readingUrl": "u_cal-2026-01-06.htm", "saintUrl": "../saints/0106.htm"},
                "2026-02-02": {"readingUrl": ""},
                "not-a-date": {"readingUrl": "x.htm"}
            }"#,
        );
        assert!(lookup.is_ok());
        match lookup {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn recorded_links_are_rooted_at_the_origin() {
        let links = lookup().links_for(date("2026-01-06"));
        assert_eq!(links.reading, "https://www.bibleintamil.com/ref2009/u_cal-2026-01-06.htm");
        assert_eq!(links.saint, "https://www.bibleintamil.com/saints/0106.htm");
    }

    #[test]
    fn missing_links_fall_back_to_date_patterns() {
        let table = lookup();
        let links = table.links_for(date("2026-02-02"));
        assert_eq!(links.reading, "https://www.bibleintamil.com/ref2009/u_calendar2026.htm");
        assert_eq!(links.saint, "https://www.bibleintamil.com/saints/0202.htm");

        let unknown = table.links_for(date("2027-12-25"));
        assert_eq!(unknown.reading, "https://www.bibleintamil.com/ref2009/u_calendar2027.htm");
        assert_eq!(unknown.saint, "https://www.bibleintamil.com/saints/1225.htm");
    }

    #[test]
    fn invalid_keys_are_skipped() {
        assert_eq!(lookup().len(), 2);
    }

    #[test]
    fn requests_carry_tamil_titles() {
        let table = lookup();
        let reading = table.reading_request(date("2026-01-06"));
        assert_eq!(reading.title, "இன்றைய சிந்தனை - 6 ஜனவரி");
        assert_eq!(
            reading.target(),
            Some("https://www.bibleintamil.com/ref2009/u_cal-2026-01-06.htm")
        );

        let saint = table.saint_request(date("2026-08-15"));
        assert_eq!(saint.title, "இன்றைய புனிதர் - 15 ஆகஸ்ட்");
    }

    #[test]
    fn dates_are_validated() {
        assert!(parse_date("2024-02-29").is_ok());
        assert!(parse_date("2026-13-01").is_err());
        assert!(parse_date("2026-1").is_err());
        assert!(parse_date(" 2026-03-07 ").is_ok());

        let invalid = parse_date("2026-02-29");
        assert!(invalid.is_err());
        if let Err(error) = invalid {
            assert_eq!(error.code, "calendar.date_invalid");
        }
    }

    #[test]
    fn months_are_named_in_tamil() {
        assert_eq!(tamil_month(date("2026-01-31")), "ஜனவரி");
        assert_eq!(tamil_month(date("2026-12-01")), "டிசம்பர்");
    }

    #[test]
    fn malformed_table_is_rejected() {
        let lookup = CalendarLookup::from_json(ORIGIN, "[1, 2]");
        assert!(lookup.is_err());
    }
}
