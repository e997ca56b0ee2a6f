use chrono::{Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// Numeric patterns tried in UK order of preference; day always first except
// for ISO.
static NUMERIC_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"\b\d{2}/\d{2}/\d{4}\b").unwrap(), "%d/%m/%Y"),
        (Regex::new(r"\b\d{2}-\d{2}-\d{4}\b").unwrap(), "%d-%m-%Y"),
        (Regex::new(r"\b\d{2}\.\d{2}\.\d{4}\b").unwrap(), "%d.%m.%Y"),
        (Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").unwrap(), "%Y-%m-%d"),
    ]
});

static MONTH_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\s+(\d{4})\b")
        .unwrap()
});

static LABEL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(mot|expires?|expiry|due|until|test)[:\s]+").unwrap());

/// Outcome of MOT expiry date validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateCheck {
    pub is_valid: bool,
    pub parsed: Option<NaiveDate>,
    /// ISO form, the canonical representation used for comparison.
    pub canonical: Option<String>,
    pub errors: Vec<String>,
    pub is_expired: bool,
    pub days_until_expiry: Option<i64>,
}

/// Strip field labels garage software prints next to the date and collapse
/// whitespace.
fn clean(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    LABEL_PREFIX.replace(&collapsed, "").trim().to_string()
}

/// Parse a date in any of the formats garage software is known to display.
pub fn parse_mot_date(raw: &str) -> Option<NaiveDate> {
    let cleaned = clean(raw);
    if cleaned.is_empty() {
        return None;
    }

    for (pattern, format) in NUMERIC_PATTERNS.iter() {
        if let Some(m) = pattern.find(&cleaned) {
            if let Ok(date) = NaiveDate::parse_from_str(m.as_str(), format) {
                return Some(date);
            }
        }
    }

    if let Some(caps) = MONTH_NAME_PATTERN.captures(&cleaned) {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_number(&caps[2])?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    None
}

/// Canonical ISO form for cross-model comparison; None when unparseable.
pub fn canonicalize(raw: &str) -> Option<String> {
    parse_mot_date(raw).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Full validation: parse, then sanity-check the window a real MOT expiry
/// can fall in.
pub fn check(raw: &str) -> DateCheck {
    let Some(parsed) = parse_mot_date(raw) else {
        return DateCheck {
            is_valid: false,
            parsed: None,
            canonical: None,
            errors: vec!["could not parse date".to_string()],
            is_expired: false,
            days_until_expiry: None,
        };
    };

    let mut errors = Vec::new();
    let today = Utc::now().date_naive();
    let days_diff = (parsed - today).num_days();

    if days_diff < -730 {
        errors.push("date is more than 2 years in the past".to_string());
    }
    if days_diff > 730 {
        errors.push("date is more than 2 years in the future".to_string());
    }
    if parsed.year() < 1960 {
        errors.push("date is before MOT testing began".to_string());
    }

    let is_expired = days_diff < 0;

    DateCheck {
        is_valid: errors.is_empty(),
        canonical: Some(parsed.format("%Y-%m-%d").to_string()),
        parsed: Some(parsed),
        errors,
        is_expired,
        days_until_expiry: if is_expired { None } else { Some(days_diff) },
    }
}

fn month_number(name: &str) -> Option<u32> {
    match name.to_ascii_lowercase().as_str() {
        "jan" => Some(1),
        "feb" => Some(2),
        "mar" => Some(3),
        "apr" => Some(4),
        "may" => Some(5),
        "jun" => Some(6),
        "jul" => Some(7),
        "aug" => Some(8),
        "sep" => Some(9),
        "oct" => Some(10),
        "nov" => Some(11),
        "dec" => Some(12),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uk_numeric_formats() {
        let expected = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert_eq!(parse_mot_date("01/06/2026"), Some(expected));
        assert_eq!(parse_mot_date("01-06-2026"), Some(expected));
        assert_eq!(parse_mot_date("01.06.2026"), Some(expected));
        assert_eq!(parse_mot_date("2026-06-01"), Some(expected));
    }

    #[test]
    fn parses_month_names() {
        let expected = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert_eq!(parse_mot_date("1 Jun 2026"), Some(expected));
        assert_eq!(parse_mot_date("1 June 2026"), Some(expected));
    }

    #[test]
    fn strips_field_labels() {
        let expected = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert_eq!(parse_mot_date("MOT: 01/06/2026"), Some(expected));
        assert_eq!(parse_mot_date("Expires 01/06/2026"), Some(expected));
    }

    #[test]
    fn rejects_impossible_dates() {
        assert_eq!(parse_mot_date("32/13/2026"), None);
        assert_eq!(parse_mot_date("NOT_FOUND"), None);
        assert_eq!(parse_mot_date(""), None);
    }

    #[test]
    fn canonical_form_merges_representations() {
        assert_eq!(canonicalize("01/06/2026"), canonicalize("2026-06-01"));
        assert_eq!(canonicalize("01/06/2026").as_deref(), Some("2026-06-01"));
    }

    #[test]
    fn flags_dates_outside_plausible_window() {
        let result = check("01/06/2010");
        assert!(!result.is_valid);
        assert!(result.is_expired);
    }
}
