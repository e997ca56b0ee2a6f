use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// UK number-plate families, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateFormat {
    /// 2001-present: AB12 CDE
    Current,
    /// 1983-2001: A123 BCD
    Prefix,
    /// 1963-1983: ABC 123D
    Suffix,
    /// pre-1963: 1234 AB
    Dateless,
    /// Northern Ireland: ABC 1234
    NorthernIreland,
}

impl PlateFormat {
    pub fn description(&self) -> &'static str {
        match self {
            PlateFormat::Current => "Current format (2001-present): AB12 CDE",
            PlateFormat::Prefix => "Prefix format (1983-2001): A123 BCD",
            PlateFormat::Suffix => "Suffix format (1963-1983): ABC 123D",
            PlateFormat::Dateless => "Dateless format (pre-1963): 1234 AB",
            PlateFormat::NorthernIreland => "Northern Ireland format: ABC 1234",
        }
    }
}

// Patterns match the normalized (spaceless, uppercase) form. Suffix must be
// tried before Northern Ireland: ABC123D vs ABC1234 differ only in the tail.
static PLATE_PATTERNS: Lazy<Vec<(PlateFormat, Regex)>> = Lazy::new(|| {
    vec![
        (
            PlateFormat::Current,
            Regex::new(r"^[A-Z]{2}[0-9]{2}[A-Z]{3}$").unwrap(),
        ),
        (
            PlateFormat::Prefix,
            Regex::new(r"^[A-Z][0-9]{1,3}[A-Z]{3}$").unwrap(),
        ),
        (
            PlateFormat::Suffix,
            Regex::new(r"^[A-Z]{3}[0-9]{1,3}[A-Z]$").unwrap(),
        ),
        (
            PlateFormat::Dateless,
            Regex::new(r"^[0-9]{1,4}[A-Z]{1,3}$").unwrap(),
        ),
        (
            PlateFormat::NorthernIreland,
            Regex::new(r"^[A-Z]{1,3}[0-9]{1,4}$").unwrap(),
        ),
    ]
});

/// DVLA memory-tag letters in use for current-format plates.
const AREA_LETTERS: &str = "ABCDEFGHKLMNOPRSVWY";

/// Outcome of the registration format gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationCheck {
    pub normalized: String,
    pub format: Option<PlateFormat>,
    pub is_valid: bool,
    /// Registration year decoded from the age identifier (current format only).
    pub estimated_year: Option<i32>,
    pub errors: Vec<String>,
}

/// Uppercase and strip everything that is not a letter or digit.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

/// Raw -> Normalized -> Valid/Invalid. Only a Valid verdict may be sent to
/// the external registry.
pub fn check(raw: &str) -> RegistrationCheck {
    let normalized = normalize(raw);
    let mut errors = Vec::new();

    if normalized.is_empty() {
        return RegistrationCheck {
            normalized,
            format: None,
            is_valid: false,
            estimated_year: None,
            errors: vec!["registration is empty".to_string()],
        };
    }

    let format = PLATE_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(&normalized))
        .map(|(fmt, _)| *fmt);

    let Some(format) = format else {
        return RegistrationCheck {
            normalized,
            format: None,
            is_valid: false,
            estimated_year: None,
            errors: vec!["does not match any known UK registration format".to_string()],
        };
    };

    let mut estimated_year = None;
    if format == PlateFormat::Current {
        let area = &normalized[0..1];
        if !AREA_LETTERS.contains(area) {
            errors.push(format!("invalid DVLA area letter: {area}"));
        }

        let age_code = &normalized[2..4];
        match decode_age_identifier(age_code) {
            Some(year) => {
                // Plates for March/September of year N are issued from late
                // in year N-1 at the earliest, so one year of slack.
                if year > Utc::now().year() + 1 {
                    errors.push(format!("age identifier {age_code} is from the future"));
                } else {
                    estimated_year = Some(year);
                }
            }
            None => errors.push(format!("invalid age identifier: {age_code}")),
        }
    }

    RegistrationCheck {
        normalized,
        format: Some(format),
        is_valid: errors.is_empty(),
        estimated_year,
        errors,
    }
}

/// March plates carry the two-digit year, September plates the year plus 50.
fn decode_age_identifier(code: &str) -> Option<i32> {
    let n: i32 = code.parse().ok()?;
    match n {
        1..=49 => Some(2000 + n),
        51..=99 => Some(1950 + n),
        _ => None,
    }
}
