use chrono::{DateTime, Utc};
use convene_models::Location;

use crate::config::LimitsConfig;
use crate::error::CoreError;

fn contains_dangerous_markup(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.contains("<script")
        || lower.contains("javascript:")
        || lower.contains("onerror=")
        || lower.contains("onload=")
        || lower.contains("<iframe")
}

pub fn validate_title(title: &str, limits: &LimitsConfig) -> Result<(), CoreError> {
    let trimmed = title.trim();
    if trimmed.is_empty() || trimmed.chars().count() > limits.max_title_len {
        return Err(CoreError::BadRequest(format!(
            "Event title must be 1-{} characters",
            limits.max_title_len
        )));
    }
    if contains_dangerous_markup(trimmed) {
        return Err(CoreError::BadRequest(
            "Event title contains unsafe markup".into(),
        ));
    }
    Ok(())
}

pub fn validate_description(description: &str, limits: &LimitsConfig) -> Result<(), CoreError> {
    if description.chars().count() > limits.max_description_len {
        return Err(CoreError::BadRequest("Description too long".into()));
    }
    if contains_dangerous_markup(description) {
        return Err(CoreError::BadRequest(
            "Description contains unsafe markup".into(),
        ));
    }
    Ok(())
}

pub fn validate_location(location: &Location, limits: &LimitsConfig) -> Result<(), CoreError> {
    if let Some(venue) = &location.venue {
        if venue.chars().count() > limits.max_location_len {
            return Err(CoreError::BadRequest("Location too long".into()));
        }
        if contains_dangerous_markup(venue) {
            return Err(CoreError::BadRequest(
                "Location contains unsafe markup".into(),
            ));
        }
    }
    if let Some(url) = &location.online_url {
        let lower = url.to_ascii_lowercase();
        if url.len() > limits.max_location_len
            || !(lower.starts_with("https://") || lower.starts_with("http://"))
        {
            return Err(CoreError::BadRequest("Invalid online location URL".into()));
        }
    }
    Ok(())
}

pub fn validate_note(note: &str, limits: &LimitsConfig) -> Result<(), CoreError> {
    if note.chars().count() > limits.max_note_len {
        return Err(CoreError::BadRequest("Note too long".into()));
    }
    if contains_dangerous_markup(note) {
        return Err(CoreError::BadRequest("Note contains unsafe markup".into()));
    }
    Ok(())
}

pub fn parse_timezone(name: &str) -> Result<chrono_tz::Tz, CoreError> {
    name.parse::<chrono_tz::Tz>()
        .map_err(|_| CoreError::BadRequest(format!("Unknown time zone: {name}")))
}

/// `end >= start`, and when `now` is given, `start` strictly in the future.
pub fn validate_window(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    now: Option<DateTime<Utc>>,
) -> Result<(), CoreError> {
    if ends_at < starts_at {
        return Err(CoreError::InvalidTimeWindow(
            "end must not be before start".into(),
        ));
    }
    if let Some(now) = now {
        if starts_at <= now {
            return Err(CoreError::InvalidTimeWindow(
                "start must be in the future".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn title_bounds_and_markup() {
        let limits = LimitsConfig::default();
        assert!(validate_title("Book club", &limits).is_ok());
        assert!(validate_title("   ", &limits).is_err());
        assert!(validate_title(&"x".repeat(101), &limits).is_err());
        assert!(validate_title("<SCRIPT>alert(1)</script>", &limits).is_err());
    }

    #[test]
    fn online_location_must_be_http() {
        let limits = LimitsConfig::default();
        assert!(validate_location(&Location::online("https://meet.example/abc"), &limits).is_ok());
        assert!(validate_location(&Location::online("javascript:alert(1)"), &limits).is_err());
        assert!(validate_location(&Location::venue("x".repeat(201)), &limits).is_err());
    }

    #[test]
    fn window_rules() {
        let now = Utc::now();
        let start = now + Duration::hours(1);
        assert!(validate_window(start, start, Some(now)).is_ok());
        assert!(matches!(
            validate_window(start, start - Duration::seconds(1), Some(now)),
            Err(CoreError::InvalidTimeWindow(_))
        ));
        assert!(matches!(
            validate_window(now, now + Duration::hours(1), Some(now)),
            Err(CoreError::InvalidTimeWindow(_))
        ));
        assert!(validate_window(now - Duration::days(1), now, None).is_ok());
    }

    #[test]
    fn timezone_names() {
        assert!(parse_timezone("Europe/Berlin").is_ok());
        assert!(parse_timezone("UTC").is_ok());
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}
