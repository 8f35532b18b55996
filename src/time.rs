use crate::error::{CoreError, CoreResult};

fn parse_hh_mm(time: &str) -> Option<(u32, u32)> {
    let (h, m) = time.split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    if !h.bytes().all(|b| b.is_ascii_digit()) || !m.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour = h.parse::<u32>().ok()?;
    let minute = m.parse::<u32>().ok()?;
    Some((hour, minute))
}

/// Minutes since midnight for a 24-hour `HH:MM` string.
pub fn time_to_minutes(time: &str) -> CoreResult<i32> {
    time_to_minutes_field(time, "time")
}

pub fn time_to_minutes_field(time: &str, field: &str) -> CoreResult<i32> {
    match parse_hh_mm(time) {
        Some((hour, minute)) if hour <= 23 && minute <= 59 => Ok((hour * 60 + minute) as i32),
        _ => Err(CoreError::invalid_time(field, time)),
    }
}

/// `end - start` in minutes. Not floored: an end before the start yields a
/// negative duration.
pub fn calculate_duration(start_time: &str, end_time: &str) -> CoreResult<i32> {
    let start = time_to_minutes_field(start_time, "startTime")?;
    let end = time_to_minutes_field(end_time, "endTime")?;
    Ok(end - start)
}

/// `"13:05"` -> `"1:05 PM"`. Anything that is not a valid 24-hour time is
/// passed through untouched.
pub fn convert_to_12_hour(time24: &str) -> String {
    let Some((hour, minute)) = parse_hh_mm(time24) else {
        return time24.to_string();
    };
    if hour > 23 || minute > 59 {
        return time24.to_string();
    }
    let (display_hour, suffix) = match hour {
        0 => (12, "AM"),
        1..=11 => (hour, "AM"),
        12 => (12, "PM"),
        _ => (hour - 12, "PM"),
    };
    format!("{}:{:02} {}", display_hour, minute, suffix)
}

/// Inverse of [`convert_to_12_hour`]. Accepts `H:MM AM`, `HH:MM pm`,
/// `H:MMPM`; anything else is passed through untouched.
pub fn convert_to_24_hour(time12: &str) -> String {
    let Some((hour, minute, pm)) = parse_12_hour(time12) else {
        return time12.to_string();
    };
    let hour = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    };
    format!("{:02}:{:02}", hour, minute)
}

fn parse_12_hour(time12: &str) -> Option<(u32, u32, bool)> {
    let (h, rest) = time12.split_once(':')?;
    if h.is_empty() || h.len() > 2 || !h.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if rest.len() < 4 || !rest.is_char_boundary(2) {
        return None;
    }
    let (m, suffix) = rest.split_at(2);
    if !m.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let pm = match suffix.trim_start().to_ascii_uppercase().as_str() {
        "AM" => false,
        "PM" => true,
        _ => return None,
    };
    let hour = h.parse::<u32>().ok()?;
    let minute = m.parse::<u32>().ok()?;
    // Hour 0 only reads as midnight with AM.
    let hour_ok = (1..=12).contains(&hour) || (hour == 0 && !pm);
    if !hour_ok || minute > 59 {
        return None;
    }
    Some((hour, minute, pm))
}

/// Canonical zero-padded 24-hour form of a time typed either way.
pub fn normalize_time(input: &str, field: &str) -> CoreResult<String> {
    let t = input.trim();
    let candidate = if parse_12_hour(t).is_some() {
        convert_to_24_hour(t)
    } else {
        t.to_string()
    };
    let minutes = time_to_minutes_field(&candidate, field)?;
    Ok(format!("{:02}:{:02}", minutes / 60, minutes % 60))
}
