use std::collections::BTreeSet;
use std::time::Duration;

pub fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Timestamped export name, e.g. `screenshot_20240131_154502`.
pub fn default_filename_prefix() -> String {
    format!("screenshot_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// Parses a 1-based selection such as `1,3-5` into 0-based segment indices.
///
/// Entries beyond `segment_count` are dropped, mirroring the store's silent
/// handling of out-of-range indices.
pub fn parse_selection(input: &str, segment_count: usize) -> Result<BTreeSet<usize>, String> {
    let mut selection = BTreeSet::new();

    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (start, end) = match part.split_once('-') {
            Some((start, end)) => (parse_position(start)?, parse_position(end)?),
            None => {
                let position = parse_position(part)?;
                (position, position)
            }
        };

        if start > end {
            return Err(format!("Invalid range '{part}': start is after end"));
        }

        selection.extend((start..=end).map(|p| p - 1).take_while(|&i| i < segment_count));
    }

    Ok(selection)
}

fn parse_position(text: &str) -> Result<usize, String> {
    match text.trim().parse::<usize>() {
        Ok(0) => Err("Segment numbers start at 1".to_string()),
        Ok(position) => Ok(position),
        Err(_) => Err(format!("Invalid segment number '{}'", text.trim())),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
