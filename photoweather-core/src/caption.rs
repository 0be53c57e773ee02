use chrono::NaiveDateTime;

use crate::model::{PlaceName, WeatherReading};

/// Number of lines burned onto every photo.
pub const CAPTION_LINES: usize = 3;

const LINE_SEPARATOR: &str = "/";

/// Place, condition and "temperature - time", in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    lines: [String; CAPTION_LINES],
}

impl Caption {
    pub fn from_lines(lines: [String; CAPTION_LINES]) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[String; CAPTION_LINES] {
        &self.lines
    }

    /// The single-string form, lines joined by `/`.
    pub fn to_delimited(&self) -> String {
        self.lines.join(LINE_SEPARATOR)
    }
}

impl std::fmt::Display for Caption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_delimited())
    }
}

pub fn compose(place: &PlaceName, reading: &WeatherReading, now: NaiveDateTime) -> Caption {
    let time = now.format("%I:%M %p");
    Caption {
        lines: [
            place.as_str().to_string(),
            reading.condition.clone(),
            format!("{}°c - {time}", format_temperature(reading.temperature_c)),
        ],
    }
}

/// Always shows at least one decimal: `25.0`, `-3.5`, `18.25`.
fn format_temperature(celsius: f32) -> String {
    if celsius.is_finite() && celsius.fract() == 0.0 {
        format!("{celsius:.1}")
    } else {
        celsius.to_string()
    }
}

/// Upper-cases the first character and leaves the rest as-is.
pub fn capitalize(line: &str) -> String {
    let mut chars = line.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
