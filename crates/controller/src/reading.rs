use std::fmt;

use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Humidity,
    Temperature,
    Luminosity,
    SoilMoisture,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Humidity => write!(f, "humidity"),
            Self::Temperature => write!(f, "temperature"),
            Self::Luminosity => write!(f, "luminosity"),
            Self::SoilMoisture => write!(f, "soil"),
        }
    }
}

/// Physical units for humidity/temperature, raw ADC units otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Float(f64),
    Raw(u32),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v:.2}"),
            Self::Raw(v) => write!(f, "{v}"),
        }
    }
}

/// One sample taken during a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub timestamp: OffsetDateTime,
    pub kind: MetricKind,
    pub value: Value,
}

impl Reading {
    pub fn humidity(timestamp: OffsetDateTime, percent: f64) -> Self {
        Self {
            timestamp,
            kind: MetricKind::Humidity,
            value: Value::Float(percent),
        }
    }

    pub fn temperature(timestamp: OffsetDateTime, fahrenheit: f64) -> Self {
        Self {
            timestamp,
            kind: MetricKind::Temperature,
            value: Value::Float(fahrenheit),
        }
    }

    pub fn luminosity(timestamp: OffsetDateTime, raw: u32) -> Self {
        Self {
            timestamp,
            kind: MetricKind::Luminosity,
            value: Value::Raw(raw),
        }
    }

    pub fn soil(timestamp: OffsetDateTime, raw: u32) -> Self {
        Self {
            timestamp,
            kind: MetricKind::SoilMoisture,
            value: Value::Raw(raw),
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn display_formats_floats_to_two_places() {
        let now = datetime!(2024-03-01 12:00 UTC);
        assert_eq!(Reading::humidity(now, 45.123).to_string(), "humidity=45.12");
        assert_eq!(Reading::temperature(now, 71.6).to_string(), "temperature=71.60");
    }

    #[test]
    fn display_keeps_raw_units_integral() {
        let now = datetime!(2024-03-01 12:00 UTC);
        assert_eq!(Reading::luminosity(now, 1234).to_string(), "luminosity=1234");
        assert_eq!(Reading::soil(now, 512).to_string(), "soil=512");
    }
}
