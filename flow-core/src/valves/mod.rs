//! Valve and pump status as reported by the flow board.
//!
//! Every console reply ends with a seven character report: six valve
//! channels (`A`, `B`, or `X` when unknown) followed by the pump (`0`, `1`,
//! or `X`).

use core::fmt;

/// Number of valve channels carried in a status report.
pub const VALVE_CHANNELS: usize = 6;
/// Length of a rendered status report.
pub const STATUS_REPORT_LEN: usize = VALVE_CHANNELS + 1;
/// Prefix the sensor side prepends when logging a report.
pub const VALVES_PREFIX: &str = "valves=";

/// Position of a two-way valve.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValveDirection {
    SideA,
    SideB,
    #[default]
    Unknown,
}

impl ValveDirection {
    #[must_use]
    pub const fn as_char(self) -> u8 {
        match self {
            ValveDirection::SideA => b'A',
            ValveDirection::SideB => b'B',
            ValveDirection::Unknown => b'X',
        }
    }

    #[must_use]
    pub const fn from_char(byte: u8) -> Self {
        match byte {
            b'A' => ValveDirection::SideA,
            b'B' => ValveDirection::SideB,
            _ => ValveDirection::Unknown,
        }
    }
}

/// Pump relay state.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PumpStatus {
    Off,
    On,
    #[default]
    Unknown,
}

impl PumpStatus {
    #[must_use]
    pub const fn as_char(self) -> u8 {
        match self {
            PumpStatus::Off => b'0',
            PumpStatus::On => b'1',
            PumpStatus::Unknown => b'X',
        }
    }

    #[must_use]
    pub const fn from_char(byte: u8) -> Self {
        match byte {
            b'0' => PumpStatus::Off,
            b'1' => PumpStatus::On,
            _ => PumpStatus::Unknown,
        }
    }
}

impl From<bool> for PumpStatus {
    fn from(running: bool) -> Self {
        if running {
            PumpStatus::On
        } else {
            PumpStatus::Off
        }
    }
}

/// Errors raised while parsing a status report.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValveReportError {
    /// Fewer than seven report characters were available.
    Truncated { received: usize },
}

impl fmt::Display for ValveReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValveReportError::Truncated { received } => write!(
                f,
                "status report truncated ({received} of {STATUS_REPORT_LEN} characters)"
            ),
        }
    }
}

/// Snapshot of the six valve channels plus the pump.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ValveStatus {
    pub channels: [ValveDirection; VALVE_CHANNELS],
    pub pump: PumpStatus,
}

impl ValveStatus {
    /// Report with every channel and the pump unknown.
    pub const UNKNOWN: ValveStatus = ValveStatus {
        channels: [ValveDirection::Unknown; VALVE_CHANNELS],
        pump: PumpStatus::Unknown,
    };

    #[must_use]
    pub const fn new(channels: [ValveDirection; VALVE_CHANNELS], pump: PumpStatus) -> Self {
        Self { channels, pump }
    }

    /// Renders the fixed seven character report. No framing is added.
    #[must_use]
    pub fn render(&self) -> [u8; STATUS_REPORT_LEN] {
        let mut report = [b'X'; STATUS_REPORT_LEN];
        for (slot, direction) in report.iter_mut().zip(self.channels.iter()) {
            *slot = direction.as_char();
        }
        report[VALVE_CHANNELS] = self.pump.as_char();
        report
    }

    /// Parses a report, accepting an optional `valves=` prefix.
    ///
    /// Characters outside the report alphabet decode as unknown.
    ///
    /// # Errors
    ///
    /// Returns [`ValveReportError::Truncated`] for short input.
    pub fn parse(text: &[u8]) -> Result<Self, ValveReportError> {
        let body = text
            .strip_prefix(VALVES_PREFIX.as_bytes())
            .unwrap_or(text);
        if body.len() < STATUS_REPORT_LEN {
            return Err(ValveReportError::Truncated {
                received: body.len(),
            });
        }

        let mut channels = [ValveDirection::Unknown; VALVE_CHANNELS];
        for (channel, byte) in channels.iter_mut().zip(body.iter()) {
            *channel = ValveDirection::from_char(*byte);
        }

        Ok(Self {
            channels,
            pump: PumpStatus::from_char(body[VALVE_CHANNELS]),
        })
    }
}

impl fmt::Display for ValveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.render() {
            fmt::Write::write_char(f, char::from(byte))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;
    use heapless::String;

    use ValveDirection::{SideA, SideB, Unknown};

    #[test]
    fn renders_channels_then_pump() {
        let status = ValveStatus::new([SideA, SideB, Unknown, Unknown, SideA, SideB], PumpStatus::On);
        assert_eq!(&status.render(), b"ABXXAB1");
    }

    #[test]
    fn unknown_status_renders_all_x() {
        assert_eq!(&ValveStatus::UNKNOWN.render(), b"XXXXXXX");
        assert_eq!(ValveStatus::default(), ValveStatus::UNKNOWN);
    }

    #[test]
    fn display_matches_render() {
        let status = ValveStatus::new([SideB; VALVE_CHANNELS], PumpStatus::Off);
        let mut text: String<16> = String::new();
        write!(text, "{status}").expect("fits");
        assert_eq!(text.as_str(), "BBBBBB0");
    }

    #[test]
    fn parses_prefixed_and_bare_reports() {
        let bare = ValveStatus::parse(b"AABBXA0").expect("bare report");
        assert_eq!(bare.channels, [SideA, SideA, SideB, SideB, Unknown, SideA]);
        assert_eq!(bare.pump, PumpStatus::Off);

        let prefixed = ValveStatus::parse(b"valves=AABBXA0\r\n").expect("prefixed report");
        assert_eq!(prefixed, bare);
    }

    #[test]
    fn parse_maps_noise_to_unknown() {
        let status = ValveStatus::parse(b"A?B#AB7").expect("report");
        assert_eq!(status.channels[1], Unknown);
        assert_eq!(status.channels[3], Unknown);
        assert_eq!(status.pump, PumpStatus::Unknown);
    }

    #[test]
    fn parse_rejects_short_reports() {
        assert_eq!(
            ValveStatus::parse(b"valves=AB"),
            Err(ValveReportError::Truncated { received: 2 })
        );
    }
}
