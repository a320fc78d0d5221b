//! Line-oriented wire protocol spoken by the motor controller.
//!
//! Commands encode to a single ASCII line; the transport appends the `\n`
//! terminator on write. Telemetry decode is best-effort: lines that do not
//! match the position pattern are not errors, they stay opaque log text.

use crate::domain::{Axis, PositionVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `M x y z a` — set all four physical positions.
    AbsoluteMove(PositionVector),
    /// `R dx dy dz da` — add deltas to the physical positions.
    RelativeMove(PositionVector),
    /// `S<n>` — motion speed.
    Speed(u32),
    /// `A<n>` — motion acceleration.
    Accel(u32),
    /// `H` — reset all physical positions to 0.
    Home,
    /// `I` — request the initial handshake/state dump.
    Init,
}

impl Command {
    pub fn encode(&self) -> String {
        match self {
            Command::AbsoluteMove([x, y, z, a]) => format!("M {x} {y} {z} {a}"),
            Command::RelativeMove([x, y, z, a]) => format!("R {x} {y} {z} {a}"),
            Command::Speed(value) => format!("S{value}"),
            Command::Accel(value) => format!("A{value}"),
            Command::Home => "H".to_string(),
            Command::Init => "I".to_string(),
        }
    }

    /// Parses a raw command line back into its structured form. Only the
    /// position-affecting commands matter to callers; anything else is
    /// passed through the link verbatim.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        let mut tokens = line.split_whitespace();
        match tokens.next()? {
            "M" => Some(Command::AbsoluteMove(parse_vector(tokens)?)),
            "R" => Some(Command::RelativeMove(parse_vector(tokens)?)),
            "H" => Some(Command::Home),
            "I" => Some(Command::Init),
            token => {
                let mut chars = token.chars();
                let letter = chars.next()?;
                let value = chars.as_str().parse().ok()?;
                match letter {
                    'S' => Some(Command::Speed(value)),
                    'A' => Some(Command::Accel(value)),
                    _ => None,
                }
            }
        }
    }
}

fn parse_vector<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Option<PositionVector> {
    let mut values = [0i64; 4];
    for slot in &mut values {
        *slot = tokens.next()?.parse().ok()?;
    }
    match tokens.next() {
        Some(_) => None,
        None => Some(values),
    }
}

/// Matches `<AxisLetter>: pos=<signed int>` anywhere in the line, with
/// optional whitespace after the colon. Returns the axis and its reported
/// physical position, or `None` for any other line content.
pub fn decode_telemetry(line: &str) -> Option<(Axis, i64)> {
    for (idx, ch) in line.char_indices() {
        let Some(axis) = Axis::from_letter(ch) else {
            continue;
        };
        let Some(rest) = line[idx + ch.len_utf8()..].strip_prefix(':') else {
            continue;
        };
        let Some(rest) = rest.trim_start().strip_prefix("pos=") else {
            continue;
        };
        if let Some(value) = parse_signed_prefix(rest) {
            return Some((axis, value));
        }
    }
    None
}

fn parse_signed_prefix(text: &str) -> Option<i64> {
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text),
    };
    let end = digits
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    format!("{sign}{}", &digits[..end]).parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_all_command_forms() {
        assert_eq!(Command::AbsoluteMove([1, -2, 3, 4]).encode(), "M 1 -2 3 4");
        assert_eq!(Command::RelativeMove([0, 5, 0, -5]).encode(), "R 0 5 0 -5");
        assert_eq!(Command::Speed(800).encode(), "S800");
        assert_eq!(Command::Accel(400).encode(), "A400");
        assert_eq!(Command::Home.encode(), "H");
        assert_eq!(Command::Init.encode(), "I");
    }

    #[test]
    fn parse_round_trips_encoded_commands() {
        for command in [
            Command::AbsoluteMove([10, 20, -30, 40]),
            Command::RelativeMove([-1, 0, 0, 1]),
            Command::Speed(1200),
            Command::Accel(300),
            Command::Home,
            Command::Init,
        ] {
            assert_eq!(Command::parse(&command.encode()), Some(command));
        }
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("M 1 2 3"), None);
        assert_eq!(Command::parse("M 1 2 3 4 5"), None);
        assert_eq!(Command::parse("M a b c d"), None);
        assert_eq!(Command::parse("Sfast"), None);
        assert_eq!(Command::parse("Q 1 2 3 4"), None);
    }

    #[test]
    fn decodes_position_telemetry() {
        assert_eq!(decode_telemetry("X: pos=42"), Some((Axis::X, 42)));
        assert_eq!(decode_telemetry("A: pos=-7"), Some((Axis::A, -7)));
        assert_eq!(decode_telemetry("Z:pos=0"), Some((Axis::Z, 0)));
        assert_eq!(decode_telemetry("motor Y: pos=12 ok"), Some((Axis::Y, 12)));
    }

    #[test]
    fn ignores_lines_without_a_valid_axis() {
        assert_eq!(decode_telemetry("H: pos=1"), None);
        assert_eq!(decode_telemetry("x: pos=1"), None);
        assert_eq!(decode_telemetry("ready"), None);
        assert_eq!(decode_telemetry("X: pos="), None);
        assert_eq!(decode_telemetry(""), None);
    }

    #[test]
    fn first_match_in_line_wins() {
        assert_eq!(decode_telemetry("X: pos=1 Y: pos=2"), Some((Axis::X, 1)));
    }
}
