//! Text codecs for node identifiers, report datagrams and the round file.
//!
//! Report datagram: `;` + 12 hex digits (sender) + `:` + 1..=4 decimal digits.
//! Round file: round as 5 zero-padded digits followed by ch_enable as 3.

use crate::types::{NodeIdentity, Report, RoundState, SensorReading, NODE_ID_LEN};
use thiserror::Error;

/// Longest report datagram in bytes
pub const MAX_MESSAGE_LEN: usize = 18;

/// Byte offset of the `:` separator in a report
const SEPARATOR_POS: usize = 1 + NODE_ID_LEN;

/// Largest reading that fits the report length cap
pub const MAX_READING: SensorReading = 9999;

/// Field widths of the round file: digit counts of `u16::MAX` and `u8::MAX`
pub const ROUND_FIELD_WIDTH: usize = 5;
pub const CH_ENABLE_FIELD_WIDTH: usize = 3;
pub const ROUND_FILE_LEN: usize = ROUND_FIELD_WIDTH + CH_ENABLE_FIELD_WIDTH;

/// Framing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("identifier must be 12 hex digits, got {0:?}")]
    BadIdentifier(String),

    #[error("report is {0} bytes, outside 15..=18")]
    BadLength(usize),

    #[error("report does not start with ';'")]
    MissingPrefix,

    #[error("report has no ':' after the sender")]
    MissingSeparator,

    #[error("report reading is not decimal")]
    BadReading,

    #[error("reading {0} exceeds 9999")]
    ReadingOutOfRange(SensorReading),

    #[error("round file is {0} bytes, expected 8")]
    BadRoundFileLength(usize),

    #[error("round file field {0:?} is not a decimal number")]
    BadRoundField(String),

    #[error("ch_enable value {0} is neither 0 nor 1")]
    BadChEnable(u8),
}

/// True iff `s` is exactly 12 ASCII hex digits
pub fn is_hex_identifier(s: &str) -> bool {
    s.len() == NODE_ID_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Parse a 12-hex-digit identifier (either case)
pub fn parse_identifier(s: &str) -> Result<NodeIdentity, CodecError> {
    if !is_hex_identifier(s) {
        return Err(CodecError::BadIdentifier(s.to_string()));
    }
    let mut bytes = [0u8; 6];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
            .map_err(|_| CodecError::BadIdentifier(s.to_string()))?;
    }
    Ok(NodeIdentity::new(bytes))
}

/// Check a datagram against the report framing
pub fn check_message_valid(msg: &[u8]) -> bool {
    validate_message(msg).is_ok()
}

fn validate_message(msg: &[u8]) -> Result<(), CodecError> {
    if msg.len() <= SEPARATOR_POS + 1 || msg.len() > MAX_MESSAGE_LEN {
        return Err(CodecError::BadLength(msg.len()));
    }
    if msg[0] != b';' {
        return Err(CodecError::MissingPrefix);
    }
    if !msg[1..SEPARATOR_POS].iter().all(u8::is_ascii_hexdigit) {
        return Err(CodecError::BadIdentifier(
            String::from_utf8_lossy(&msg[1..SEPARATOR_POS]).into_owned(),
        ));
    }
    if msg[SEPARATOR_POS] != b':' {
        return Err(CodecError::MissingSeparator);
    }
    if !msg[SEPARATOR_POS + 1..].iter().all(u8::is_ascii_digit) {
        return Err(CodecError::BadReading);
    }
    Ok(())
}

/// Encode a station report as `;<id>:<reading>`
pub fn encode_report(report: &Report) -> Result<String, CodecError> {
    if report.reading > MAX_READING {
        return Err(CodecError::ReadingOutOfRange(report.reading));
    }
    Ok(format!(";{}:{}", report.sender, report.reading))
}

/// Decode and validate one report datagram
pub fn decode_report(msg: &[u8]) -> Result<Report, CodecError> {
    validate_message(msg)?;
    // Validation guarantees ASCII from here on.
    let text = std::str::from_utf8(msg).map_err(|_| CodecError::BadReading)?;
    let sender = parse_identifier(&text[1..SEPARATOR_POS])?;
    let reading = text[SEPARATOR_POS + 1..]
        .parse::<SensorReading>()
        .map_err(|_| CodecError::BadReading)?;
    Ok(Report { sender, reading })
}

/// Encode round state as the fixed-width round file
pub fn encode_round_state(state: &RoundState) -> Vec<u8> {
    format!(
        "{:0rw$}{:0cw$}",
        state.round,
        u8::from(state.ch_enable),
        rw = ROUND_FIELD_WIDTH,
        cw = CH_ENABLE_FIELD_WIDTH
    )
    .into_bytes()
}

/// Decode the fixed-width round file
pub fn decode_round_state(bytes: &[u8]) -> Result<RoundState, CodecError> {
    if bytes.len() != ROUND_FILE_LEN {
        return Err(CodecError::BadRoundFileLength(bytes.len()));
    }
    let (round_field, ch_field) = bytes.split_at(ROUND_FIELD_WIDTH);
    let round: u16 = parse_field(round_field)?;
    let ch_enable = match parse_field::<u8>(ch_field)? {
        0 => false,
        1 => true,
        other => return Err(CodecError::BadChEnable(other)),
    };
    Ok(RoundState { round, ch_enable })
}

fn parse_field<T: std::str::FromStr>(field: &[u8]) -> Result<T, CodecError> {
    let bad = || CodecError::BadRoundField(String::from_utf8_lossy(field).into_owned());
    if !field.iter().all(u8::is_ascii_digit) {
        return Err(bad());
    }
    std::str::from_utf8(field)
        .map_err(|_| bad())?
        .parse()
        .map_err(|_| bad())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> NodeIdentity {
        NodeIdentity::new([0x1a, 0x2b, 0x3c, 0x4d, 0x5e, 0x6f])
    }

    #[test]
    fn test_check_message_valid() {
        assert!(check_message_valid(b";1A2B3C4D5E6F:123"));
        assert!(check_message_valid(b";1a2b3c4d5e6f:0"));
        assert!(check_message_valid(b";1A2B3C4D5E6F:1023"));
    }

    #[test]
    fn test_check_message_rejects_bad_framing() {
        // missing leading ';'
        assert!(!check_message_valid(b"1A2B3C4D5E6F:123"));
        assert!(!check_message_valid(b";1A2B3C4D5E6G:123"));
        assert!(!check_message_valid(b";1A2B3C4D5E6F-123"));
        assert!(!check_message_valid(b";1A2B3C4D5E6F:"));
        assert!(!check_message_valid(b";1A2B3C4D5E6F:12a"));
        assert!(!check_message_valid(b";1A2B3C4D5E6F:12345"));
        assert!(!check_message_valid(b""));
    }

    #[test]
    fn test_report_roundtrip() {
        let report = Report {
            sender: id(),
            reading: 512,
        };
        let text = encode_report(&report).unwrap();
        assert_eq!(text, ";1A2B3C4D5E6F:512");
        assert_eq!(decode_report(text.as_bytes()).unwrap(), report);
    }

    #[test]
    fn test_encode_rejects_wide_reading() {
        let report = Report {
            sender: id(),
            reading: 10_000,
        };
        assert_eq!(
            encode_report(&report),
            Err(CodecError::ReadingOutOfRange(10_000))
        );
    }

    #[test]
    fn test_decode_reports_specific_error() {
        assert_eq!(
            decode_report(b"x1A2B3C4D5E6F:1"),
            Err(CodecError::MissingPrefix)
        );
        assert_eq!(
            decode_report(b";1A2B3C4D5E6F;1"),
            Err(CodecError::MissingSeparator)
        );
    }

    #[test]
    fn test_parse_identifier() {
        assert_eq!(parse_identifier("1a2b3c4d5e6f").unwrap(), id());
        assert!(parse_identifier("1A2B3C4D5E").is_err());
        assert!(parse_identifier("1A2B3C4D5E6Z").is_err());
    }

    #[test]
    fn test_round_file_layout() {
        assert_eq!(encode_round_state(&RoundState::new(3, false)), b"00003000");
        assert_eq!(encode_round_state(&RoundState::new(65535, true)), b"65535001");
    }

    #[test]
    fn test_round_file_decode() {
        assert_eq!(
            decode_round_state(b"00006001").unwrap(),
            RoundState::new(6, true)
        );
        assert_eq!(
            decode_round_state(b"0000600"),
            Err(CodecError::BadRoundFileLength(7))
        );
        assert_eq!(decode_round_state(b"00006002"), Err(CodecError::BadChEnable(2)));
        assert!(matches!(
            decode_round_state(b"000-6001"),
            Err(CodecError::BadRoundField(_))
        ));
        assert!(matches!(
            decode_round_state(b"99999001"),
            Err(CodecError::BadRoundField(_))
        ));
    }
}
