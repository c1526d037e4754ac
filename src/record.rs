//! Line-oriented record codec
//!
//! Every record is stored as a single line of text:
//!
//! ```text
//! 2024-08-03T11:47:50.376903776Z;aprsis-raw;REM2Uk4tOT5BUEJNMUQs...
//! ```
//!
//! The first field is the UTC timestamp in RFC 3339 form with up to
//! nanosecond precision, the second is the description tag, and the third
//! is the payload in standard base64. The codec never emits the line
//! terminator; the canner appends it when writing.

use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Datelike, SecondsFormat, TimeZone, Utc};

use crate::error::{CanError, Result};

/// Separator between the three fields of an encoded record
pub const RECORD_SEPARATOR: char = ';';

/// Terminator appended after every encoded record in a bucket file
pub const LINE_SEPARATOR: u8 = b'\n';

/// Years RFC 3339 can express with its four-digit year field
const ENCODABLE_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

/// A timestamped, tagged binary payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    /// When the payload was captured, always in UTC
    pub timestamp: DateTime<Utc>,
    /// Short tag describing the payload
    pub description: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl Record {
    /// Create a record, normalizing the timestamp to UTC.
    ///
    /// No validation happens here; an empty description or payload is only
    /// rejected when the record is encoded.
    pub fn new<Tz: TimeZone>(
        timestamp: DateTime<Tz>,
        description: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            timestamp: timestamp.with_timezone(&Utc),
            description: description.into(),
            payload: payload.into(),
        }
    }

    /// Encode the record into its one-line form, without a line terminator
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Append the encoded record to `buf`.
    ///
    /// On error `buf` is left untouched.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.validate()?;

        buf.extend_from_slice(
            self.timestamp
                .to_rfc3339_opts(SecondsFormat::AutoSi, true)
                .as_bytes(),
        );
        buf.push(RECORD_SEPARATOR as u8);
        buf.extend_from_slice(self.description.as_bytes());
        buf.push(RECORD_SEPARATOR as u8);

        let mut encoded = String::with_capacity(base64_len(self.payload.len()));
        STANDARD.encode_string(&self.payload, &mut encoded);
        buf.extend_from_slice(encoded.as_bytes());

        Ok(())
    }

    /// Decode a record from one stored line.
    ///
    /// A single trailing `\n` or `\r\n` is ignored so raw file lines can be
    /// passed in directly.
    pub fn decode(line: &str) -> Result<Self> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        let mut fields = line.split(RECORD_SEPARATOR);
        let (Some(timestamp), Some(description), Some(payload), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(CanError::format(format!("invalid record '{}'", line)));
        };

        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| CanError::format(format!("invalid timestamp '{}': {}", timestamp, e)))?
            .with_timezone(&Utc);

        if description.is_empty() {
            return Err(CanError::format(format!("empty description in '{}'", line)));
        }

        if payload.is_empty() {
            return Err(CanError::format(format!("empty payload in '{}'", line)));
        }
        let payload = STANDARD
            .decode(payload)
            .map_err(|e| CanError::format(format!("invalid payload '{}': {}", payload, e)))?;

        Ok(Self {
            timestamp,
            description: description.to_string(),
            payload,
        })
    }

    /// Check the record can be encoded and decoded back unchanged
    pub fn validate(&self) -> Result<()> {
        if !ENCODABLE_YEARS.contains(&self.timestamp.year()) {
            return Err(CanError::encoding(format!(
                "timestamp year {} is outside 0000-9999",
                self.timestamp.year()
            )));
        }
        if self.description.is_empty() {
            return Err(CanError::encoding("empty description"));
        }
        if let Some(c) = self
            .description
            .chars()
            .find(|c| *c == RECORD_SEPARATOR || *c == '\n' || *c == '\r')
        {
            return Err(CanError::encoding(format!(
                "description '{}' contains reserved character {:?}",
                self.description.escape_debug(),
                c
            )));
        }
        if self.payload.is_empty() {
            return Err(CanError::encoding("empty payload"));
        }
        Ok(())
    }

    /// Length of the encoded line, excluding the terminator
    pub fn encoded_len(&self) -> usize {
        // A four-digit year with nanoseconds and a Z suffix is at most 30 bytes
        30 + 1 + self.description.len() + 1 + base64_len(self.payload.len())
    }
}

impl FromStr for Record {
    type Err = CanError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} bytes)",
            self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.description,
            self.payload.len()
        )
    }
}

/// Decode every record stored in a bucket file, one per line.
///
/// Blank lines are skipped. Each item carries its own result so a single bad
/// line does not hide the rest of the file.
pub fn read_records<R: BufRead>(reader: R) -> impl Iterator<Item = Result<Record>> {
    reader
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.is_empty()))
        .map(|line| line.map_err(CanError::from).and_then(|l| Record::decode(&l)))
}

fn base64_len(n: usize) -> usize {
    n.div_ceil(3) * 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use proptest::prelude::*;

    fn zero_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap()
    }

    fn parse(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_decode_rejects_malformed_lines() {
        let invalid = [
            ("empty fields", ";;"),
            ("invalid timestamp", "10000-01-01T00:00:00Z;;"),
            ("empty description", "0001-01-01T00:00:00Z;;"),
            ("empty payload", "0001-01-01T00:00:00Z;foo;"),
            ("invalid payload", "0001-01-01T00:00:00Z;foo;bar"),
            ("too few fields", "0001-01-01T00:00:00Z;foo"),
            ("too many fields", "0001-01-01T00:00:00Z;foo;cGF5bG9hZA==;extra"),
            ("missing offset", "2024-08-03T11:47:50.376903776;foo;cGF5bG9hZA=="),
            ("empty line", ""),
        ];

        for (name, line) in invalid {
            let result = Record::decode(line);
            assert!(
                matches!(result, Err(CanError::Format(_))),
                "{}: expected format error, got {:?}",
                name,
                result
            );
        }
    }

    #[test]
    fn test_decode_minimal_record() -> Result<()> {
        let record = Record::decode("0001-01-01T00:00:00Z;plain;cGF5bG9hZA==")?;
        assert_eq!(record, Record::new(zero_time(), "plain", "payload"));
        Ok(())
    }

    #[test]
    fn test_decode_aprs_packets() -> Result<()> {
        let record: Record = "2024-08-03T11:47:50.376903776Z;aprsis-raw;REM2Uk4tOT5BUEJNMUQsREIwQ0osRE1SKixxQVIsREIwQ0o6QDEwNDEwOWg0OTI1LjExTi8wMTE1Mi44NUV2MDE2LzAwME5vcmJlcnQ="
            .parse()?;
        assert_eq!(record.timestamp, parse("2024-08-03T11:47:50.376903776Z"));
        assert_eq!(record.description, "aprsis-raw");
        assert_eq!(
            record.payload,
            b"DC6RN-9>APBM1D,DB0CJ,DMR*,qAR,DB0CJ:@104109h4925.11N/01152.85Ev016/000Norbert"
        );

        // A +00:00 offset decodes to the same instant as Zulu time
        let record: Record = "2024-08-03T11:47:59.657010503+00:00;aprsis-raw;T0U3TUZJLTI+QVBCTTFELE9FN1hVVCxETVIqLHFBUixPRTdYVVQ6PTQ3MjkuMzROLzAxMjM5Ljk2RVswMDAvMDAwL0E9MDA0MDA1Rmxvcmlhbg=="
            .parse()?;
        assert_eq!(record.timestamp, parse("2024-08-03T11:47:59.657010503Z"));
        assert_eq!(
            record.payload,
            b"OE7MFI-2>APBM1D,OE7XUT,DMR*,qAR,OE7XUT:=4729.34N/01239.96E[000/000/A=004005Florian"
        );

        Ok(())
    }

    #[test]
    fn test_decode_normalizes_offsets_to_utc() -> Result<()> {
        let record = Record::decode("2024-08-03T13:00:00.5+02:00;plain;cGF5bG9hZA==")?;
        assert_eq!(record.timestamp, parse("2024-08-03T11:00:00.5Z"));
        assert_eq!(record.timestamp.timezone(), Utc);
        Ok(())
    }

    #[test]
    fn test_decode_tolerates_line_terminator() -> Result<()> {
        let expected = Record::new(zero_time(), "plain", "payload");
        assert_eq!(Record::decode("0001-01-01T00:00:00Z;plain;cGF5bG9hZA==\n")?, expected);
        assert_eq!(Record::decode("0001-01-01T00:00:00Z;plain;cGF5bG9hZA==\r\n")?, expected);
        Ok(())
    }

    #[test]
    fn test_encode_rejects_unencodable_records() {
        let invalid = [
            ("empty fields", Record::new(zero_time(), "", Vec::new())),
            ("empty description", Record::new(zero_time(), "", "foo")),
            ("empty payload", Record::new(zero_time(), "foo", Vec::new())),
            ("separator in description", Record::new(zero_time(), "a;b", "foo")),
            ("newline in description", Record::new(zero_time(), "a\nb", "foo")),
        ];

        for (name, record) in invalid {
            let result = record.encode();
            assert!(
                matches!(result, Err(CanError::Encoding(_))),
                "{}: expected encoding error, got {:?}",
                name,
                result
            );
        }
    }

    #[test]
    fn test_encode_rejects_years_without_four_digits() {
        let far_future = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        let result = Record::new(far_future, "plain", "x").encode();
        assert!(matches!(result, Err(CanError::Encoding(_))), "{:?}", result);

        let before_year_zero = Utc.with_ymd_and_hms(-1, 12, 31, 23, 0, 0).unwrap();
        let result = Record::new(before_year_zero, "plain", "x").encode();
        assert!(matches!(result, Err(CanError::Encoding(_))), "{:?}", result);

        let last_second = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        let record = Record::new(last_second, "plain", "x");
        let line = String::from_utf8(record.encode().unwrap()).unwrap();
        assert_eq!(line, "9999-12-31T23:59:59Z;plain;eA==");
        assert_eq!(Record::decode(&line).unwrap(), record);
    }

    #[test]
    fn test_encode_minimal_record() -> Result<()> {
        let record = Record::new(zero_time(), "plain", "payload");
        assert_eq!(record.encode()?, b"0001-01-01T00:00:00Z;plain;cGF5bG9hZA==");
        Ok(())
    }

    #[test]
    fn test_encode_keeps_nanoseconds_and_converts_to_utc() -> Result<()> {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let timestamp = offset
            .with_ymd_and_hms(2024, 8, 3, 13, 47, 50)
            .unwrap()
            + chrono::Duration::nanoseconds(376_903_776);
        let record = Record::new(timestamp, "aprsis-raw", "x");

        let encoded = String::from_utf8(record.encode()?).unwrap();
        assert_eq!(encoded, "2024-08-03T11:47:50.376903776Z;aprsis-raw;eA==");
        Ok(())
    }

    #[test]
    fn test_encode_into_leaves_buffer_untouched_on_error() {
        let mut buf = b"prefix".to_vec();
        let record = Record::new(zero_time(), "", "payload");
        assert!(record.encode_into(&mut buf).is_err());
        assert_eq!(buf, b"prefix");
    }

    #[test]
    fn test_display_is_not_the_stored_form() -> Result<()> {
        let record = Record::new(parse("2024-08-03T11:13:50.376903776Z"), "aprsis-raw", vec![1u8; 64]);

        assert_eq!(
            record.to_string(),
            "2024-08-03T11:13:50.376903776Z aprsis-raw (64 bytes)"
        );
        assert!(Record::decode(&record.to_string()).is_err());

        let line = String::from_utf8(record.encode()?).unwrap();
        assert_eq!(Record::decode(&line)?, record);
        Ok(())
    }

    #[test]
    fn test_encoded_len_is_an_upper_bound() -> Result<()> {
        let record = Record::new(
            parse("2038-01-19T03:14:07.123456789Z"),
            "plain",
            vec![0xffu8; 100],
        );
        assert!(record.encode()?.len() <= record.encoded_len());
        Ok(())
    }

    #[test]
    fn test_read_records() -> Result<()> {
        let content = "2038-01-19T03:14:07Z;plain;Rm9vIQ==\n\n2038-01-19T03:14:08Z;plain;QmFy\nnot a record\n";
        let results: Vec<_> = read_records(content.as_bytes()).collect();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().payload, b"Foo!");
        assert_eq!(results[1].as_ref().unwrap().payload, b"Bar");
        assert!(matches!(results[2], Err(CanError::Format(_))));
        Ok(())
    }

    fn arb_record() -> impl Strategy<Value = Record> {
        (
            // 0001-01-01 through 9999-12-31
            -62_135_596_800i64..253_402_300_799i64,
            0u32..1_000_000_000u32,
            "[a-zA-Z0-9_.-]{1,24}",
            proptest::collection::vec(any::<u8>(), 1..256),
        )
            .prop_map(|(secs, nanos, description, payload)| {
                let timestamp = DateTime::from_timestamp(secs, nanos).unwrap();
                Record::new(timestamp, description, payload)
            })
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(record in arb_record()) {
            let encoded = record.encode().unwrap();
            let line = String::from_utf8(encoded).unwrap();
            prop_assert_eq!(Record::decode(&line).unwrap(), record);
        }

        #[test]
        fn prop_encoded_line_is_single_line(record in arb_record()) {
            let encoded = record.encode().unwrap();
            prop_assert!(!encoded.contains(&LINE_SEPARATOR));
            prop_assert_eq!(encoded.iter().filter(|b| **b == RECORD_SEPARATOR as u8).count(), 2);
        }
    }
}
