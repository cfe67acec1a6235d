use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One parsed telemetry broadcast. Each datagram yields a fresh snapshot;
/// nothing is carried over from the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    fields: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("telemetry datagram is not text: {0}")]
    NotText(String),
}

/// Result of routing one inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Telemetry(Result<TelemetrySnapshot, ParseError>),
    /// Acknowledgement or log line ("ok", "error", wifi reports, ...).
    Reply(String),
}

/// The only discriminator between telemetry and command replies on the
/// shared socket: a telemetry line has both a `:` and a `;`.
pub fn looks_like_telemetry(text: &str) -> bool {
    text.contains(':') && text.contains(';')
}

pub fn classify(datagram: &[u8]) -> Inbound {
    let text = String::from_utf8_lossy(datagram);
    if looks_like_telemetry(&text) {
        Inbound::Telemetry(TelemetrySnapshot::parse_bytes(datagram))
    } else {
        Inbound::Reply(text.trim().to_string())
    }
}

impl TelemetrySnapshot {
    /// Split on `;`, then on the first `:` of each fragment. Fragments with
    /// no `:` or an empty key are dropped; a repeated key keeps its last value.
    pub fn parse(raw: &str) -> Self {
        let mut fields = HashMap::new();
        for fragment in raw.split(';') {
            let Some((key, value)) = fragment.split_once(':') else { continue };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            fields.insert(key.to_string(), value.trim().to_string());
        }
        Self { fields }
    }

    pub fn parse_bytes(raw: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(raw).map_err(|e| ParseError::NotText(e.to_string()))?;
        Ok(Self::parse(text))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    pub fn into_fields(self) -> HashMap<String, String> {
        self.fields
    }

    fn number<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.parse().ok()
    }

    // Typed views over the fields the firmware broadcasts.

    /// Battery, percent.
    pub fn battery_pct(&self) -> Option<u8> {
        self.number("bat")
    }

    /// Motor-on time, seconds.
    pub fn flight_time_s(&self) -> Option<u32> {
        self.number("time")
    }

    pub fn height_cm(&self) -> Option<i32> {
        self.number("h")
    }

    pub fn tof_cm(&self) -> Option<i32> {
        self.number("tof")
    }

    pub fn baro_m(&self) -> Option<f32> {
        self.number("baro")
    }

    /// (lowest, highest) board temperature, Celsius.
    pub fn temperature_c(&self) -> Option<(i32, i32)> {
        Some((self.number("templ")?, self.number("temph")?))
    }

    /// (pitch, roll, yaw) in degrees.
    pub fn attitude_deg(&self) -> Option<(i32, i32, i32)> {
        Some((self.number("pitch")?, self.number("roll")?, self.number("yaw")?))
    }

    /// (x, y, z) velocity in dm/s.
    pub fn velocity(&self) -> Option<(i32, i32, i32)> {
        Some((self.number("vgx")?, self.number("vgy")?, self.number("vgz")?))
    }
}

impl FromIterator<(String, String)> for TelemetrySnapshot {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self { fields: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_full_broadcast_line() {
        let line = concat!(
            "pitch:0;roll:-1;yaw:12;vgx:0;vgy:0;vgz:0;templ:61;temph:63;tof:10;h:0;",
            "bat:87;baro:187.25;time:12;agx:-3.00;agy:1.00;agz:-999.00;\r\n",
        );
        let snap = TelemetrySnapshot::parse(line);
        assert_eq!(snap.len(), 16);
        assert_eq!(snap.battery_pct(), Some(87));
        assert_eq!(snap.flight_time_s(), Some(12));
        assert_eq!(snap.attitude_deg(), Some((0, -1, 12)));
        assert_eq!(snap.temperature_c(), Some((61, 63)));
        assert_eq!(snap.velocity(), Some((0, 0, 0)));
        assert_eq!(snap.baro_m(), Some(187.25));
        assert_eq!(snap.get("agz"), Some("-999.00"));
    }

    #[test]
    fn trims_keys_and_values() {
        let snap = TelemetrySnapshot::parse(" k1 : v1 ;k2:v2;");
        assert_eq!(snap.fields(), &map(&[("k1", "v1"), ("k2", "v2")]));
    }

    #[test]
    fn drops_fragments_without_colon() {
        let snap = TelemetrySnapshot::parse("a:1;;b:2;junk;");
        assert_eq!(snap.into_fields(), map(&[("a", "1"), ("b", "2")]));
    }

    #[test]
    fn drops_empty_keys() {
        let snap = TelemetrySnapshot::parse(" :5;a:1;");
        assert_eq!(snap.into_fields(), map(&[("a", "1")]));
    }

    #[test]
    fn last_duplicate_wins() {
        let snap = TelemetrySnapshot::parse("a:1;a:2;");
        assert_eq!(snap.into_fields(), map(&[("a", "2")]));
    }

    #[test]
    fn splits_on_first_colon_only() {
        let snap = TelemetrySnapshot::parse("mid:-1;x:1:2;");
        assert_eq!(snap.get("x"), Some("1:2"));
    }

    #[test]
    fn non_numeric_field_is_none_not_error() {
        let snap = TelemetrySnapshot::parse("bat:low;time:3;");
        assert_eq!(snap.battery_pct(), None);
        assert_eq!(snap.flight_time_s(), Some(3));
    }

    #[test]
    fn classification_boundaries() {
        assert!(!looks_like_telemetry("ok"));
        assert!(!looks_like_telemetry("error"));
        assert!(!looks_like_telemetry("a:1"));
        assert!(!looks_like_telemetry("a;b"));
        assert!(looks_like_telemetry("a:1;b:2;"));
        assert!(looks_like_telemetry(":;"));
    }

    #[test]
    fn classify_routes_replies_and_telemetry() {
        assert_eq!(classify(b"ok\r\n"), Inbound::Reply("ok".into()));
        assert_eq!(classify(b"error"), Inbound::Reply("error".into()));
        match classify(b"a:1;b:2;") {
            Inbound::Telemetry(Ok(snap)) => {
                assert_eq!(snap.into_fields(), map(&[("a", "1"), ("b", "2")]))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn classify_reports_non_text_telemetry() {
        let raw = [b'a', b':', 0xff, b';'];
        assert!(matches!(classify(&raw), Inbound::Telemetry(Err(ParseError::NotText(_)))));
    }
}
