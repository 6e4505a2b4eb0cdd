//! InfluxDB line protocol encoding.

use std::collections::BTreeMap;

/// Backslash-escape the characters that are significant in the identifier
/// positions of a line (measurement names, tag keys, tag values and field
/// keys).
pub fn escape(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for c in input.chars() {
        if c == ' ' || c == ',' || c == '=' {
            output.push('\\');
        }
        output.push(c);
    }
    output
}

/// Encode one measurement line: `measurement[,tag=value]* field=value timestamp`.
///
/// Tags come from a `BTreeMap`, so emission order is fixed by key and two
/// calls with identical map contents produce identical lines.
pub fn build_line(
    measurement: &str,
    tags: &BTreeMap<String, String>,
    field: &str,
    value: f64,
    timestamp: i64,
) -> String {
    let mut line = escape(measurement);
    for (key, tag_value) in tags {
        line.push(',');
        line.push_str(&escape(key));
        line.push('=');
        line.push_str(&escape(tag_value));
    }
    line.push(' ');
    line.push_str(&escape(field));
    line.push('=');
    line.push_str(&value.to_string());
    line.push(' ');
    line.push_str(&timestamp.to_string());
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Split on unescaped occurrences of `sep`, leaving escapes in place.
    fn split_escaped(input: &str, sep: char) -> Vec<String> {
        let mut segments = vec![String::new()];
        let mut chars = input.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                let segment = segments.last_mut().unwrap();
                segment.push(c);
                if let Some(escaped) = chars.next() {
                    segment.push(escaped);
                }
            } else if c == sep {
                segments.push(String::new());
            } else {
                segments.last_mut().unwrap().push(c);
            }
        }
        segments
    }

    fn unescape(input: &str) -> String {
        let mut output = String::with_capacity(input.len());
        let mut chars = input.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    output.push(escaped);
                }
            } else {
                output.push(c);
            }
        }
        output
    }

    /// Test-only inverse of `build_line`.
    fn parse_line(line: &str) -> (String, BTreeMap<String, String>, String, f64, i64) {
        let sections = split_escaped(line, ' ');
        assert_eq!(sections.len(), 3, "malformed line: {line:?}");

        let mut ids = split_escaped(&sections[0], ',').into_iter();
        let measurement = unescape(&ids.next().unwrap());
        let mut tags = BTreeMap::new();
        for pair in ids {
            let kv = split_escaped(&pair, '=');
            assert_eq!(kv.len(), 2, "malformed tag pair: {pair:?}");
            tags.insert(unescape(&kv[0]), unescape(&kv[1]));
        }

        let field_kv = split_escaped(&sections[1], '=');
        assert_eq!(field_kv.len(), 2, "malformed field: {:?}", sections[1]);
        let field = unescape(&field_kv[0]);
        let value: f64 = field_kv[1].parse().unwrap();

        let timestamp: i64 = sections[2].parse().unwrap();

        (measurement, tags, field, value, timestamp)
    }

    fn tag_map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn builds_plain_line() {
        let tags = tag_map(&[("room", "office"), ("site", "home")]);
        let line = build_line("co2", &tags, "value", 612.0, 1_700_000_000);

        assert_eq!(line, "co2,room=office,site=home value=612 1700000000");
    }

    #[test]
    fn builds_line_without_tags() {
        let line = build_line("co2", &BTreeMap::new(), "ppm", 451.5, 42);

        assert_eq!(line, "co2 ppm=451.5 42");
    }

    #[test]
    fn escapes_significant_characters() {
        let tags = tag_map(&[("the room", "first=floor")]);
        let line = build_line("living room", &tags, "value", 1.0, 7);

        assert_eq!(line, r"living\ room,the\ room=first\=floor value=1 7");
    }

    #[test]
    fn tag_order_is_deterministic() {
        let mut forwards = BTreeMap::new();
        forwards.insert("a".to_string(), "1".to_string());
        forwards.insert("b".to_string(), "2".to_string());

        let mut backwards = BTreeMap::new();
        backwards.insert("b".to_string(), "2".to_string());
        backwards.insert("a".to_string(), "1".to_string());

        assert_eq!(
            build_line("m", &forwards, "value", 3.0, 9),
            build_line("m", &backwards, "value", 3.0, 9),
        );
    }

    #[test]
    fn round_trips_through_test_parser() {
        let tags = tag_map(&[("site a", "b=c"), ("plain", "tag"), ("co,mma", "v,v")]);
        let line = build_line("room sensor", &tags, "co2 ppm", 612.5, 1_700_000_000_000);

        let (measurement, parsed_tags, field, value, timestamp) = parse_line(&line);

        assert_eq!(measurement, "room sensor");
        assert_eq!(parsed_tags, tags);
        assert_eq!(field, "co2 ppm");
        assert_eq!(value, 612.5);
        assert_eq!(timestamp, 1_700_000_000_000);
    }
}
