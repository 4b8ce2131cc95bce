//! Parser for the extended JSON-Pointer path grammar: plain keys, integer
//! indices, the `-` array-append marker, and `[?(@.field=='value')]` filter
//! predicates (equality only — the grammar has no `!=`, `<`, or boolean
//! combinators).

use serde_json::Value as Json;
use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("path must start with '/': {path:?}"))]
    MissingLeadingSlash { path: String },

    #[snafu(display("malformed filter predicate {token:?}"))]
    MalformedFilter { token: String },

    #[snafu(display("'-' may only appear as the final path segment: {path:?}"))]
    AppendNotFinal { path: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// One step of a resolved path.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    Index(usize),
    /// `-`: append to the end of a list. Valid only as the last segment of
    /// an `add` operation's path.
    Append,
    /// `[?(@.field=='value')]`: select the list element(s) whose `field`
    /// equals `value`.
    Filter { field: String, value: Json },
}

/// Parses `path` into a sequence of [`Segment`]s. `path` must start with
/// `/`; the empty path `""` denotes the document root (no segments).
pub fn parse(path: &str) -> Result<Vec<Segment>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    if !path.starts_with('/') {
        return MissingLeadingSlashSnafu { path: path.to_string() }.fail();
    }

    let mut segments = Vec::new();
    for raw in path[1..].split('/') {
        segments.extend(parse_token(raw)?);
    }

    for (i, seg) in segments.iter().enumerate() {
        if matches!(seg, Segment::Append) && i + 1 != segments.len() {
            return AppendNotFinalSnafu { path: path.to_string() }.fail();
        }
    }

    Ok(segments)
}

/// A single `/`-delimited token may carry a trailing filter predicate
/// attached directly to a key (`containers[?(@.name=='app')]`), so one
/// token can expand into up to two segments.
fn parse_token(token: &str) -> Result<Vec<Segment>> {
    let unescaped = unescape(token);

    if let Some(bracket_start) = unescaped.find("[?(") {
        let key_part = &unescaped[..bracket_start];
        let filter_part = &unescaped[bracket_start..];
        let filter = parse_filter(filter_part)?;
        return Ok(if key_part.is_empty() {
            vec![filter]
        } else {
            vec![Segment::Key(key_part.to_string()), filter]
        });
    }

    if unescaped == "-" {
        return Ok(vec![Segment::Append]);
    }

    if !unescaped.is_empty() && unescaped.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(idx) = unescaped.parse::<usize>() {
            return Ok(vec![Segment::Index(idx)]);
        }
    }

    Ok(vec![Segment::Key(unescaped)])
}

fn parse_filter(token: &str) -> Result<Segment> {
    let inner = token
        .strip_prefix("[?(@.")
        .and_then(|s| s.strip_suffix(")]"))
        .context_malformed(token)?;

    let (field, rhs) = inner
        .split_once("==")
        .context_malformed(token)?;

    let value = parse_filter_value(rhs.trim());
    Ok(Segment::Filter { field: field.trim().to_string(), value })
}

trait MalformedContext<T> {
    fn context_malformed(self, token: &str) -> Result<T>;
}

impl<T> MalformedContext<T> for Option<T> {
    fn context_malformed(self, token: &str) -> Result<T> {
        self.ok_or_else(|| Error::MalformedFilter { token: token.to_string() })
    }
}

fn parse_filter_value(rhs: &str) -> Json {
    if let Some(s) = rhs.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Json::String(s.to_string());
    }
    if let Some(s) = rhs.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Json::String(s.to_string());
    }
    match rhs {
        "true" => Json::Bool(true),
        "false" => Json::Bool(false),
        "null" => Json::Null,
        _ => rhs
            .parse::<i64>()
            .map(Json::from)
            .or_else(|_| rhs.parse::<f64>().map(|f| Json::from(f)))
            .unwrap_or_else(|_| Json::String(rhs.to_string())),
    }
}

/// JSON-Pointer `~1`/`~0` escaping (RFC 6901 §4).
fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_keys_and_indices() {
        assert_eq!(
            parse("/spec/containers/0/image").unwrap(),
            vec![
                Segment::Key("spec".to_string()),
                Segment::Key("containers".to_string()),
                Segment::Index(0),
                Segment::Key("image".to_string()),
            ]
        );
    }

    #[test]
    fn parses_append_marker() {
        assert_eq!(
            parse("/spec/containers/-").unwrap(),
            vec![
                Segment::Key("spec".to_string()),
                Segment::Key("containers".to_string()),
                Segment::Append,
            ]
        );
    }

    #[test]
    fn rejects_append_not_at_end() {
        assert!(parse("/spec/-/containers").is_err());
    }

    #[test]
    fn parses_filter_predicate_attached_to_key() {
        let segs = parse("/spec/containers[?(@.name=='app')]/image").unwrap();
        assert_eq!(
            segs,
            vec![
                Segment::Key("spec".to_string()),
                Segment::Key("containers".to_string()),
                Segment::Filter { field: "name".to_string(), value: Json::String("app".to_string()) },
                Segment::Key("image".to_string()),
            ]
        );
    }

    #[test]
    fn parses_numeric_filter_value() {
        let segs = parse("/items[?(@.port==8080)]").unwrap();
        assert_eq!(
            segs,
            vec![
                Segment::Key("items".to_string()),
                Segment::Filter { field: "port".to_string(), value: Json::from(8080) },
            ]
        );
    }

    #[test]
    fn unescapes_tilde_sequences() {
        assert_eq!(parse("/a~1b/c~0d").unwrap(), vec![Segment::Key("a/b".to_string()), Segment::Key("c~d".to_string())]);
    }
}
