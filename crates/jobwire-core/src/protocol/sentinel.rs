//! Rewrites non-finite number tokens so strict JSON parsing succeeds.
//!
//! Some servers emit bare `NaN`, `Infinity` and `-Infinity` where a number is
//! expected. `serde_json::Value` cannot hold non-finite floats, so these
//! tokens are rewritten before parsing according to a [`SentinelPolicy`].
//! Text inside string literals is copied untouched, so payloads that merely
//! mention these words are unaffected.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Rewritten tokens. `-Infinity` must precede `Infinity`.
const SENTINELS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

/// What a non-finite number token becomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelPolicy {
    /// `null`. A decoded `null` can then no longer be told apart from one the
    /// server sent.
    #[default]
    Null,
    /// The token as a JSON string (`"NaN"`, `"Infinity"`, `"-Infinity"`), so
    /// callers can recover the float with `str::parse::<f64>`.
    Label,
}

impl SentinelPolicy {
    fn write(self, token: &str, buf: &mut String) {
        match self {
            SentinelPolicy::Null => buf.push_str("null"),
            SentinelPolicy::Label => {
                buf.push('"');
                buf.push_str(token);
                buf.push('"');
            }
        }
    }
}

/// Rewrite sentinel tokens outside string literals.
///
/// Returns the input unchanged (borrowed) when nothing needed rewriting.
pub fn rewrite_sentinels(input: &str, policy: SentinelPolicy) -> Cow<'_, str> {
    let bytes = input.as_bytes();
    let mut output: Option<String> = None;
    let mut copied_up_to = 0;
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];

        if in_string {
            match byte {
                b'\\' => i += 2,
                b'"' => {
                    in_string = false;
                    i += 1;
                }
                _ => i += 1,
            }
            continue;
        }

        if byte == b'"' {
            in_string = true;
            i += 1;
            continue;
        }

        if let Some(token) = sentinel_at(bytes, i) {
            let buf = output.get_or_insert_with(|| String::with_capacity(input.len()));
            buf.push_str(&input[copied_up_to..i]);
            policy.write(token, buf);
            i += token.len();
            copied_up_to = i;
            continue;
        }

        i += 1;
    }

    match output {
        Some(mut buf) => {
            buf.push_str(&input[copied_up_to..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(input),
    }
}

fn sentinel_at(bytes: &[u8], at: usize) -> Option<&'static str> {
    if at > 0 && is_word_byte(bytes[at - 1]) {
        return None;
    }
    SENTINELS.iter().copied().find(|token| {
        bytes[at..].starts_with(token.as_bytes())
            && bytes
                .get(at + token.len())
                .map_or(true, |next| !is_word_byte(*next))
    })
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neutralize(input: &str) -> Cow<'_, str> {
        rewrite_sentinels(input, SentinelPolicy::Null)
    }

    #[test]
    fn test_plain_json_is_borrowed() {
        let input = r#"{"id":1,"response":[1,2.5,null]}"#;
        assert!(matches!(neutralize(input), Cow::Borrowed(_)));
    }

    #[test]
    fn test_sentinels_replaced() {
        let input = r#"{"a":NaN,"b":[Infinity,-Infinity]}"#;
        assert_eq!(neutralize(input), r#"{"a":null,"b":[null,null]}"#);
    }

    #[test]
    fn test_strings_untouched() {
        let input = r#"{"doc":"returns NaN or -Infinity","v":NaN}"#;
        assert_eq!(
            neutralize(input),
            r#"{"doc":"returns NaN or -Infinity","v":null}"#
        );
    }

    #[test]
    fn test_escaped_quotes_do_not_end_string() {
        let input = r#"{"doc":"say \"NaN\" NaN","v":1}"#;
        assert_eq!(neutralize(input), input);
    }

    #[test]
    fn test_identifier_fragments_ignored() {
        // Not valid JSON either way, but the pass must not splice inside words.
        let input = r#"{"v":NaNa,"w":xNaN}"#;
        assert_eq!(neutralize(input), input);
    }

    #[test]
    fn test_non_ascii_preserved() {
        let input = r#"{"doc":"größe","v":NaN}"#;
        assert_eq!(neutralize(input), r#"{"doc":"größe","v":null}"#);
    }

    #[test]
    fn test_label_policy_keeps_token() {
        let input = r#"{"a":NaN,"b":[Infinity,-Infinity],"c":"NaN"}"#;
        let output = rewrite_sentinels(input, SentinelPolicy::Label);
        assert_eq!(
            output,
            r#"{"a":"NaN","b":["Infinity","-Infinity"],"c":"NaN"}"#
        );

        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        let a: f64 = value["a"].as_str().unwrap().parse().unwrap();
        assert!(a.is_nan());
        let b: f64 = value["b"][1].as_str().unwrap().parse().unwrap();
        assert_eq!(b, f64::NEG_INFINITY);
    }
}
