//! Narrow field extractors for the two small JSON replies the server sends.
//!
//! These scan for a quoted key instead of parsing a document tree.

/// Outcome of looking up `"hash"` in a response body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashField<'a> {
    Found(&'a str),
    /// The key is absent.
    Missing,
    /// The key exists but no non-empty terminated string follows it.
    Malformed,
}

/// Outcome of looking up the sleep interval in a response body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SleepField {
    Found(u32),
    Missing,
    /// The key exists but its value is not a positive integer.
    Invalid,
}

/// Accepted spellings of the sleep interval key, checked in order.
pub const SLEEP_KEYS: [&str; 3] = ["sleep_seconds", "sleep", "sleep_duration"];

/// Extracts the string value of `"hash"`.
pub fn extract_hash(body: &[u8]) -> HashField<'_> {
    let Some(mut pos) = value_start(body, "hash") else {
        return HashField::Missing;
    };

    if body.get(pos) != Some(&b'"') {
        return HashField::Malformed;
    }
    pos += 1;

    let Some(len) = body[pos..].iter().position(|b| *b == b'"') else {
        return HashField::Malformed;
    };
    if len == 0 {
        return HashField::Malformed;
    }

    match core::str::from_utf8(&body[pos..pos + len]) {
        Ok(value) => HashField::Found(value),
        Err(_) => HashField::Malformed,
    }
}

/// Extracts the first present key of [`SLEEP_KEYS`] as whole seconds.
pub fn extract_sleep_seconds(body: &[u8]) -> SleepField {
    let Some(pos) = SLEEP_KEYS.iter().find_map(|key| value_start(body, key)) else {
        return SleepField::Missing;
    };

    let digits = body[pos..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return SleepField::Invalid;
    }

    let mut value = 0u32;
    for digit in &body[pos..pos + digits] {
        value = match value
            .checked_mul(10)
            .and_then(|v| v.checked_add((digit - b'0') as u32))
        {
            Some(v) => v,
            None => return SleepField::Invalid,
        };
    }

    if value == 0 {
        SleepField::Invalid
    } else {
        SleepField::Found(value)
    }
}

/// Index of the first byte of the value following `"key":`, whitespace skipped.
fn value_start(body: &[u8], key: &str) -> Option<usize> {
    let key = key.as_bytes();
    let mut search = 0;

    while search < body.len() {
        let found = find_quoted(&body[search..], key)? + search;
        let mut pos = skip_ws(body, found + key.len() + 2);
        if body.get(pos) == Some(&b':') {
            pos = skip_ws(body, pos + 1);
            return Some(pos);
        }
        search = found + 1;
    }

    None
}

fn find_quoted(haystack: &[u8], key: &[u8]) -> Option<usize> {
    let needle_len = key.len() + 2;
    if haystack.len() < needle_len {
        return None;
    }

    (0..=haystack.len() - needle_len).find(|&i| {
        haystack[i] == b'"'
            && &haystack[i + 1..i + 1 + key.len()] == key
            && haystack[i + 1 + key.len()] == b'"'
    })
}

fn skip_ws(body: &[u8], mut pos: usize) -> usize {
    while body.get(pos).is_some_and(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n')) {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_read_with_or_without_spaces() {
        assert_eq!(extract_hash(br#"{"hash":"abc123"}"#), HashField::Found("abc123"));
        assert_eq!(extract_hash(br#"{ "hash" : "abc123" }"#), HashField::Found("abc123"));
    }

    #[test]
    fn hash_failures_are_classified() {
        assert_eq!(extract_hash(br#"{"etag":"abc"}"#), HashField::Missing);
        assert_eq!(extract_hash(br#"{"hash":""}"#), HashField::Malformed);
        assert_eq!(extract_hash(br#"{"hash":"abc"#), HashField::Malformed);
        assert_eq!(extract_hash(br#"{"hash":42}"#), HashField::Malformed);
        assert_eq!(extract_hash(b""), HashField::Missing);
    }

    #[test]
    fn sleep_accepts_every_alias() {
        assert_eq!(extract_sleep_seconds(br#"{"sleep_seconds": 1800}"#), SleepField::Found(1800));
        assert_eq!(extract_sleep_seconds(br#"{"sleep":60}"#), SleepField::Found(60));
        assert_eq!(extract_sleep_seconds(br#"{"sleep_duration":	300}"#), SleepField::Found(300));
    }

    #[test]
    fn sleep_rejects_zero_negative_and_overflow() {
        assert_eq!(extract_sleep_seconds(br#"{"sleep_seconds":0}"#), SleepField::Invalid);
        assert_eq!(extract_sleep_seconds(br#"{"sleep":-5}"#), SleepField::Invalid);
        assert_eq!(extract_sleep_seconds(br#"{"sleep":99999999999}"#), SleepField::Invalid);
        assert_eq!(extract_sleep_seconds(br#"{"interval":60}"#), SleepField::Missing);
    }

    #[test]
    fn key_inside_a_value_is_not_matched() {
        assert_eq!(
            extract_sleep_seconds(br#"{"note":"sleep","sleep":120}"#),
            SleepField::Found(120)
        );
    }
}
