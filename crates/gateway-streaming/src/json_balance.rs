//! Cheap completeness check for buffered JSON fragments.

/// Whether `s` could be a complete JSON object or array.
///
/// Returns `false` quickly when the text does not start and end with a
/// matching `{}`/`[]` pair, when a bracket closes below depth zero, when a
/// string is left open, or when the counts do not balance. Brackets inside
/// string literals are ignored and backslash escapes are honored. A `true`
/// result still has to be confirmed by a real parse.
#[must_use]
pub fn might_be_complete_json(s: &str) -> bool {
    let bytes = s.trim().as_bytes();
    let (Some(&first), Some(&last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    match (first, last) {
        (b'{', b'}') | (b'[', b']') if bytes.len() >= 2 => {}
        _ => return false,
    }

    let mut braces: i64 = 0;
    let mut brackets: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for &b in bytes {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => braces += 1,
            b'}' => braces -= 1,
            b'[' => brackets += 1,
            b']' => brackets -= 1,
            _ => {}
        }
        if braces < 0 || brackets < 0 {
            return false;
        }
    }

    !in_string && braces == 0 && brackets == 0
}
