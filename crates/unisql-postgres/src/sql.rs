//! Statement text rewriting for the extended query protocol.
//!
//! Callers write `?` placeholders on every backend; PostgreSQL wants `$1`,
//! `$2`, ... Only placeholders in plain statement text are rewritten. Quoted
//! literals, quoted identifiers, dollar-quoted bodies and comments are
//! copied through untouched.

/// Rewrite `?` placeholders to `$n`, returning the new text and the count.
pub fn rewrite_placeholders(sql: &str) -> (String, usize) {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut count = 0usize;
    let mut i = 0usize;
    // Start of the pending run of bytes to copy verbatim
    let mut copied = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'?' => {
                out.push_str(&sql[copied..i]);
                count += 1;
                out.push('$');
                out.push_str(&count.to_string());
                i += 1;
                copied = i;
            }
            b'\'' => {
                let escapes = i > 0 && matches!(bytes[i - 1], b'E' | b'e');
                i = skip_quoted(bytes, i, b'\'', escapes);
            }
            b'"' => i = skip_quoted(bytes, i, b'"', false),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|b| *b == b'\n')
                    .map_or(bytes.len(), |p| i + p + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'$' => i = skip_dollar_quoted(sql, i),
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied..]);
    (out, count)
}

/// Index just past the closing quote (or the end of input).
fn skip_quoted(bytes: &[u8], start: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        if b == quote {
            // Doubled quote is an escaped quote
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Block comments nest in PostgreSQL.
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// `$tag$ ... $tag$`; a lone `$` or positional `$1` is ordinary text.
fn skip_dollar_quoted(sql: &str, start: usize) -> usize {
    let rest = &sql[start + 1..];
    let Some(tag_len) = rest.find('$') else {
        return start + 1;
    };
    let tag = &rest[..tag_len];
    let valid_tag = tag
        .chars()
        .next()
        .is_none_or(|c| c.is_ascii_alphabetic() || c == '_')
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_tag {
        return start + 1;
    }

    let delimiter = &sql[start..=start + 1 + tag_len];
    let body_start = start + delimiter.len();
    sql[body_start..]
        .find(delimiter)
        .map_or(sql.len(), |p| body_start + p + delimiter.len())
}
