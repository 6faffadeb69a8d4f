//! Key namespacing and Redis-style glob matching.
//!
//! ## Key Format
//!
//! - Local tier: `{namespace}:{key}` (process-scoped, no global prefix)
//! - Remote tier: `{prefix}{namespace}:{key}`, e.g. `jobboard:jobs:job:42`

use regex::Regex;

/// Key used by the local (memory) tier.
#[inline]
pub fn local_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

/// Fully prefixed key used by the remote (Redis) tier.
#[inline]
pub fn remote_key(prefix: &str, namespace: &str, key: &str) -> String {
    format!("{prefix}{namespace}:{key}")
}

/// Compile a Redis glob pattern into an anchored regex.
///
/// Supports the same syntax as Redis `KEYS`/`SCAN MATCH`:
/// - `*` - any run of characters (including none)
/// - `?` - exactly one character
/// - `[abc]`, `[a-z]`, `[^a]` - character classes
/// - `\x` - literal `x`
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'^') {
                    chars.next();
                    class.push('^');
                }
                while let Some(cc) = chars.next() {
                    match cc {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                class.push_str(&regex::escape(&escaped.to_string()));
                            }
                        }
                        // Characters with meaning inside a regex class but not a glob class
                        '[' | '&' | '~' => {
                            class.push('\\');
                            class.push(cc);
                        }
                        _ => class.push(cc),
                    }
                }
                if closed && !class.is_empty() && class != "^" {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                } else {
                    // Unterminated or empty class: Redis treats the bracket literally
                    out.push_str(&regex::escape("["));
                    out.push_str(&regex::escape(&class));
                    if closed {
                        out.push_str(&regex::escape("]"));
                    }
                }
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    out.push('$');
    Regex::new(&out)
}
