//! Placeholder scanner for `{{name}}` templates.
//!
//! Names are taken verbatim: whitespace inside the braces is part of the
//! name, so `{{ user }}` never matches a variable called `user`.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Text between the braces.
    pub name: String,
    /// Byte range of the whole `{{...}}` token in the source.
    pub span: Range<usize>,
}

/// Find every well-formed placeholder in `input`, left to right.
///
/// An opening `{{` without a matching `}}` ends the scan; an inner `{`
/// restarts it one byte later so `{{{a}}` yields `{{a}}`.
pub fn parse_placeholders(input: &str) -> Vec<Placeholder> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] != b'{' || bytes[i + 1] != b'{' {
            i += 1;
            continue;
        }

        let start = i;
        let mut j = i + 2;
        let mut restart = None;
        let mut end = None;

        while j < bytes.len() {
            match bytes[j] {
                b'}' if j + 1 < bytes.len() && bytes[j + 1] == b'}' => {
                    end = Some(j);
                    break;
                }
                b'{' => {
                    restart = Some(j);
                    break;
                }
                b'}' => break,
                _ => j += 1,
            }
        }

        match (end, restart) {
            (Some(end), _) if end > start + 2 => {
                out.push(Placeholder {
                    name: input[start + 2..end].to_string(),
                    span: start..end + 2,
                });
                i = end + 2;
            }
            (_, Some(_)) => i = start + 1,
            (Some(end), None) => i = end + 2,
            (None, None) => {
                if j >= bytes.len() {
                    break;
                }
                i = j + 1;
            }
        }
    }

    out
}

pub fn has_placeholders(input: &str) -> bool {
    input.contains("{{") && input.contains("}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_placeholder() {
        let found = parse_placeholders("Hello {{name}}!");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "name");
        assert_eq!(found[0].span, 6..14);
    }

    #[test]
    fn test_multiple_and_dotted() {
        let found = parse_placeholders("{{a}}-{{user.fav-food[0]}}");
        let names: Vec<_> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "user.fav-food[0]"]);
    }

    #[test]
    fn test_whitespace_is_kept() {
        let found = parse_placeholders("{{ user.name }}");
        assert_eq!(found[0].name, " user.name ");
    }

    #[test]
    fn test_unterminated_is_ignored() {
        assert!(parse_placeholders("{{open and never closed").is_empty());
        assert!(parse_placeholders("}} {{").is_empty());
        assert!(parse_placeholders("{{}}").is_empty());
    }

    #[test]
    fn test_inner_brace_restarts() {
        let found = parse_placeholders("{{{a}}");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "a");
        assert_eq!(found[0].span, 1..6);
    }

    #[test]
    fn test_single_close_brace_breaks_token() {
        let found = parse_placeholders("{{a}b}} {{c}}");
        let names: Vec<_> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["c"]);
    }
}
