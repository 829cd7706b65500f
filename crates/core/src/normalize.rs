//! Bounds and cleans extracted text to a backend-safe form.

/// Collapses whitespace runs, drops control characters, and caps the result
/// at `max_chars` characters (never splitting a char).
pub fn clean_text(input: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_chars * 4));
    let mut pending_space = false;
    let mut count = 0usize;
    for ch in input.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        // Non-whitespace control characters are dropped outright.
        if ch.is_control() {
            continue;
        }
        if pending_space {
            if count + 1 >= max_chars {
                break;
            }
            out.push(' ');
            count += 1;
            pending_space = false;
        }
        if count >= max_chars {
            break;
        }
        out.push(ch);
        count += 1;
    }
    out
}

/// Caps at a character count without any cleaning. Used where the source is
/// already well-formed.
pub fn cap_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Leading slice used for the folder-refinement query.
pub fn excerpt(input: &str, max_chars: usize) -> String {
    cap_chars(input, max_chars).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_controls() {
        let cleaned = clean_text("a\t\tb\n\n  c\u{0000}d", 100);
        assert_eq!(cleaned, "a b cd");
    }

    #[test]
    fn caps_at_char_boundary() {
        let s = "héllo wörld";
        let capped = cap_chars(s, 4);
        assert_eq!(capped, "héll");
    }

    #[test]
    fn clean_text_respects_cap() {
        let long = "word ".repeat(10_000);
        let cleaned = clean_text(&long, 50);
        assert!(cleaned.chars().count() <= 50);
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(clean_text("   \n\t ", 10), "");
    }
}
