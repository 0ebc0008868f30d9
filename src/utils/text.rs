//! Text normalization helpers for keyword matching
//!
//! Questions arrive in Spanish and English, with or without accents. The
//! deterministic classifier and the query selector both match against a
//! lowercased, accent-folded copy so "Muéstrame" and "muestrame" behave
//! identically.

/// Lowercase and strip the accents that occur in Spanish business questions.
///
/// This is deliberately not full Unicode normalization: the keyword
/// vocabularies only contain ASCII, so folding the handful of accented
/// vowels (plus ñ/ü) is enough to make matching insensitive to how the
/// user typed the question.
pub fn fold_for_matching(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c.to_lowercase().next().unwrap_or(c) {
            'á' | 'à' | 'â' | 'ä' => out.push('a'),
            'é' | 'è' | 'ê' | 'ë' => out.push('e'),
            'í' | 'ì' | 'î' | 'ï' => out.push('i'),
            'ó' | 'ò' | 'ô' | 'ö' => out.push('o'),
            'ú' | 'ù' | 'û' | 'ü' => out.push('u'),
            'ñ' => out.push('n'),
            'ç' => out.push('c'),
            lc => out.push(lc),
        }
    }
    out
}

/// True when the folded text contains any of the given needles.
pub fn contains_any(folded: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| folded.contains(n))
}

/// First needle present in the folded text, if any.
pub fn first_match<'a>(folded: &str, needles: &'a [&'a str]) -> Option<&'a str> {
    needles.iter().copied().find(|n| folded.contains(n))
}

/// Truncate to a character budget, appending an ellipsis marker when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{}…", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_spanish_accents() {
        assert_eq!(fold_for_matching("Muéstrame el INVENTARIO"), "muestrame el inventario");
        assert_eq!(fold_for_matching("¿Cómo van las ventas?"), "¿como van las ventas?");
        assert_eq!(fold_for_matching("año"), "ano");
    }

    #[test]
    fn contains_any_matches_substrings() {
        let folded = fold_for_matching("Cómo está el inventario");
        assert!(contains_any(&folded, &["inventario"]));
        assert!(!contains_any(&folded, &["conversacion"]));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("señal", 3), "señ…");
        assert_eq!(truncate_chars("ok", 10), "ok");
    }
}
