//! Edit distance used to refine trigram candidates.

/// Number of single-character insertions, deletions or substitutions needed
/// to turn `a_chars` into `b_chars`.
fn distance_chars(a_chars: &[char], b_chars: &[char]) -> usize {
    // Iterate over the longer string so the row is the shorter one
    let (outer, inner) = if a_chars.len() >= b_chars.len() {
        (a_chars, b_chars)
    } else {
        (b_chars, a_chars)
    };
    if inner.is_empty() {
        return outer.len();
    }

    let mut row: Vec<usize> = (0..=inner.len()).collect();
    for (i, outer_char) in outer.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, inner_char) in inner.iter().enumerate() {
            let above = row[j + 1];
            let substitution = diagonal + usize::from(outer_char != inner_char);
            row[j + 1] = substitution.min(above + 1).min(row[j] + 1);
            diagonal = above;
        }
    }
    row[inner.len()]
}

/// Edit distance scaled to [0, 1]: 1.0 for identical strings, 0.0 when every
/// character of the longer string has to change.
pub fn levenshtein_similarity(a: &str, b: &str) -> f32 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let longest = a_chars.len().max(b_chars.len());
    if longest == 0 {
        return 1.0;
    }
    let distance = distance_chars(&a_chars, &b_chars);
    1.0 - distance as f32 / longest as f32
}
