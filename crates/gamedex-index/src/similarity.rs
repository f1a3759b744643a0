//! Longest-matching-blocks similarity.
//!
//! The ratio is `2 * M / (len(a) + len(b))`, where `M` counts the characters
//! covered by the matching blocks found by repeatedly taking the longest
//! common substring and recursing on the pieces to its left and right. Among
//! equally long candidates the one starting earliest in `a`, then in `b`, wins,
//! which makes the block set (and so `M`) deterministic.

/// Similarity in `[0, 1]`; two empty strings are identical.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest common run of `a[alo..ahi]` and `b[blo..bhi]` as `(start_a, start_b, len)`.
fn longest_match(a: &[char], b: &[char], alo: usize, ahi: usize, blo: usize, bhi: usize) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    let width = bhi - blo;
    let mut prev = vec![0usize; width + 1];
    let mut curr = vec![0usize; width + 1];
    for i in alo..ahi {
        for j in blo..bhi {
            let slot = j - blo + 1;
            if a[i] == b[j] {
                let k = prev[slot - 1] + 1;
                curr[slot] = k;
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            } else {
                curr[slot] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    (best_i, best_j, best_k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn known_ratios() {
        assert!(close(ratio("abcd", "bcde"), 0.75));
        assert!(close(ratio("counterstrike", "counter-strike"), 26.0 / 27.0));
        assert!(close(ratio("", ""), 1.0));
        assert!(close(ratio("abc", ""), 0.0));
        assert!(close(ratio("same", "same"), 1.0));
    }

    #[test]
    fn blocks_recurse_on_both_sides() {
        // "ab" + "cd" around a mismatched middle.
        assert!(close(ratio("abXcd", "abYcd"), 8.0 / 10.0));
        assert!(close(ratio("qabxcd", "abycdf"), 2.0 * 4.0 / 12.0));
    }

    #[test]
    fn unrelated_strings_stay_below_fuzzy_threshold() {
        assert!(ratio("xyz123nonsense", "counter-strike") < 0.7);
        assert!(ratio("xyz123nonsense", "portal") < 0.7);
    }
}
