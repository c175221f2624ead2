/// Closest candidate within a small edit distance of `target`, if any.
pub fn find_best_match<S: AsRef<str>>(
    target: &str,
    candidates: impl IntoIterator<Item = S>,
) -> Option<String> {
    let mut best_candidate = None;
    let mut min_distance = usize::MAX;
    let threshold = if target.len() < 3 { 1 } else { 3 };

    for candidate in candidates {
        let candidate = candidate.as_ref();
        let distance = levenshtein_distance(&target.to_lowercase(), &candidate.to_lowercase());
        if distance <= threshold && distance < min_distance {
            min_distance = distance;
            best_candidate = Some(candidate.to_string());
        }
    }

    best_candidate
}

fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s2_chars: Vec<char> = s2.chars().collect();
    let mut previous: Vec<usize> = (0..=s2_chars.len()).collect();
    let mut current = vec![0; s2_chars.len() + 1];

    for (i, char1) in s1.chars().enumerate() {
        current[0] = i + 1;
        for (j, char2) in s2_chars.iter().enumerate() {
            let cost = usize::from(char1 != *char2);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[s2_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_nearby_names() {
        let known = ["duration", "eviction"];
        assert_eq!(find_best_match("duraton", known), Some("duration".to_string()));
        assert_eq!(find_best_match("Eviction", known), Some("eviction".to_string()));
        assert_eq!(find_best_match("region", known), None);
    }

    #[test]
    fn distance_counts_edits() {
        assert_eq!(levenshtein_distance("ldloc", "ldlco"), 2);
        assert_eq!(levenshtein_distance("", "ret"), 3);
        assert_eq!(levenshtein_distance("ret", "ret"), 0);
    }
}
