pub const DEFAULT_LIMIT: usize = 5;

pub fn rank_by_name<T: Clone>(query: &str, candidates: &[(String, T)], limit: usize) -> Vec<T> {
    let query = normalize(query);
    if query.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(f64, usize)> = candidates
        .iter()
        .enumerate()
        .map(|(idx, (name, _))| (name_score(&query, &normalize(name)), idx))
        .filter(|(score, _)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    scored
        .into_iter()
        .take(limit)
        .map(|(_, idx)| candidates[idx].1.clone())
        .collect()
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn name_score(query: &str, name: &str) -> f64 {
    let whole = similarity(query, name);
    let best_word = name
        .split(' ')
        .map(|word| similarity(query, word))
        .fold(0.0, f64::max);
    whole.max(best_word)
}

fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 0.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}
