//! Select-best-by-score.
//!
//! Every "pick the best hypothesis" decision in the pipeline (PID hypothesis,
//! MCS direction, truth particle, primary track, external-detector match
//! ordering) is the same pattern: score each candidate, keep the extreme.
//! Candidates without a finite score are ignored. Ties keep the earliest
//! candidate, so the result only depends on iteration order.

use std::cmp::Ordering;

fn select_by<T, I, F>(candidates: I, mut score: F, better: fn(f64, f64) -> bool) -> Option<(T, f64)>
where
    I: IntoIterator<Item = T>,
    F: FnMut(&T) -> Option<f64>,
{
    let mut best: Option<(T, f64)> = None;
    for candidate in candidates {
        let s = match score(&candidate) {
            Some(s) if s.is_finite() => s,
            _ => continue,
        };
        match &best {
            Some((_, best_score)) if !better(s, *best_score) => {}
            _ => best = Some((candidate, s)),
        }
    }
    best
}

/// Returns the candidate with the smallest score, with that score.
pub fn select_min_by<T, I, F>(candidates: I, score: F) -> Option<(T, f64)>
where
    I: IntoIterator<Item = T>,
    F: FnMut(&T) -> Option<f64>,
{
    select_by(candidates, score, |a, b| a < b)
}

/// Returns the candidate with the largest score, with that score.
pub fn select_max_by<T, I, F>(candidates: I, score: F) -> Option<(T, f64)>
where
    I: IntoIterator<Item = T>,
    F: FnMut(&T) -> Option<f64>,
{
    select_by(candidates, score, |a, b| a > b)
}

/// Total order on f64 for sorting, NaN last.
pub fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| b.is_nan().cmp(&a.is_nan()).reverse())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_min_keeps_first_on_tie() {
        let items = vec![("a", 2.0), ("b", 1.0), ("c", 1.0)];
        let (best, score) = select_min_by(items, |(_, s)| Some(*s)).unwrap();
        assert_eq!(best.0, "b");
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_select_max_skips_unscored() {
        let items = vec![1, 2, 3, 4];
        let best = select_max_by(items, |&i| if i == 4 { None } else { Some(i as f64) });
        assert_eq!(best, Some((3, 3.0)));
    }

    #[test]
    fn test_select_ignores_nan() {
        let items = vec![f64::NAN, 5.0];
        let best = select_min_by(items, |&v| Some(v));
        assert_eq!(best.map(|(v, _)| v), Some(5.0));
    }

    #[test]
    fn test_select_empty() {
        let items: Vec<f64> = vec![];
        assert!(select_min_by(items, |&v| Some(v)).is_none());
    }

    #[test]
    fn test_cmp_f64_nan_last() {
        let mut v = vec![3.0, f64::NAN, 1.0];
        v.sort_by(|a, b| cmp_f64(*a, *b));
        assert_eq!(v[0], 1.0);
        assert_eq!(v[1], 3.0);
        assert!(v[2].is_nan());
    }
}
