//! Popularity score arithmetic.
//!
//! A score is tracked in five day buckets. The bucket for the article's
//! current age receives the part of the latest total not already accounted
//! for by the younger buckets, so each bucket holds that day's growth.

use chrono::{DateTime, Utc};

use crate::db::Scores;

/// Bucket weights, youngest first.
const WEIGHTS: [f64; 5] = [1.0, 0.1, 0.01, 0.001, 0.0001];

/// Whole days since `date`, never negative.
pub fn age_days(date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - date).num_days().max(0)
}

/// Record `total` for an article `age` days old.
pub fn record(buckets: [i64; 5], age: i64, total: i64) -> [i64; 5] {
    let index = age.clamp(0, 4) as usize;
    let mut out = buckets;
    out[index] = total - buckets[..index].iter().sum::<i64>();
    out
}

/// Weighted sum of the buckets.
pub fn aggregate(buckets: [i64; 5]) -> f64 {
    buckets
        .iter()
        .zip(WEIGHTS)
        .map(|(b, w)| *b as f64 * w)
        .sum()
}

/// Age penalty: hours since `date` times whole days since `date`.
pub fn penalty(date: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let hours = (now - date).num_seconds().max(0) as f64 / 3600.0;
    hours * age_days(date, now) as f64
}

/// Fold a fresh provider `total` into `scores`.
pub fn apply(scores: &mut Scores, total: i64, date: DateTime<Utc>, now: DateTime<Utc>) {
    let buckets = record(scores.buckets(), age_days(date, now), total);
    scores.set_buckets(buckets);

    let mut score = aggregate(buckets);
    let penalty = penalty(date, now);
    if penalty > 0.0 {
        score /= penalty;
    }
    scores.score = score;
}
