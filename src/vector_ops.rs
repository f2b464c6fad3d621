use crate::config::Number;
use wide::f32x8;

/// Dot product of two equal-length slices, eight lanes at a time.
/// Extra elements in the longer slice are ignored.
pub fn dot_simd(a: &[Number], b: &[Number]) -> Number {
    let len = a.len().min(b.len());
    let simd_len = len - (len % 8);

    let mut acc = f32x8::splat(0.0);
    for i in (0..simd_len).step_by(8) {
        let va = f32x8::new([
            a[i],
            a[i + 1],
            a[i + 2],
            a[i + 3],
            a[i + 4],
            a[i + 5],
            a[i + 6],
            a[i + 7],
        ]);
        let vb = f32x8::new([
            b[i],
            b[i + 1],
            b[i + 2],
            b[i + 3],
            b[i + 4],
            b[i + 5],
            b[i + 6],
            b[i + 7],
        ]);
        acc += va * vb;
    }

    let mut sum = acc.reduce_add();
    for i in simd_len..len {
        sum += a[i] * b[i];
    }
    sum
}

/// Per-column minimum and maximum over a set of equal-length rows.
pub fn column_bounds(rows: &[Vec<Number>], column: usize) -> (Number, Number) {
    rows.iter()
        .filter_map(|row| row.get(column).copied())
        .fold((Number::INFINITY, Number::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        })
}

/// Maps `value` into [0, 1] relative to `(lo, hi)`; degenerate ranges map to 0.5.
pub fn normalize_in_range(value: Number, (lo, hi): (Number, Number)) -> Number {
    let span = hi - lo;
    if !span.is_finite() || span.abs() < crate::config::EPSILON {
        0.5
    } else {
        ((value - lo) / span).clamp(0.0, 1.0)
    }
}

pub fn mean_abs_by_column(rows: &[Vec<Number>]) -> Vec<Number> {
    let Some(width) = rows.first().map(Vec::len) else {
        return Vec::new();
    };
    let mut totals = vec![0.0; width];
    for row in rows {
        for (total, v) in totals.iter_mut().zip(row) {
            *total += v.abs();
        }
    }
    let n = rows.len() as Number;
    totals.iter_mut().for_each(|t| *t /= n);
    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_matches_scalar_for_odd_lengths() {
        let a: Vec<Number> = (0..19).map(|i| i as Number * 0.5).collect();
        let b: Vec<Number> = (0..19).map(|i| 1.0 - i as Number * 0.1).collect();
        let expected: Number = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((dot_simd(&a, &b) - expected).abs() < 1e-4);
    }

    #[test]
    fn normalize_handles_flat_columns() {
        assert_eq!(normalize_in_range(3.0, (3.0, 3.0)), 0.5);
        assert_eq!(normalize_in_range(5.0, (0.0, 10.0)), 0.5);
        assert_eq!(normalize_in_range(50.0, (0.0, 10.0)), 1.0);
    }

    #[test]
    fn mean_abs_uses_magnitudes() {
        let rows = vec![vec![1.0, -2.0], vec![-3.0, 2.0]];
        assert_eq!(mean_abs_by_column(&rows), vec![2.0, 2.0]);
        assert_eq!(column_bounds(&rows, 0), (-3.0, 1.0));
    }
}
