//! Distance functions
//!
//! Smaller is closer. Cosine vectors are unit length by the time they reach
//! these functions, so cosine distance reduces to `1 - dot`.

use crate::config::Metric;

/// Distance between two vectors of equal length
pub fn distance(a: &[f32], b: &[f32], metric: Metric) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "dimension mismatch in distance");
    match metric {
        Metric::L2 => euclidean_distance(a, b),
        Metric::Cosine => 1.0 - dot_product(a, b),
    }
}

/// Scale `v` to unit length; a zero vector is left as is
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Inner product
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2() {
        assert_eq!(distance(&[0.0, 0.0], &[3.0, 4.0], Metric::L2), 5.0);
        assert_eq!(distance(&[1.0, 2.0], &[1.0, 2.0], Metric::L2), 0.0);
    }

    #[test]
    fn test_cosine_on_normalized() {
        let mut a = vec![2.0, 0.0];
        let mut b = vec![0.0, 5.0];
        let mut c = vec![-1.0, 0.0];
        normalize(&mut a);
        normalize(&mut b);
        normalize(&mut c);
        assert!(distance(&a, &a, Metric::Cosine).abs() < 1e-6);
        assert!((distance(&a, &b, Metric::Cosine) - 1.0).abs() < 1e-6);
        assert!((distance(&a, &c, Metric::Cosine) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let mut z = vec![0.0, 0.0, 0.0];
        normalize(&mut z);
        assert_eq!(z, vec![0.0, 0.0, 0.0]);
    }
}
