/// 4-point cubic Hermite interpolation between `x1` and `x2` at fraction `t` in [0, 1).
///
/// `t == 0` returns `x1` exactly.
#[inline]
pub fn hermite(x0: f32, x1: f32, x2: f32, x3: f32, t: f32) -> f32 {
    let c1 = 0.5 * (x2 - x0);
    let c2 = x0 - 2.5 * x1 + 2.0 * x2 - 0.5 * x3;
    let c3 = 0.5 * (x3 - x0) + 1.5 * (x1 - x2);
    ((c3 * t + c2) * t + c1) * t + x1
}

/// Linear interpolation between `a` and `b`.
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hermite_hits_knots() {
        assert_eq!(hermite(0.3, -0.7, 0.2, 0.9, 0.0), -0.7);
        assert!((hermite(0.3, -0.7, 0.2, 0.9, 1.0) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn hermite_reproduces_lines() {
        for k in 0..10 {
            let t = k as f32 / 10.0;
            assert!((hermite(0.0, 1.0, 2.0, 3.0, t) - (1.0 + t)).abs() < 1e-6);
        }
    }

    #[test]
    fn lerp_midpoint() {
        assert_eq!(lerp(2.0, 4.0, 0.5), 3.0);
    }
}
