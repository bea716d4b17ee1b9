//! Threshold crossing interpolation along cell edges

use crate::Real;

/// Interpolated coordinate of the threshold crossing on an edge
///
/// `v0`/`v1` are the corner samples at the `lo`/`hi` end points of the edge.
/// Case-bit selection guarantees that the threshold lies strictly between the
/// two samples; the clamp absorbs degenerate equalities handed down from
/// upstream stages.
#[inline(always)]
pub fn edge_crossing<R: Real>(v0: u8, v1: u8, lo: R, hi: R, threshold: R) -> R {
    let v0 = R::from_u8_sample(v0);
    let v1 = R::from_u8_sample(v1);
    let value = lo + (hi - lo) * (threshold - v0) / (v1 - v0);
    value.max(lo).min(hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossing_midpoint() {
        assert_eq!(edge_crossing(0, 255, 0.0, 1.0, 127.5), 0.5);
        assert_eq!(edge_crossing(255, 0, 0.0, 1.0, 127.5), 0.5);
    }

    #[test]
    fn test_crossing_asymmetric() {
        let x = edge_crossing::<f64>(200, 0, 0.0, 1.0, 127.5);
        assert!((x - (1.0 - 127.5 / 200.0)).abs() < 1e-12);
        let x = edge_crossing::<f64>(0, 200, 2.0, 4.0, 127.5);
        assert!((x - (2.0 + 2.0 * 127.5 / 200.0)).abs() < 1e-12);
    }

    #[test]
    fn test_crossing_clamped_to_edge() {
        // Threshold outside the sample range only occurs for degenerate
        // upstream input; the result must stay on the edge.
        assert_eq!(edge_crossing(100, 110, 0.0, 1.0, 127.5), 1.0);
        assert_eq!(edge_crossing(110, 100, 0.0, 1.0, 127.5), 0.0);
    }
}
