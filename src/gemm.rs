use std::ops::Range as Ix;

use crate::range::Range;
use crate::{Result, TilarkError};

/// Transpose orientation of a GEMM operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlasOp {
    NoTrans,
    Trans,
    ConjTrans,
}

impl BlasOp {
    /// Whether the operand is used untransposed.
    pub fn is_no_trans(self) -> bool {
        matches!(self, BlasOp::NoTrans)
    }
}

/// Contraction metadata for a tensor GEMM.
///
/// Captures the ranks of the left/right/result operands and the transpose
/// orientation implied by the contraction pattern, and derives everything a
/// 2-D matrix multiply needs: which dimensions are contracted, the matrix
/// sizes `(m, n, k)`, and the result range. Constructed once per
/// contraction call, never persisted.
///
/// Dimension grouping: an untransposed left operand contracts its trailing
/// `contract_rank` dimensions; an untransposed right operand contracts its
/// leading ones. A transposed operand flips its grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmHelper {
    left_op: BlasOp,
    right_op: BlasOp,
    result_rank: usize,
    left_rank: usize,
    right_rank: usize,
}

impl GemmHelper {
    pub fn new(
        left_op: BlasOp,
        right_op: BlasOp,
        result_rank: usize,
        left_rank: usize,
        right_rank: usize,
    ) -> Result<Self> {
        let inner = left_rank + right_rank;
        if inner < result_rank || (inner - result_rank) % 2 != 0 {
            return Err(TilarkError::InvalidContraction(format!(
                "ranks left={left_rank} right={right_rank} result={result_rank} \
                 admit no contraction"
            )));
        }
        let k = (inner - result_rank) / 2;
        if k == 0 || k > left_rank || k > right_rank {
            return Err(TilarkError::InvalidContraction(format!(
                "contraction over {k} dimensions is inconsistent with ranks \
                 left={left_rank} right={right_rank}"
            )));
        }
        Ok(Self {
            left_op,
            right_op,
            result_rank,
            left_rank,
            right_rank,
        })
    }

    pub fn left_op(&self) -> BlasOp {
        self.left_op
    }

    pub fn right_op(&self) -> BlasOp {
        self.right_op
    }

    pub fn left_rank(&self) -> usize {
        self.left_rank
    }

    pub fn right_rank(&self) -> usize {
        self.right_rank
    }

    pub fn result_rank(&self) -> usize {
        self.result_rank
    }

    /// Number of contracted dimensions.
    pub fn contract_rank(&self) -> usize {
        (self.left_rank + self.right_rank - self.result_rank) / 2
    }

    fn left_inner(&self) -> Ix<usize> {
        let k = self.contract_rank();
        if self.left_op.is_no_trans() {
            self.left_rank - k..self.left_rank
        } else {
            0..k
        }
    }

    fn left_outer(&self) -> Ix<usize> {
        let k = self.contract_rank();
        if self.left_op.is_no_trans() {
            0..self.left_rank - k
        } else {
            k..self.left_rank
        }
    }

    fn right_inner(&self) -> Ix<usize> {
        let k = self.contract_rank();
        if self.right_op.is_no_trans() {
            0..k
        } else {
            self.right_rank - k..self.right_rank
        }
    }

    fn right_outer(&self) -> Ix<usize> {
        let k = self.contract_rank();
        if self.right_op.is_no_trans() {
            k..self.right_rank
        } else {
            0..self.right_rank - k
        }
    }

    /// Whether the contracted dimensions of `left` and `right` agree.
    ///
    /// `left` and `right` are full per-dimension value slices (lobound,
    /// upbound, or extent) of the respective operand ranges.
    pub fn left_right_congruent(&self, left: &[usize], right: &[usize]) -> bool {
        left[self.left_inner()]
            .iter()
            .zip(&right[self.right_inner()])
            .all(|(a, b)| a == b)
    }

    /// Whether the free dimensions of `left` match the leading dimensions
    /// of `result`.
    pub fn left_result_congruent(&self, left: &[usize], result: &[usize]) -> bool {
        left[self.left_outer()]
            .iter()
            .zip(result)
            .all(|(a, b)| a == b)
    }

    /// Whether the free dimensions of `right` match the trailing dimensions
    /// of `result`.
    pub fn right_result_congruent(&self, right: &[usize], result: &[usize]) -> bool {
        let skip = self.left_outer().len();
        right[self.right_outer()]
            .iter()
            .zip(&result[skip..])
            .all(|(a, b)| a == b)
    }

    /// Range of the contraction result: left free dimensions followed by
    /// right free dimensions.
    pub fn make_result_range(&self, left: &Range, right: &Range) -> Range {
        let mut lobound = Vec::with_capacity(self.result_rank);
        let mut upbound = Vec::with_capacity(self.result_rank);
        for d in self.left_outer() {
            lobound.push(left.lobound()[d]);
            upbound.push(left.upbound()[d]);
        }
        for d in self.right_outer() {
            lobound.push(right.lobound()[d]);
            upbound.push(right.upbound()[d]);
        }
        // bounds come from validated operand ranges
        Range::new(&lobound, &upbound).expect("result bounds from valid operand ranges")
    }

    /// Matrix sizes `(m, n, k)` of the equivalent 2-D multiply: `m` rows
    /// from the left free dimensions, `n` columns from the right free
    /// dimensions, `k` from the contracted dimensions.
    pub fn compute_matrix_sizes(&self, left: &Range, right: &Range) -> (usize, usize, usize) {
        let left_extent = left.extent();
        let right_extent = right.extent();
        let m = left_extent[self.left_outer()].iter().product();
        let n = right_extent[self.right_outer()].iter().product();
        let k = left_extent[self.left_inner()].iter().product();
        (m, n, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper(left_op: BlasOp, right_op: BlasOp, ranks: (usize, usize, usize)) -> GemmHelper {
        GemmHelper::new(left_op, right_op, ranks.0, ranks.1, ranks.2).unwrap()
    }

    #[test]
    fn test_rank_validation() {
        // (2 + 2 - 2) / 2 = 1 contracted rank over rank-2 operands: fine
        assert!(GemmHelper::new(BlasOp::NoTrans, BlasOp::NoTrans, 2, 2, 2).is_ok());
        // odd parity admits no contraction
        assert!(GemmHelper::new(BlasOp::NoTrans, BlasOp::NoTrans, 3, 2, 2).is_err());
        // zero contracted dimensions is not a contraction
        assert!(GemmHelper::new(BlasOp::NoTrans, BlasOp::NoTrans, 4, 2, 2).is_err());
        // result rank larger than combined operand ranks
        assert!(GemmHelper::new(BlasOp::NoTrans, BlasOp::NoTrans, 5, 2, 2).is_err());
    }

    #[test]
    fn test_matrix_sizes_no_trans() {
        // (2x3) . (3x4) -> (2x4)
        let h = helper(BlasOp::NoTrans, BlasOp::NoTrans, (2, 2, 2));
        assert_eq!(h.contract_rank(), 1);
        let left = Range::from_extents(&[2, 3]);
        let right = Range::from_extents(&[3, 4]);
        assert_eq!(h.compute_matrix_sizes(&left, &right), (2, 4, 3));

        let result = h.make_result_range(&left, &right);
        assert_eq!(result.extent().as_slice(), &[2, 4]);
        assert_eq!(result.rank(), 2);
    }

    #[test]
    fn test_matrix_sizes_transposed_left() {
        // left stored (3x2), used transposed: contracted dimension leads
        let h = helper(BlasOp::Trans, BlasOp::NoTrans, (2, 2, 2));
        let left = Range::from_extents(&[3, 2]);
        let right = Range::from_extents(&[3, 4]);
        assert_eq!(h.compute_matrix_sizes(&left, &right), (2, 4, 3));
        assert_eq!(
            h.make_result_range(&left, &right).extent().as_slice(),
            &[2, 4]
        );
    }

    #[test]
    fn test_higher_rank_contraction() {
        // [2,3,4] . [4,5,6] contracting one dimension -> [2,3,5,6]
        let h = helper(BlasOp::NoTrans, BlasOp::NoTrans, (4, 3, 3));
        assert_eq!(h.contract_rank(), 1);
        let left = Range::from_extents(&[2, 3, 4]);
        let right = Range::from_extents(&[4, 5, 6]);
        assert_eq!(h.compute_matrix_sizes(&left, &right), (6, 30, 4));
        assert_eq!(
            h.make_result_range(&left, &right).extent().as_slice(),
            &[2, 3, 5, 6]
        );
    }

    #[test]
    fn test_left_right_congruence() {
        let h = helper(BlasOp::NoTrans, BlasOp::NoTrans, (2, 2, 2));
        let left = Range::from_extents(&[2, 3]);
        let good = Range::from_extents(&[3, 4]);
        let bad = Range::from_extents(&[5, 4]);
        assert!(h.left_right_congruent(&left.extent(), &good.extent()));
        assert!(!h.left_right_congruent(&left.extent(), &bad.extent()));
    }

    #[test]
    fn test_result_congruence() {
        let h = helper(BlasOp::NoTrans, BlasOp::NoTrans, (2, 2, 2));
        let left = Range::from_extents(&[2, 3]);
        let right = Range::from_extents(&[3, 4]);
        let result = h.make_result_range(&left, &right);
        assert!(h.left_result_congruent(&left.extent(), &result.extent()));
        assert!(h.right_result_congruent(&right.extent(), &result.extent()));

        let wrong = Range::from_extents(&[4, 4]);
        assert!(!h.left_result_congruent(&left.extent(), &wrong.extent()));
    }

    #[test]
    fn test_result_range_preserves_bounds() {
        let h = helper(BlasOp::NoTrans, BlasOp::NoTrans, (2, 2, 2));
        let left = Range::new(&[10, 0], &[12, 3]).unwrap();
        let right = Range::new(&[0, 20], &[3, 24]).unwrap();
        let result = h.make_result_range(&left, &right);
        assert_eq!(result.lobound(), &[10, 20]);
        assert_eq!(result.upbound(), &[12, 24]);
    }
}
