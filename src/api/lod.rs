//! Level-of-detail (LoD) reset for ragged batches.
//!
//! A LoD level is a list of offsets partitioning the first dimension of a
//! tensor into sequences: `[0, 2, 5]` over five rows means two sequences,
//! rows `0..2` and `2..5`. [`lod_reset`] replaces or extends that
//! partitioning on a copy of the input.

use crate::api::error::{AllocError, Result};

/// A dense host tensor with optional LoD levels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LodTensor {
    /// Raw element bytes.
    pub data: Vec<u8>,
    /// Shape; the first dimension is the one LoD offsets index.
    pub dims: Vec<usize>,
    /// LoD levels, outermost first.
    pub lod: Vec<Vec<usize>>,
}

impl LodTensor {
    /// A tensor without LoD.
    pub fn new(data: Vec<u8>, dims: Vec<usize>) -> Self {
        Self {
            data,
            dims,
            lod: Vec::new(),
        }
    }

    /// Builder pattern: attach LoD levels.
    pub fn with_lod(mut self, lod: Vec<Vec<usize>>) -> Self {
        self.lod = lod;
        self
    }

    /// Extent of the first dimension, 0 for a scalar.
    pub fn extent(&self) -> usize {
        self.dims.first().copied().unwrap_or(0)
    }
}

/// Target partitioning for [`lod_reset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetLod {
    /// Complete LoD taken from another tensor. Only the final offset is
    /// checked; the levels are otherwise used as given.
    Nested(Vec<Vec<usize>>),
    /// A single level of offsets.
    Flat(Vec<usize>),
}

/// Copy `input` and reset its LoD to `target`.
///
/// With a [`TargetLod::Flat`] target the level must have at least two
/// offsets, start at 0, end at the first-dimension extent and be strictly
/// increasing; `append` pushes it onto the existing LoD instead of replacing
/// it. A [`TargetLod::Nested`] target replaces the LoD wholesale and ignores
/// `append`.
///
/// # Errors
///
/// [`AllocError::InvalidArgument`] describing the first violated rule.
pub fn lod_reset(input: &LodTensor, target: &TargetLod, append: bool) -> Result<LodTensor> {
    let extent = input.extent();
    let mut output = input.clone();

    match target {
        TargetLod::Nested(levels) => {
            let last = levels.last().and_then(|level| level.last()).ok_or_else(|| {
                AllocError::InvalidArgument("the target LoD has no offsets".to_string())
            })?;
            if *last != extent {
                return Err(AllocError::InvalidArgument(format!(
                    "the last value of the target LoD's last level is {}, \
                     but the first dimension of the input is {}",
                    last, extent
                )));
            }
            output.lod = levels.clone();
        }
        TargetLod::Flat(offsets) => {
            validate_level(offsets, extent)?;
            if append {
                output.lod.push(offsets.clone());
            } else {
                output.lod = vec![offsets.clone()];
            }
        }
    }
    Ok(output)
}

fn validate_level(offsets: &[usize], extent: usize) -> Result<()> {
    let invalid = |message: String| Err(AllocError::InvalidArgument(message));

    if offsets.len() < 2 {
        return invalid(format!(
            "the target LoD needs more than one offset, got {}",
            offsets.len()
        ));
    }
    if offsets[0] != 0 {
        return invalid(format!("the target LoD must start from 0, got {:?}", offsets));
    }
    if offsets[offsets.len() - 1] != extent {
        return invalid(format!(
            "the target LoD {:?} must end at the first dimension of the input, {}",
            offsets, extent
        ));
    }
    if offsets.windows(2).any(|pair| pair[1] <= pair[0]) {
        return invalid(format!("the target LoD {:?} is not strictly increasing", offsets));
    }
    Ok(())
}

/// Gradient of [`lod_reset`]: the output gradient passes through unchanged.
pub fn lod_reset_grad(d_out: &LodTensor) -> LodTensor {
    d_out.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> LodTensor {
        LodTensor::new((0..20).collect(), vec![5, 4]).with_lod(vec![vec![0, 5]])
    }

    fn message(result: Result<LodTensor>) -> String {
        match result {
            Err(AllocError::InvalidArgument(message)) => message,
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }

    #[test]
    fn test_flat_replaces_lod() {
        let out = lod_reset(&input(), &TargetLod::Flat(vec![0, 2, 5]), false).unwrap();
        assert_eq!(out.lod, vec![vec![0, 2, 5]]);
        assert_eq!(out.data, input().data);
        assert_eq!(out.dims, vec![5, 4]);
    }

    #[test]
    fn test_flat_append() {
        let out = lod_reset(&input(), &TargetLod::Flat(vec![0, 2, 5]), true).unwrap();
        assert_eq!(out.lod, vec![vec![0, 5], vec![0, 2, 5]]);
    }

    #[test]
    fn test_flat_rejects_bad_offsets() {
        let cases = [
            (vec![5], "more than one offset"),
            (vec![1, 5], "start from 0"),
            (vec![0, 2, 4], "end at the first dimension"),
            (vec![0, 3, 2, 5], "strictly increasing"),
            (vec![0, 2, 2, 5], "strictly increasing"),
        ];
        for (offsets, expected) in cases {
            let err = message(lod_reset(&input(), &TargetLod::Flat(offsets.clone()), false));
            assert!(err.contains(expected), "{:?}: {}", offsets, err);
        }
    }

    #[test]
    fn test_nested_checks_only_last_value() {
        let levels = vec![vec![0, 1, 2], vec![0, 4, 3, 5]];
        let out = lod_reset(&input(), &TargetLod::Nested(levels.clone()), true).unwrap();
        assert_eq!(out.lod, levels);

        let err = message(lod_reset(&input(), &TargetLod::Nested(vec![vec![0, 4]]), false));
        assert!(err.contains("is 4"));

        assert!(lod_reset(&input(), &TargetLod::Nested(Vec::new()), false).is_err());
        assert!(lod_reset(&input(), &TargetLod::Nested(vec![Vec::new()]), false).is_err());
    }

    #[test]
    fn test_grad_is_a_copy() {
        let d_out = lod_reset(&input(), &TargetLod::Flat(vec![0, 5]), false).unwrap();
        assert_eq!(lod_reset_grad(&d_out), d_out);
    }
}
