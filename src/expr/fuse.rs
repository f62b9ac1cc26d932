//! Operand fusion.
//!
//! Combining two expressions must not duplicate operand slots: an operand
//! already present in the left table (same underlying object) is reused,
//! and the right formula's references are rebased onto the merged table.

use crate::operand::Operand;

/// Merge `incoming` into `base` by object identity. Returns the slot map
/// (incoming slot -> merged slot) to rebase the incoming formula with.
pub(crate) fn merge_operands(base: &mut Vec<Operand>, incoming: &[Operand]) -> Vec<usize> {
    incoming
        .iter()
        .map(|op| match base.iter().position(|b| b.same_object(op)) {
            Some(slot) => slot,
            None => {
                base.push(op.clone());
                base.len() - 1
            }
        })
        .collect()
}

/// Append a single operand, deduplicating against the table. Returns its
/// slot.
pub(crate) fn intern_operand(base: &mut Vec<Operand>, op: Operand) -> usize {
    match base.iter().position(|b| b.same_object(&op)) {
        Some(slot) => slot,
        None => {
            base.push(op);
            base.len() - 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense::Dense;
    use crate::dtype::DType;
    use std::sync::Arc;

    #[test]
    fn test_merge_dedups_shared_objects() {
        let a = Arc::new(Dense::zeros(vec![2], DType::Float64));
        let b = Arc::new(Dense::zeros(vec![2], DType::Float64));

        let mut base = vec![Operand::Array(a.clone()), Operand::Array(b.clone())];
        // Incoming references b and a (in that order) plus a new array.
        let c = Arc::new(Dense::zeros(vec![2], DType::Float64));
        let incoming = vec![
            Operand::Array(b.clone()),
            Operand::Array(a.clone()),
            Operand::Array(c.clone()),
        ];
        let map = merge_operands(&mut base, &incoming);
        assert_eq!(map, vec![1, 0, 2]);
        assert_eq!(base.len(), 3);
    }

    #[test]
    fn test_equal_values_are_not_the_same_object() {
        let a = Arc::new(Dense::zeros(vec![2], DType::Float64));
        let b = Arc::new(Dense::zeros(vec![2], DType::Float64));
        let mut base = vec![Operand::Array(a)];
        let map = merge_operands(&mut base, &[Operand::Array(b)]);
        assert_eq!(map, vec![1]);
        assert_eq!(base.len(), 2);
    }
}
