//! Pointer-array helpers shared by the DBS codec and the attribute store.
//!
//! A pointer array `p` delimits runs of a data array: record `i` covers
//! `data[p[i]..p[i+1]]`, so `p` has one more element than there are
//! records.

use crate::{Error, Result};

/// Subtract the first element from every element; returns the subtracted
/// base. After rebasing, the slice is addressable on its own.
///
/// A slice that dips below its first element is left untouched and
/// rejected.
pub fn rebase(ptr: &mut [u64]) -> Result<u64> {
    let Some(&base) = ptr.first() else {
        return Ok(0);
    };
    if let Some(&low) = ptr.iter().find(|&&p| p < base) {
        return Err(Error::ContractViolation(format!(
            "pointer array drops to {low} below its base {base}"
        )));
    }
    for p in ptr.iter_mut() {
        *p -= base;
    }
    Ok(base)
}

pub fn is_non_decreasing(ptr: &[u64]) -> bool {
    ptr.windows(2).all(|w| w[0] <= w[1])
}

/// Exclusive prefix sum of run lengths, with the total as final element.
pub fn prefix_sum<I>(lengths: I) -> Vec<u64>
where
    I: IntoIterator<Item = usize>,
{
    let lengths = lengths.into_iter();
    let mut ptr = Vec::with_capacity(lengths.size_hint().0 + 1);
    let mut acc = 0u64;
    ptr.push(acc);
    for len in lengths {
        acc += len as u64;
        ptr.push(acc);
    }
    ptr
}

/// Check that `ptr` is a valid pointer array over `data_len` values.
pub fn check_pointer(name: &str, ptr: &[u64], data_len: usize) -> Result<()> {
    let (Some(&first), Some(&last)) = (ptr.first(), ptr.last()) else {
        return Err(Error::ContractViolation(format!("{name}: empty pointer array")));
    };
    if !is_non_decreasing(ptr) {
        return Err(Error::ContractViolation(format!(
            "{name}: pointer array is not non-decreasing"
        )));
    }
    if last - first != data_len as u64 {
        return Err(Error::ContractViolation(format!(
            "{name}: pointer array spans {} values but data has {data_len}",
            last - first
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebase_idempotent() {
        let mut p = vec![7, 9, 9, 15];
        assert_eq!(rebase(&mut p).unwrap(), 7);
        assert_eq!(p, vec![0, 2, 2, 8]);
        assert_eq!(rebase(&mut p).unwrap(), 0);
        assert_eq!(p, vec![0, 2, 2, 8]);
        assert_eq!(rebase(&mut []).unwrap(), 0);
    }

    #[test]
    fn test_rebase_rejects_drop_below_base() {
        let mut p = vec![5, 3];
        assert!(matches!(rebase(&mut p), Err(Error::ContractViolation(_))));
        assert_eq!(p, vec![5, 3]);
    }

    #[test]
    fn test_prefix_sum() {
        assert_eq!(prefix_sum([2, 0, 3]), vec![0, 2, 2, 5]);
        assert_eq!(prefix_sum(std::iter::empty()), vec![0]);
    }

    #[test]
    fn test_check_pointer() {
        assert!(check_pointer("p", &[0, 2, 5], 5).is_ok());
        assert!(check_pointer("p", &[3, 5, 8], 5).is_ok());
        assert!(check_pointer("p", &[0, 3, 2], 2).is_err());
        assert!(check_pointer("p", &[0, 2], 3).is_err());
        assert!(check_pointer("p", &[], 0).is_err());
    }
}
