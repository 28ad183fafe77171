//! Identifier allocation for rules and rulesets

use crate::error::RedirError;

/// Next free id for an order list: one more than the largest id present, `1` when empty.
///
/// The watermark is the order list itself, so an id is only reused once
/// every larger id has been deleted.
pub fn next_id(existing: &[u32]) -> Result<u32, RedirError> {
    match existing.iter().copied().max() {
        None => Ok(1),
        Some(max) => max.checked_add(1).ok_or(RedirError::IdSpaceExhausted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_id() {
        assert_eq!(next_id(&[]).unwrap(), 1);
        assert_eq!(next_id(&[1]).unwrap(), 2);
        assert_eq!(next_id(&[2, 7, 3]).unwrap(), 8);
        assert!(matches!(
            next_id(&[u32::MAX]),
            Err(RedirError::IdSpaceExhausted)
        ));
    }
}
