//! Adjacent-swap reordering of explicit order lists

/// Swap `id` with its predecessor. Returns `false` when `id` is absent or already first.
pub fn move_up<T: PartialEq>(order: &mut [T], id: &T) -> bool {
    match order.iter().position(|item| item == id) {
        Some(index) if index > 0 => {
            order.swap(index - 1, index);
            true
        }
        _ => false,
    }
}

/// Swap `id` with its successor. Returns `false` when `id` is absent or already last.
pub fn move_down<T: PartialEq>(order: &mut [T], id: &T) -> bool {
    match order.iter().position(|item| item == id) {
        Some(index) if index + 1 < order.len() => {
            order.swap(index, index + 1);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_up() {
        let mut order = vec![3, 2, 1];
        assert!(move_up(&mut order, &1));
        assert_eq!(order, vec![3, 1, 2]);

        assert!(!move_up(&mut order, &3));
        assert!(!move_up(&mut order, &9));
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn test_move_down() {
        let mut order = vec![3, 2, 1];
        assert!(move_down(&mut order, &3));
        assert_eq!(order, vec![2, 3, 1]);

        assert!(!move_down(&mut order, &1));
        assert!(!move_down(&mut order, &9));
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_swap_is_not_rotate() {
        let mut order = vec![1, 2, 3, 4];
        move_down(&mut order, &2);
        assert_eq!(order, vec![1, 3, 2, 4]);

        move_up(&mut order, &2);
        assert_eq!(order, vec![1, 2, 3, 4]);
    }
}
