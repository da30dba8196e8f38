//! ブレークポイント管理

/// 行番号の集合（ビットベクタ）
///
/// 容量はデバッガ起動時のスクリプトの行数で固定され、後から変わることはありません。
/// 範囲外の添字はプログラムの誤りとして扱い、パニックします。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointSet {
    bits: Vec<u8>,
    len: usize,
}

impl BreakpointSet {
    /// `len` 行分の空の集合を作成する
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// 容量（行数）を取得する
    pub fn len(&self) -> usize {
        self.len
    }

    /// 容量が 0 か
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 0始まりの行 `index` にブレークポイントを設定する
    pub fn set(&mut self, index: usize) {
        let (byte, mask) = self.locate(index);
        self.bits[byte] |= mask;
    }

    /// 0始まりの行 `index` のブレークポイントを解除する
    pub fn clear(&mut self, index: usize) {
        let (byte, mask) = self.locate(index);
        self.bits[byte] &= !mask;
    }

    /// 0始まりの行 `index` にブレークポイントがあるか
    pub fn test(&self, index: usize) -> bool {
        let (byte, mask) = self.locate(index);
        self.bits[byte] & mask != 0
    }

    /// 設定されている行（0始まり）を昇順に列挙する
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|&i| self.test(i))
    }

    fn locate(&self, index: usize) -> (usize, u8) {
        assert!(
            index < self.len,
            "breakpoint index {} out of range (len {})",
            index,
            self.len
        );
        (index / 8, 1 << (index % 8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_set_is_clear() {
        let set = BreakpointSet::new(21);
        assert_eq!(set.len(), 21);
        assert!((0..21).all(|i| !set.test(i)));
    }

    #[test]
    fn test_set_and_clear_touch_one_bit() {
        let len = 21;
        for i in 0..len {
            let mut set = BreakpointSet::new(len);
            set.set(i);
            for j in 0..len {
                assert_eq!(set.test(j), i == j, "after set({}), test({})", i, j);
            }
            set.clear(i);
            assert!((0..len).all(|j| !set.test(j)), "after clear({})", i);
        }
    }

    #[test]
    fn test_clear_keeps_other_bits() {
        let mut set = BreakpointSet::new(16);
        set.set(3);
        set.set(8);
        set.set(9);
        set.clear(8);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 9]);
    }

    #[test]
    fn test_empty_set() {
        let set = BreakpointSet::new(0);
        assert!(set.is_empty());
        assert_eq!(set.iter().count(), 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_panics() {
        let mut set = BreakpointSet::new(8);
        set.set(8);
    }
}
