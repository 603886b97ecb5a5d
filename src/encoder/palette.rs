use rgb::RGB8;

pub const MAX_COLORS: usize = 256;
pub const MIN_DEPTH: u8 = 2;

/// Color table for a single frame.
///
/// Holds at most 256 entries. `used` is set for every index that at least one
/// pixel was mapped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<RGB8>,
    used: Vec<bool>,
}

impl Palette {
    pub fn new(mut colors: Vec<RGB8>) -> Self {
        colors.truncate(MAX_COLORS);
        let used = vec![false; colors.len()];
        Self { colors, used }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[RGB8] {
        &self.colors
    }

    pub fn get(&self, index: u8) -> Option<RGB8> {
        self.colors.get(index as usize).copied()
    }

    pub fn mark_used(&mut self, index: u8) {
        if let Some(slot) = self.used.get_mut(index as usize) {
            *slot = true;
        }
    }

    pub fn is_used(&self, index: u8) -> bool {
        self.used.get(index as usize).copied().unwrap_or(false)
    }

    pub fn used_count(&self) -> usize {
        self.used.iter().filter(|&&u| u).count()
    }

    /// Bits per index, at least 2 since GIF LZW has no 1-bit code size.
    pub fn depth(&self) -> u8 {
        let mut depth = MIN_DEPTH;
        while (1usize << depth) < self.colors.len() {
            depth += 1;
        }
        depth
    }

    /// Number of entries the GIF color table declares for this palette.
    pub fn table_len(&self) -> usize {
        1 << self.depth()
    }

    /// Flat RGB bytes padded with black entries up to `table_len`.
    pub fn table_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.table_len() * 3);
        for c in &self.colors {
            bytes.extend_from_slice(&[c.r, c.g, c.b]);
        }
        bytes.resize(self.table_len() * 3, 0);
        bytes
    }
}

/// A frame reduced to palette indices, ready for the container writer.
#[derive(Debug, Clone)]
pub struct IndexedFrame {
    pub width: u16,
    pub height: u16,
    pub indices: Vec<u8>,
    pub palette: Palette,
}

impl IndexedFrame {
    pub fn depth(&self) -> u8 {
        self.palette.depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grey(n: usize) -> Vec<RGB8> {
        (0..n).map(|i| RGB8::new(i as u8, i as u8, i as u8)).collect()
    }

    #[test]
    fn test_depth_has_minimum_of_two() {
        assert_eq!(Palette::new(grey(1)).depth(), 2);
        assert_eq!(Palette::new(grey(4)).depth(), 2);
        assert_eq!(Palette::new(grey(5)).depth(), 3);
        assert_eq!(Palette::new(grey(129)).depth(), 8);
        assert_eq!(Palette::new(grey(256)).depth(), 8);
    }

    #[test]
    fn test_table_bytes_are_padded() {
        let palette = Palette::new(grey(3));
        let bytes = palette.table_bytes();
        assert_eq!(bytes.len(), 4 * 3);
        assert_eq!(&bytes[3..6], &[1, 1, 1]);
        assert_eq!(&bytes[9..], &[0, 0, 0]);
    }

    #[test]
    fn test_truncates_to_256_colors() {
        let colors: Vec<RGB8> = (0..300).map(|i| RGB8::new((i % 256) as u8, 0, 0)).collect();
        assert_eq!(Palette::new(colors).len(), MAX_COLORS);
    }

    #[test]
    fn test_used_markers() {
        let mut palette = Palette::new(grey(4));
        palette.mark_used(2);
        palette.mark_used(200);
        assert!(palette.is_used(2));
        assert!(!palette.is_used(0));
        assert_eq!(palette.used_count(), 1);
    }
}
