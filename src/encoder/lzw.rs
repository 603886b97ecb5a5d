//! GIF flavoured LZW.
//!
//! Codes are packed least significant bit first and chopped into data
//! sub-blocks of at most 255 bytes, each prefixed with its length and the run
//! terminated by an empty block.

use std::collections::HashMap;
use std::io::{self, Write};

use super::palette::MIN_DEPTH;

pub const MAX_CODE_WIDTH: u8 = 12;
pub const MAX_CODES: u16 = 1 << MAX_CODE_WIDTH;
const MAX_DEPTH: u8 = 8;
const MAX_BLOCK_LEN: usize = 0xFF;

/// Buffers bytes into length-prefixed data sub-blocks.
pub struct BlockWriter<'a, W: Write> {
    w: &'a mut W,
    len: usize,
    buf: [u8; MAX_BLOCK_LEN],
}

impl<'a, W: Write> BlockWriter<'a, W> {
    pub fn new(w: &'a mut W) -> Self {
        Self {
            w,
            len: 0,
            buf: [0; MAX_BLOCK_LEN],
        }
    }

    pub fn push(&mut self, byte: u8) -> io::Result<()> {
        self.buf[self.len] = byte;
        self.len += 1;
        if self.len == MAX_BLOCK_LEN {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> io::Result<()> {
        if self.len > 0 {
            self.w.write_all(&[self.len as u8])?;
            self.w.write_all(&self.buf[..self.len])?;
            self.len = 0;
        }
        Ok(())
    }

    /// Writes any pending bytes and the block terminator.
    pub fn finish(mut self) -> io::Result<()> {
        self.flush_block()?;
        self.w.write_all(&[0])
    }
}

struct BitPacker<'a, 'w, W: Write> {
    out: &'a mut BlockWriter<'w, W>,
    acc: u32,
    bits: u8,
}

impl<W: Write> BitPacker<'_, '_, W> {
    fn write_code(&mut self, code: u16, width: u8) -> io::Result<()> {
        self.acc |= (code as u32) << self.bits;
        self.bits += width;
        while self.bits >= 8 {
            self.out.push(self.acc as u8)?;
            self.acc >>= 8;
            self.bits -= 8;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.bits > 0 {
            self.out.push(self.acc as u8)?;
            self.acc = 0;
            self.bits = 0;
        }
        Ok(())
    }
}

/// LZW compressor for one image's index stream.
pub struct LzwEncoder {
    min_code_size: u8,
    table: HashMap<(u16, u8), u16>,
}

impl LzwEncoder {
    /// `depth` is the palette depth in bits and is clamped to `2..=8`.
    pub fn new(depth: u8) -> Self {
        Self {
            min_code_size: depth.clamp(MIN_DEPTH, MAX_DEPTH),
            table: HashMap::with_capacity(MAX_CODES as usize),
        }
    }

    pub fn min_code_size(&self) -> u8 {
        self.min_code_size
    }

    fn clear_code(&self) -> u16 {
        1 << self.min_code_size
    }

    /// Compresses `indices` into `w` as data sub-blocks, terminator included.
    ///
    /// Every index must be below `1 << min_code_size`.
    pub fn encode<W: Write>(&mut self, indices: &[u8], w: &mut W) -> io::Result<()> {
        let clear = self.clear_code();
        if let Some(&bad) = indices.iter().find(|&&i| i as u16 >= clear) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("index {} does not fit code size {}", bad, self.min_code_size),
            ));
        }

        let end = clear + 1;
        let initial_width = self.min_code_size + 1;

        let mut blocks = BlockWriter::new(w);
        let mut bits = BitPacker {
            out: &mut blocks,
            acc: 0,
            bits: 0,
        };

        self.table.clear();
        let mut next = clear + 2;
        let mut width = initial_width;
        bits.write_code(clear, width)?;

        let mut iter = indices.iter();
        let Some(&first) = iter.next() else {
            bits.write_code(end, width)?;
            bits.flush()?;
            return blocks.finish();
        };

        let mut prefix = first as u16;
        for &k in iter {
            if let Some(&code) = self.table.get(&(prefix, k)) {
                prefix = code;
                continue;
            }

            bits.write_code(prefix, width)?;
            if next < MAX_CODES {
                self.table.insert((prefix, k), next);
                next += 1;
                if next > (1 << width) && width < MAX_CODE_WIDTH {
                    width += 1;
                }
            } else {
                bits.write_code(clear, width)?;
                self.table.clear();
                next = clear + 2;
                width = initial_width;
            }
            prefix = k as u16;
        }

        bits.write_code(prefix, width)?;
        // The decoder adds one more entry after the last code, which may
        // bump the width before it reads the end code.
        if next == (1 << width) && width < MAX_CODE_WIDTH {
            width += 1;
        }
        bits.write_code(end, width)?;
        bits.flush()?;
        blocks.finish()
    }
}
