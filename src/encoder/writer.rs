use std::io::{self, Write};

use tracing::debug;

use super::lzw::LzwEncoder;
use super::palette::IndexedFrame;
use crate::error::{Error, Result};

const SIGNATURE: &[u8; 6] = b"GIF89a";
const NETSCAPE: &[u8; 11] = b"NETSCAPE2.0";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
enum Block {
    Image = 0x2C,
    Extension = 0x21,
    Trailer = 0x3B,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
enum Extension {
    Control = 0xF9,
    Application = 0xFF,
}

/// Writer extension to write little endian data
trait WriteLe {
    fn write_u8(&mut self, n: u8) -> io::Result<()>;
    fn write_u16_le(&mut self, n: u16) -> io::Result<()>;
}

impl<W: Write + ?Sized> WriteLe for W {
    #[inline]
    fn write_u8(&mut self, n: u8) -> io::Result<()> {
        self.write_all(&[n])
    }

    #[inline]
    fn write_u16_le(&mut self, n: u16) -> io::Result<()> {
        self.write_all(&n.to_le_bytes())
    }
}

/// Looping behaviour stored in the NETSCAPE2.0 application extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// No extension is written, viewers play the animation once.
    Disabled,
    Infinite,
    Finite(u16),
}

impl Repeat {
    /// Maps a repeat count: negative disables looping, 0 loops forever.
    pub fn from_count(count: i32) -> Self {
        match count {
            c if c < 0 => Repeat::Disabled,
            0 => Repeat::Infinite,
            c => Repeat::Finite(c.min(u16::MAX as i32) as u16),
        }
    }

    fn loop_count(self) -> Option<u16> {
        match self {
            Repeat::Disabled => None,
            Repeat::Infinite => Some(0),
            Repeat::Finite(n) => Some(n),
        }
    }
}

/// Converts a frame delay to the container's hundredths of a second.
pub fn delay_centis(delay_ms: u32) -> u16 {
    ((delay_ms as u64 + 5) / 10).min(u16::MAX as u64) as u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    NotStarted,
    Writing,
    Finished,
}

/// GIF89a container writer.
///
/// The first frame's palette becomes the global color table, every later
/// frame carries its own local table.
pub struct GifWriter<W: Write> {
    w: Option<W>,
    state: WriterState,
    repeat: Repeat,
    delay: u16,
    screen: Option<(u16, u16)>,
    frames: usize,
}

impl<W: Write> GifWriter<W> {
    pub fn new(repeat: Repeat, delay_ms: u32) -> Self {
        Self {
            w: None,
            state: WriterState::NotStarted,
            repeat,
            delay: delay_centis(delay_ms),
            screen: None,
            frames: 0,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Begins a new file on `w`. A finished writer can be started again.
    pub fn start(&mut self, mut w: W) -> Result<()> {
        if self.state == WriterState::Writing {
            return Err(Error::InvalidState("a file is being written"));
        }
        w.write_all(SIGNATURE)?;
        self.w = Some(w);
        self.screen = None;
        self.frames = 0;
        self.state = WriterState::Writing;
        Ok(())
    }

    pub fn add_frame(&mut self, frame: &IndexedFrame) -> Result<()> {
        let w = match (self.state, self.w.as_mut()) {
            (WriterState::Writing, Some(w)) => w,
            (WriterState::Finished, _) => {
                return Err(Error::InvalidState("the writer is finished"))
            }
            _ => return Err(Error::InvalidState("the writer is not started")),
        };

        let pixels = frame.width as usize * frame.height as usize;
        if pixels == 0 || frame.indices.len() != pixels {
            return Err(Error::invalid_argument(format!(
                "frame of {}x{} has {} indices",
                frame.width,
                frame.height,
                frame.indices.len()
            )));
        }
        if frame.palette.is_empty() {
            return Err(Error::invalid_argument("frame has an empty palette"));
        }
        if let Some(&bad) = frame
            .indices
            .iter()
            .find(|&&i| i as usize >= frame.palette.len())
        {
            return Err(Error::invalid_argument(format!(
                "index {} outside palette of {} colors",
                bad,
                frame.palette.len()
            )));
        }

        let depth = frame.depth();
        let table = frame.palette.table_bytes();
        let first = match self.screen {
            None => {
                write_screen_descriptor(w, frame.width, frame.height, depth)?;
                w.write_all(&table)?;
                if let Some(count) = self.repeat.loop_count() {
                    write_netscape(w, count)?;
                }
                self.screen = Some((frame.width, frame.height));
                true
            }
            Some((width, height)) => {
                if (frame.width, frame.height) != (width, height) {
                    return Err(Error::invalid_argument(format!(
                        "frame is {}x{} but the animation is {}x{}",
                        frame.width, frame.height, width, height
                    )));
                }
                false
            }
        };

        write_control(w, self.delay)?;

        w.write_u8(Block::Image as u8)?;
        w.write_u16_le(0)?;
        w.write_u16_le(0)?;
        w.write_u16_le(frame.width)?;
        w.write_u16_le(frame.height)?;
        if first {
            w.write_u8(0)?;
        } else {
            w.write_u8(0b1000_0000 | (depth - 1))?;
            w.write_all(&table)?;
        }

        let mut lzw = LzwEncoder::new(depth);
        w.write_u8(lzw.min_code_size())?;
        lzw.encode(&frame.indices, w)?;

        self.frames += 1;
        debug!(frame = self.frames, colors = frame.palette.len(), "gif frame written");
        Ok(())
    }

    /// Writes the trailer and hands back the sink.
    pub fn finish(&mut self) -> Result<W> {
        if self.state != WriterState::Writing {
            return Err(Error::InvalidState("the writer is not writing"));
        }
        let mut w = self
            .w
            .take()
            .ok_or(Error::InvalidState("the writer has no output"))?;
        self.state = WriterState::Finished;
        w.write_u8(Block::Trailer as u8)?;
        w.flush()?;
        Ok(w)
    }
}

fn write_screen_descriptor<W: Write>(
    w: &mut W,
    width: u16,
    height: u16,
    depth: u8,
) -> io::Result<()> {
    w.write_u16_le(width)?;
    w.write_u16_le(height)?;
    // global table present, color resolution, table size
    w.write_u8(0b1000_0000 | ((depth - 1) << 4) | (depth - 1))?;
    w.write_u8(0)?; // background index
    w.write_u8(0) // pixel aspect ratio
}

fn write_netscape<W: Write>(w: &mut W, count: u16) -> io::Result<()> {
    w.write_u8(Block::Extension as u8)?;
    w.write_u8(Extension::Application as u8)?;
    w.write_u8(NETSCAPE.len() as u8)?;
    w.write_all(NETSCAPE)?;
    w.write_u8(3)?;
    w.write_u8(1)?;
    w.write_u16_le(count)?;
    w.write_u8(0)
}

fn write_control<W: Write>(w: &mut W, delay: u16) -> io::Result<()> {
    w.write_u8(Block::Extension as u8)?;
    w.write_u8(Extension::Control as u8)?;
    w.write_u8(4)?;
    w.write_u8(0)?; // no disposal, no user input, no transparency
    w.write_u16_le(delay)?;
    w.write_u8(0)?;
    w.write_u8(0)
}
