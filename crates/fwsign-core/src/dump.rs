//! Text rendering of fragment trees for objdump

use std::fmt::Write;

use crate::error::Result;
use crate::fragment::{word_at, Fragment, Layout, Leaf};
use crate::magic;

/// Words printed per hex line
pub const WORDS_PER_LINE: usize = 4;

/// Words printed per leaf before the dump is cut short
pub const DEFAULT_WORD_LIMIT: usize = 32;

/// Bounded word-by-word hex dump; words are read little-endian
pub fn hex_words(bytes: &[u8], base: usize, word_limit: usize, indent: usize) -> String {
    let mut out = String::new();
    let pad = " ".repeat(indent);
    let shown = bytes.len().min(word_limit * 4);

    for (line, chunk) in bytes[..shown].chunks(WORDS_PER_LINE * 4).enumerate() {
        let _ = write!(out, "{pad}{:08x}:", base + line * WORDS_PER_LINE * 4);
        for word in chunk.chunks(4) {
            if word.len() == 4 {
                let _ = write!(out, " {:08x}", word_at(word, 0));
            } else {
                // partial tail word, byte by byte
                out.push(' ');
                for b in word {
                    let _ = write!(out, "{b:02x}");
                }
            }
        }
        out.push('\n');
    }
    if shown < bytes.len() {
        let _ = writeln!(out, "{pad}... {} more bytes", bytes.len() - shown);
    }
    out
}

/// Indented outline of a fragment tree
#[derive(Debug)]
pub struct Outline {
    out: String,
    word_limit: usize,
}

impl Default for Outline {
    fn default() -> Self {
        Self::new(DEFAULT_WORD_LIMIT)
    }
}

impl Outline {
    pub fn new(word_limit: usize) -> Self {
        Self {
            out: String::new(),
            word_limit,
        }
    }

    /// Free-form heading line
    pub fn heading(&mut self, depth: usize, text: &str) {
        let _ = writeln!(self.out, "{}{text}", "  ".repeat(depth));
    }

    /// `name: value` line
    pub fn field(&mut self, depth: usize, name: &str, value: impl std::fmt::Display) {
        let _ = writeln!(self.out, "{}{name}: {value}", "  ".repeat(depth));
    }

    /// Render a leaf at absolute offset `base`
    pub fn leaf(&mut self, leaf: &Leaf, base: usize, depth: usize) {
        let raw = leaf.raw();
        let _ = write!(
            self.out,
            "{}{} @0x{base:04x} size 0x{:x}",
            "  ".repeat(depth),
            leaf.name(),
            raw.len()
        );
        for slot in leaf.magics() {
            if slot.offset + 4 <= raw.len() {
                let _ = write!(
                    self.out,
                    " [{}]",
                    magic::describe(word_at(raw, slot.offset))
                );
            }
        }
        self.out.push('\n');
        self.out
            .push_str(&hex_words(raw, base, self.word_limit, 2 * depth + 2));
    }

    /// Render a fragment tree at absolute offset `base`
    pub fn fragment(&mut self, fragment: &Fragment, base: usize, depth: usize) -> Result<()> {
        match fragment {
            Fragment::Leaf(leaf) => self.leaf(leaf, base, depth),
            Fragment::Collection(c) => {
                let _ = writeln!(
                    self.out,
                    "{}{} @0x{base:04x} size 0x{:x}",
                    "  ".repeat(depth),
                    c.name(),
                    c.size()?
                );
                for (child, (offset, size)) in c.children().iter().zip(c.child_spans()?) {
                    match child {
                        Fragment::Padding(p) => {
                            let _ = writeln!(
                                self.out,
                                "{}padding @0x{:04x} size 0x{size:x} fill 0x{:02x}",
                                "  ".repeat(depth + 1),
                                base + offset,
                                p.fill()
                            );
                        }
                        other => self.fragment(other, base + offset, depth + 1)?,
                    }
                }
            }
            Fragment::Padding(p) => {
                let _ = writeln!(
                    self.out,
                    "{}padding @0x{base:04x} size 0x{:x}",
                    "  ".repeat(depth),
                    p.size()?
                );
            }
        }
        Ok(())
    }

    pub fn finish(self) -> String {
        self.out
    }
}
