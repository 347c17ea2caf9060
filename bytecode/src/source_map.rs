//! Compact map from encoded byte offsets to source line/column.
//!
//! Each entry is three VLQ values relative to the previous entry:
//! - `delta_pc` (unsigned)
//! - `delta_line` (signed, zigzag)
//! - `delta_column` (signed, zigzag)
//!
//! Consecutive instructions on the same position share one entry.

/// A line/column pair, both 1-based. Zero means "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub const fn is_known(&self) -> bool {
        self.line != 0
    }
}

impl std::fmt::Display for SourcePos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Accumulates `(pc, position)` pairs in increasing pc order.
#[derive(Default)]
pub struct SourceMapBuilder {
    buf: Vec<u8>,
    prev_pc: u32,
    prev: Option<SourcePos>,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pc: u32, pos: SourcePos) {
        if self.prev == Some(pos) {
            return;
        }
        let prev = self.prev.unwrap_or_default();
        debug_assert!(pc >= self.prev_pc, "source map pcs must not decrease");
        write_vlq(pc - self.prev_pc, &mut self.buf);
        write_vlq(zigzag(pos.line as i64 - prev.line as i64), &mut self.buf);
        write_vlq(zigzag(pos.column as i64 - prev.column as i64), &mut self.buf);
        self.prev_pc = pc;
        self.prev = Some(pos);
    }

    pub fn finish(self) -> SourceMap {
        SourceMap { bytes: self.buf }
    }
}

/// The encoded map, one per compiled callable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    bytes: Vec<u8>,
}

impl SourceMap {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Position of the last entry with `pc <= target`.
    pub fn lookup(&self, target: u32) -> Option<SourcePos> {
        let mut pos = 0;
        let mut pc: u32 = 0;
        let mut line: i64 = 0;
        let mut column: i64 = 0;
        let mut best = None;

        while pos < self.bytes.len() {
            pc += read_vlq(&self.bytes, &mut pos)?;
            line += unzigzag(read_vlq(&self.bytes, &mut pos)?);
            column += unzigzag(read_vlq(&self.bytes, &mut pos)?);
            if pc > target {
                break;
            }
            best = Some(SourcePos::new(line as u32, column as u32));
        }

        best.filter(SourcePos::is_known)
    }
}

// ── VLQ helpers ─────────────────────────────────────────────────────

/// 7 data bits per byte, high bit set on every byte but the last.
fn write_vlq(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn read_vlq(bytes: &[u8], pos: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*pos)?;
        *pos += 1;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 35 {
            return None;
        }
    }
}

fn zigzag(value: i64) -> u32 {
    ((value << 1) ^ (value >> 63)) as u32
}

fn unzigzag(value: u32) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_map_has_no_positions() {
        let map = SourceMapBuilder::new().finish();
        assert!(map.as_bytes().is_empty());
        assert_eq!(map.lookup(0), None);
    }

    #[test]
    fn lookup_picks_last_entry_at_or_before_pc() {
        let mut builder = SourceMapBuilder::new();
        builder.add(0, SourcePos::new(1, 1));
        builder.add(3, SourcePos::new(2, 5));
        builder.add(9, SourcePos::new(1, 20));
        let map = builder.finish();

        assert_eq!(map.lookup(0), Some(SourcePos::new(1, 1)));
        assert_eq!(map.lookup(2), Some(SourcePos::new(1, 1)));
        assert_eq!(map.lookup(3), Some(SourcePos::new(2, 5)));
        assert_eq!(map.lookup(8), Some(SourcePos::new(2, 5)));
        assert_eq!(map.lookup(500), Some(SourcePos::new(1, 20)));
    }

    #[test]
    fn repeated_positions_share_an_entry() {
        let mut builder = SourceMapBuilder::new();
        for pc in 0..50 {
            builder.add(pc, SourcePos::new(7, 3));
        }
        let map = builder.finish();
        assert_eq!(map.as_bytes().len(), 3);
        assert_eq!(map.lookup(49), Some(SourcePos::new(7, 3)));
    }

    #[test]
    fn unknown_positions_are_hidden() {
        let mut builder = SourceMapBuilder::new();
        builder.add(0, SourcePos::default());
        builder.add(4, SourcePos::new(3, 1));
        let map = builder.finish();
        assert_eq!(map.lookup(1), None);
        assert_eq!(map.lookup(4), Some(SourcePos::new(3, 1)));
    }

    #[test]
    fn vlq_handles_multi_byte_values() {
        for value in [0, 127, 128, 16_384, u32::MAX >> 4] {
            let mut buf = Vec::new();
            write_vlq(value, &mut buf);
            let mut pos = 0;
            assert_eq!(read_vlq(&buf, &mut pos), Some(value));
            assert_eq!(pos, buf.len());
        }
    }
}
