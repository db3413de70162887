//! Byte buffer with a read cursor.

/// Growable byte buffer consumed from the front.
///
/// Consumed bytes are compacted away lazily, once they make up at least
/// half of the allocation.
#[derive(Debug, Default)]
pub struct NetBuffer {
    data: Vec<u8>,
    read_pos: usize,
}

impl NetBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconsumed bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// True if nothing is left to consume.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unconsumed bytes as a slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }

    /// Appends bytes at the end.
    pub fn append(&mut self, bytes: &[u8]) {
        self.compact();
        self.data.extend_from_slice(bytes);
    }

    /// Marks `count` bytes as consumed.
    pub fn consume(&mut self, count: usize) {
        self.read_pos = (self.read_pos + count).min(self.data.len());
        if self.read_pos == self.data.len() {
            self.data.clear();
            self.read_pos = 0;
        }
    }

    /// Removes and returns up to `max` bytes from the front.
    pub fn take(&mut self, max: usize) -> Vec<u8> {
        let count = self.len().min(max);
        let out = self.as_slice()[..count].to_vec();
        self.consume(count);
        out
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    fn compact(&mut self) {
        if self.read_pos > 0 && self.read_pos * 2 >= self.data.len() {
            self.data.drain(..self.read_pos);
            self.read_pos = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_consume_take() {
        let mut buf = NetBuffer::new();
        buf.append(b"hello world");
        buf.consume(6);
        assert_eq!(buf.as_slice(), b"world");
        buf.append(b"!");
        assert_eq!(buf.take(3), b"wor");
        assert_eq!(buf.take(100), b"ld!");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_consume_past_end_clamps() {
        let mut buf = NetBuffer::new();
        buf.append(b"abc");
        buf.consume(10);
        assert!(buf.is_empty());
        buf.append(b"d");
        assert_eq!(buf.as_slice(), b"d");
    }
}
