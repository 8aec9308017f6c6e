use arrayvec::ArrayVec;

/// Address, length and up to 255 bytes counted by the length field.
pub const MAX_FRAME_SIZE: usize = 2 + u8::MAX as usize;

/// Bounded store for one decoded frame, with a read cursor for walking the
/// commands it carries.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: ArrayVec<u8, MAX_FRAME_SIZE>,
    read_pos: usize,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer {
            data: ArrayVec::new(),
            read_pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Everything stored so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Stored bytes from the read cursor up to `end`.
    pub fn unread(&self, end: usize) -> &[u8] {
        let end = end.min(self.data.len());
        self.data.get(self.read_pos..end).unwrap_or(&[])
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.read_pos = pos;
    }

    pub fn consume(&mut self, len: usize) {
        self.read_pos += len;
    }

    /// Returns false, storing nothing, if the buffer is full.
    pub fn write(&mut self, byte: u8) -> bool {
        self.data.try_push(byte).is_ok()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_buffer() -> Buffer {
        let mut buf = Buffer::new();
        for byte in b"abcdabcdabcd" {
            assert!(buf.write(*byte));
        }
        buf
    }

    #[test]
    fn test_unread() {
        let mut buf = get_buffer();
        buf.seek(2);
        assert_eq!(buf.unread(6), b"cdab");
        buf.consume(3);
        assert_eq!(buf.unread(100), b"bcdabcd");
        buf.seek(20);
        assert_eq!(buf.unread(100), b"");
    }

    #[test]
    fn test_bounded() {
        let mut buf = Buffer::new();
        for _ in 0..MAX_FRAME_SIZE {
            assert!(buf.write(0));
        }
        assert!(!buf.write(0));
        assert_eq!(buf.len(), MAX_FRAME_SIZE);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.read_pos(), 0);
    }
}
