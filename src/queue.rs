//! Elastic byte queue between USB reception (per frame) and the output pump (per buffer half).
//!
//! A plain ring of bytes. Writes and reads copy at most two contiguous slices, so that the queue can be
//! accessed from within short critical sections.

pub struct ElasticQueue<const N: usize> {
    bytes: [u8; N],
    /// Index of the oldest byte.
    head: usize,
    len: usize,
}

impl<const N: usize> Default for ElasticQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ElasticQueue<N> {
    pub const fn new() -> Self {
        Self {
            bytes: [0; N],
            head: 0,
            len: 0,
        }
    }

    /// Number of bytes available for reading.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bytes that can be written without loss.
    pub fn free(&self) -> usize {
        N - self.len
    }

    /// Drops all queued bytes.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Appends as much of `data` as fits. Returns the number of bytes written.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.free());
        if count == 0 {
            return 0;
        }

        let tail = (self.head + self.len) % N;
        let first = count.min(N - tail);

        self.bytes[tail..tail + first].copy_from_slice(&data[..first]);
        self.bytes[..count - first].copy_from_slice(&data[first..count]);
        self.len += count;

        count
    }

    /// Reads up to `out.len()` bytes without waiting. Returns the number of bytes read.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.len);
        if count == 0 {
            return 0;
        }

        let first = count.min(N - self.head);

        out[..first].copy_from_slice(&self.bytes[self.head..self.head + first]);
        out[first..count].copy_from_slice(&self.bytes[..count - first]);
        self.head = (self.head + count) % N;
        self.len -= count;

        count
    }

    /// Fills all of `out`, but only if enough bytes are queued.
    ///
    /// Returns `false` and leaves both the queue and `out` untouched otherwise.
    pub fn read_exact(&mut self, out: &mut [u8]) -> bool {
        if self.len < out.len() {
            return false;
        }

        self.read(out);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_is_limited_by_free_space() {
        let mut queue: ElasticQueue<8> = ElasticQueue::new();

        assert_eq!(queue.write(&[1, 2, 3, 4, 5]), 5);
        assert_eq!(queue.free(), 3);
        assert_eq!(queue.write(&[6, 7, 8, 9, 10]), 3);
        assert_eq!(queue.len(), 8);
        assert_eq!(queue.write(&[11]), 0);

        let mut out = [0u8; 8];
        assert_eq!(queue.read(&mut out), 8);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn read_returns_what_is_available() {
        let mut queue: ElasticQueue<16> = ElasticQueue::new();
        queue.write(&[0xAA, 0xBB, 0xCC]);

        let mut out = [0u8; 8];
        assert_eq!(queue.read(&mut out), 3);
        assert_eq!(&out[..3], &[0xAA, 0xBB, 0xCC]);
        assert!(queue.is_empty());
        assert_eq!(queue.read(&mut out), 0);
    }

    #[test]
    fn wraps_around_the_end() {
        let mut queue: ElasticQueue<6> = ElasticQueue::new();
        let mut out = [0u8; 4];

        for round in 0..10u8 {
            let data = [round, round + 1, round + 2, round + 3];
            assert_eq!(queue.write(&data), 4);
            assert_eq!(queue.read(&mut out), 4);
            assert_eq!(out, data);
        }
    }

    #[test]
    fn odd_sized_writes_split_across_the_end() {
        let mut queue: ElasticQueue<5> = ElasticQueue::new();
        let mut out = [0u8; 5];

        queue.write(&[1, 2, 3]);
        assert_eq!(queue.read(&mut out[..3]), 3);

        // Two bytes before the end, three after it.
        assert_eq!(queue.write(&[4, 5, 6, 7, 8]), 5);
        assert_eq!(queue.read(&mut out), 5);
        assert_eq!(out, [4, 5, 6, 7, 8]);
    }

    #[test]
    fn exact_reads_are_all_or_nothing() {
        let mut queue: ElasticQueue<16> = ElasticQueue::new();
        queue.write(&[0x34, 0x12, 0x78, 0x56, 0xFF]);

        let mut out = [0xEEu8; 6];
        assert!(!queue.read_exact(&mut out));
        assert_eq!(out, [0xEE; 6]);
        assert_eq!(queue.len(), 5);

        let mut out = [0u8; 4];
        assert!(queue.read_exact(&mut out));
        assert_eq!(out, [0x34, 0x12, 0x78, 0x56]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let mut queue: ElasticQueue<4> = ElasticQueue::new();
        queue.write(&[1, 2, 3]);
        queue.clear();

        assert!(queue.is_empty());
        assert_eq!(queue.free(), 4);
    }
}
