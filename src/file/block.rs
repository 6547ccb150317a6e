use super::BLOCK_HEADER_SIZE;

/// Sentinel block number marking the end of a chain
pub const NO_BLOCK: i32 = -1;

// Every block starts with three little-endian i32 fields:
//   0  previous block in the owning chain, or -1
//   4  next block in the owning chain, or -1
//   8  record count (heap blocks) or key count (index nodes)
// Payload starts at byte 12.

fn read_i32(data: &[u8], at: usize) -> i32 {
    i32::from_le_bytes(data[at..at + 4].try_into().unwrap())
}

fn write_i32(data: &mut [u8], at: usize, value: i32) {
    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read-only view of a block's chain header and payload
pub struct BlockRef<'a> {
    data: &'a [u8],
}

impl<'a> BlockRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn prev(&self) -> i32 {
        read_i32(self.data, 0)
    }

    pub fn next(&self) -> i32 {
        read_i32(self.data, 4)
    }

    pub fn count(&self) -> i32 {
        read_i32(self.data, 8)
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.data[BLOCK_HEADER_SIZE..]
    }
}

/// Mutable view of a block's chain header and payload
pub struct BlockMut<'a> {
    data: &'a mut [u8],
}

impl<'a> BlockMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn prev(&self) -> i32 {
        read_i32(self.data, 0)
    }

    pub fn set_prev(&mut self, num: i32) {
        write_i32(self.data, 0, num);
    }

    pub fn next(&self) -> i32 {
        read_i32(self.data, 4)
    }

    pub fn set_next(&mut self, num: i32) {
        write_i32(self.data, 4, num);
    }

    pub fn count(&self) -> i32 {
        read_i32(self.data, 8)
    }

    pub fn set_count(&mut self, count: i32) {
        write_i32(self.data, 8, count);
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[BLOCK_HEADER_SIZE..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[BLOCK_HEADER_SIZE..]
    }

    /// Reset the header for a block entering a fresh chain position
    pub fn init(&mut self, prev: i32, next: i32, count: i32) {
        self.set_prev(prev);
        self.set_next(next);
        self.set_count(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::BLOCK_SIZE;

    #[test]
    fn test_header_fields() {
        let mut data = vec![0u8; BLOCK_SIZE];
        let mut block = BlockMut::new(&mut data);

        block.init(NO_BLOCK, 5, 3);
        assert_eq!(block.prev(), NO_BLOCK);
        assert_eq!(block.next(), 5);
        assert_eq!(block.count(), 3);

        block.set_prev(2);
        block.set_count(4);

        let view = BlockRef::new(&data);
        assert_eq!(view.prev(), 2);
        assert_eq!(view.next(), 5);
        assert_eq!(view.count(), 4);
    }

    #[test]
    fn test_header_is_little_endian() {
        let mut data = vec![0u8; BLOCK_SIZE];
        BlockMut::new(&mut data).init(-1, 0x0102_0304, 0);

        assert_eq!(&data[0..4], &(-1i32).to_le_bytes());
        assert_eq!(&data[4..8], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_payload_offset() {
        let mut data = vec![0u8; BLOCK_SIZE];
        let mut block = BlockMut::new(&mut data);
        block.payload_mut()[0] = 0xAA;

        assert_eq!(data[12], 0xAA);
        assert_eq!(BlockRef::new(&data).payload().len(), BLOCK_SIZE - 12);
    }
}
