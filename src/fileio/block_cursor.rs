/// Logical byte position inside a file, split into block index and in-block byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCursor {
    pub(crate) block_size: usize,
    pub(crate) current_block: u64,
    pub(crate) current_byte: usize,
}

impl BlockCursor {
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size: block_size as usize,
            current_block: 0,
            current_byte: 0,
        }
    }

    pub fn set(&mut self, bytes: u64) -> u64 {
        self.current_block = bytes / self.block_size as u64;
        self.current_byte = (bytes % self.block_size as u64) as usize;
        self.position()
    }

    pub fn advance(&mut self, bytes: u64) -> u64 {
        self.set(self.position() + bytes)
    }

    /// Index of the block holding the cursor, counted from the start of the file
    pub fn block(&self) -> u64 {
        self.current_block
    }

    /// Offset of the cursor inside its block
    pub fn byte(&self) -> usize {
        self.current_byte
    }

    /// Bytes left before the cursor crosses into the next block
    pub fn remaining(&self) -> usize {
        self.block_size - self.current_byte
    }

    pub fn position(&self) -> u64 {
        self.current_block * self.block_size as u64 + self.current_byte as u64
    }
}
