//! Bit writer used to assemble RBSP payloads.
//!
//! Bits are written MSB first. The writer keeps an exact count of the bits
//! emitted so callers can report sizes of payloads that do not end on a byte
//! boundary.

#[derive(Default)]
pub struct BitWriter {
    data: Vec<u8>,
    current_byte: u8,
    bit_position: u8, // bits already placed into current_byte (0-7)
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            current_byte: 0,
            bit_position: 0,
        }
    }

    /// Write the low `num_bits` bits of `value` (at most 64).
    pub fn write_bits(&mut self, mut value: u64, mut num_bits: u8) {
        debug_assert!(num_bits <= 64);
        while num_bits > 0 {
            let space = 8 - self.bit_position;
            let take = space.min(num_bits);
            let shift = num_bits - take;
            let bits = ((value >> shift) & ((1u64 << take) - 1)) as u8;

            // A full byte cannot be shifted into a u8 in one step.
            self.current_byte = if take == 8 {
                bits
            } else {
                (self.current_byte << take) | bits
            };
            self.bit_position += take;
            num_bits -= take;
            value = if shift > 0 { value & ((1u64 << shift) - 1) } else { 0 };

            if self.bit_position == 8 {
                self.data.push(self.current_byte);
                self.current_byte = 0;
                self.bit_position = 0;
            }
        }
    }

    /// Write a one-bit flag.
    pub fn write_flag(&mut self, flag: bool) {
        self.write_bits(u64::from(flag), 1);
    }

    /// Unsigned Exp-Golomb code, ue(v).
    pub fn write_ue(&mut self, value: u32) {
        self.write_exp_golomb(u64::from(value));
    }

    /// Signed Exp-Golomb code, se(v).
    pub fn write_se(&mut self, value: i32) {
        let value = i64::from(value);
        let code = if value <= 0 { -2 * value } else { 2 * value - 1 };
        self.write_exp_golomb(code as u64);
    }

    // Codes derived from i32::MIN do not fit in u32.
    fn write_exp_golomb(&mut self, value: u64) {
        let code = value + 1;
        let num_bits = (64 - code.leading_zeros()) as u8;
        self.write_bits(0, num_bits - 1);
        self.write_bits(code, num_bits);
    }

    /// Total number of bits written so far.
    pub fn bits_written(&self) -> usize {
        self.data.len() * 8 + usize::from(self.bit_position)
    }

    /// Whether the next bit starts a new byte.
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_position == 0
    }

    /// `byte_alignment()`: a one bit followed by zero bits up to the byte boundary.
    pub fn byte_alignment(&mut self) {
        self.write_bits(1, 1);
        if self.bit_position != 0 {
            let pad = 8 - self.bit_position;
            self.write_bits(0, pad);
        }
    }

    /// `rbsp_trailing_bits()`: stop bit and zero padding.
    pub fn rbsp_trailing_bits(&mut self) {
        self.byte_alignment();
    }

    /// Append whole bytes; the writer must be byte aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.is_byte_aligned() {
            self.data.extend_from_slice(bytes);
        } else {
            for &byte in bytes {
                self.write_bits(u64::from(byte), 8);
            }
        }
    }

    /// Finish writing, returning the bytes and the number of zero bits used to
    /// pad the final byte.
    pub fn finish_with_padding(mut self) -> (Vec<u8>, u8) {
        let mut padding = 0;
        if self.bit_position != 0 {
            padding = 8 - self.bit_position;
            self.current_byte <<= padding;
            self.data.push(self.current_byte);
        }
        (self.data, padding)
    }

    pub fn finish(self) -> Vec<u8> {
        self.finish_with_padding().0
    }
}

/// Minimal MSB-first reader used by tests to parse emitted syntax back.
#[cfg(test)]
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

#[cfg(test)]
impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub(crate) fn read_bits(&mut self, n: u8) -> u64 {
        let mut value = 0u64;
        for _ in 0..n {
            let byte = self.data[self.position / 8];
            let bit = (byte >> (7 - (self.position % 8))) & 1;
            value = (value << 1) | u64::from(bit);
            self.position += 1;
        }
        value
    }

    pub(crate) fn read_flag(&mut self) -> bool {
        self.read_bits(1) == 1
    }

    fn read_exp_golomb(&mut self) -> u64 {
        let mut leading_zeros = 0u8;
        while !self.read_flag() {
            leading_zeros += 1;
        }
        let suffix = self.read_bits(leading_zeros);
        (1u64 << leading_zeros) - 1 + suffix
    }

    pub(crate) fn read_ue(&mut self) -> u32 {
        self.read_exp_golomb() as u32
    }

    pub(crate) fn read_se(&mut self) -> i32 {
        let code = self.read_exp_golomb() as i64;
        if code & 1 == 1 {
            ((code + 1) / 2) as i32
        } else {
            (-(code / 2)) as i32
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.position
    }
}
