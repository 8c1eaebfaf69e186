use crate::error::DecodeError;

/// Longest possible encoding of a u64 varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Base-128 varint, least significant group first.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VarInt(pub u64);

impl VarInt {
    pub fn write(self, buf: &mut Vec<u8>) {
        let mut v = self.0;
        while v >= 0x80 {
            buf.push((v as u8) | 0x80);
            v >>= 7;
        }
        buf.push(v as u8);
    }

    /// Read a varint from the front of `buf`, advancing it past the consumed bytes.
    pub fn read(buf: &mut &[u8]) -> Result<VarInt, DecodeError> {
        let mut v: u64 = 0;
        for (i, byte) in buf.iter().enumerate() {
            if i == MAX_VARINT_LEN - 1 && *byte > 1 {
                return Err(DecodeError::malformed("varint larger than a u64"));
            }
            v |= ((byte & 0x7F) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                *buf = &buf[i + 1..];
                return Ok(VarInt(v));
            }
        }
        Err(DecodeError::malformed(format!(
            "varint truncated after {} bytes",
            buf.len()
        )))
    }

    pub fn encoded_len(self) -> usize {
        let bits = 64 - (self.0 | 1).leading_zeros() as usize;
        (bits + 6) / 7
    }
}

pub fn zigzag_encode32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

pub fn zigzag_decode32(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

pub fn zigzag_encode64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

pub fn zigzag_decode64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}
