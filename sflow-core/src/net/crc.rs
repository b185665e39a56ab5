//! CRC-32/ISO-HDLC over payload bytes: polynomial 0xEDB88320 (reflected
//! form of 0x04C11DB7), initial value 0xFFFFFFFF, final XOR 0xFFFFFFFF,
//! reflected input and output. Empty input yields 0.

/// Computes the CRC-32 of `bytes`.
#[inline]
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn known_vector_from_scenario_a() {
        let payload: Vec<u8> = (0..32u8).collect();
        assert_eq!(crc32(&payload), 0x9126_7E8A);
    }

    #[test]
    fn single_bit_flip_changes_crc() {
        let payload = [0xAAu8; 16];
        let original = crc32(&payload);

        let mut flipped = payload;
        flipped[3] ^= 0x01;

        assert_ne!(original, crc32(&flipped));
    }
}
