//! Slot/byte offset arithmetic.
//!
//! A slot offset is a `u32` count of [`PADDING_UNIT`]-sized units from the
//! start of the container file. Multiplying by `PADDING_UNIT` gives the byte
//! offset a needle actually starts at. All externally visible positions in
//! this crate are slot offsets so they fit in 32 bits.

/// Size in bytes of the fixed file header at the start of every container.
pub const FILE_HEADER_BYTES: i64 = 8;

/// Every needle frame's length is rounded up to a multiple of this many bytes.
pub const PADDING_UNIT: i64 = 8;

/// Largest representable slot offset.
pub const MAX_SLOT: u32 = u32::MAX;

/// Slot offset of the first needle: the file header occupies slot 0.
pub const HEADER_SLOT_OFFSET: u32 = (FILE_HEADER_BYTES / PADDING_UNIT) as u32;

/// Convert a slot offset to the byte position it denotes.
pub fn slot_to_byte(slot: u32) -> i64 {
    slot as i64 * PADDING_UNIT
}

/// Convert a byte position back into a slot offset.
///
/// Callers must guarantee `byte` is a non-negative multiple of
/// [`PADDING_UNIT`] that fits in 32 bits once divided; this is always true
/// for byte positions this crate itself produces.
pub fn byte_to_slot(byte: i64) -> u32 {
    (byte / PADDING_UNIT) as u32
}

/// Round `len` up to the next multiple of [`PADDING_UNIT`].
pub fn round_up_to_padding(len: i64) -> i64 {
    let rem = len % PADDING_UNIT;
    if rem == 0 {
        len
    } else {
        len + (PADDING_UNIT - rem)
    }
}

/// Number of whole [`PADDING_UNIT`] slots a byte length occupies.
///
/// `framed_len` must already be a multiple of `PADDING_UNIT`.
pub fn framed_slots(framed_len: i64) -> u32 {
    (framed_len / PADDING_UNIT) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_byte_roundtrip() {
        for slot in [0u32, 1, 2, 1000, MAX_SLOT] {
            let byte = slot_to_byte(slot);
            assert_eq!(byte_to_slot(byte), slot);
        }
    }

    #[test]
    fn header_slot_offset_is_one() {
        assert_eq!(HEADER_SLOT_OFFSET, 1);
        assert_eq!(slot_to_byte(HEADER_SLOT_OFFSET), FILE_HEADER_BYTES);
    }

    #[test]
    fn round_up_is_noop_on_aligned_input() {
        assert_eq!(round_up_to_padding(0), 0);
        assert_eq!(round_up_to_padding(8), 8);
        assert_eq!(round_up_to_padding(16), 16);
    }

    #[test]
    fn round_up_pads_unaligned_input() {
        assert_eq!(round_up_to_padding(1), 8);
        assert_eq!(round_up_to_padding(7), 8);
        assert_eq!(round_up_to_padding(9), 16);
    }

    proptest::proptest! {
        #[test]
        fn round_up_always_aligned(len in 0i64..1_000_000) {
            let padded = round_up_to_padding(len);
            proptest::prop_assert_eq!(padded % PADDING_UNIT, 0);
            proptest::prop_assert!(padded >= len);
            proptest::prop_assert!(padded - len < PADDING_UNIT);
        }

        #[test]
        fn slot_to_byte_to_slot_identity(slot in 0u32..10_000_000) {
            proptest::prop_assert_eq!(byte_to_slot(slot_to_byte(slot)), slot);
        }
    }
}
