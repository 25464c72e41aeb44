//! XOR masking of frame payloads (RFC 6455 §5.3).
//!
//! Masking and unmasking are the same operation: byte `i` is XORed with
//! `key[i % 4]`.

/// Applies the 4-byte XOR mask to `buf` in place.
///
/// Small buffers take the byte-wise path; larger ones are processed in
/// aligned 64-bit blocks with the key rotated to match the block phase.
#[inline]
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    if buf.len() <= 32 {
        apply_mask_bytewise(buf, key);
    } else {
        apply_mask_words(buf, key);
    }
}

#[inline(always)]
fn apply_mask_bytewise(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

fn apply_mask_words(buf: &mut [u8], key: [u8; 4]) {
    let key32 = u32::from_ne_bytes(key);
    let key64 = (u64::from(key32) << 32) | u64::from(key32);

    // SAFETY: reinterpreting u8 as u64 is valid for any bit pattern, and
    // align_to_mut guarantees the middle slice is properly aligned.
    let (head, words, tail) = unsafe { buf.align_to_mut::<u64>() };

    apply_mask_bytewise(head, key);

    // The word blocks start head.len() bytes into the payload, so rotate the
    // repeated key to line up with that phase.
    let phase = (head.len() & 3) as u32;
    let key64 = if phase > 0 {
        if cfg!(target_endian = "big") {
            key64.rotate_left(8 * phase)
        } else {
            key64.rotate_right(8 * phase)
        }
    } else {
        key64
    };

    for word in words.iter_mut() {
        *word ^= key64;
    }

    // The tail keeps the same phase: word blocks are a multiple of 4 bytes.
    let k = key64.to_ne_bytes();
    apply_mask_bytewise(tail, [k[0], k[1], k[2], k[3]]);
}
