//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod scripted_server;
pub mod socket_guard;

/// Deterministic, non-repeating-looking body of `len` bytes.
pub fn patterned_body(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| {
            let byte = (i % 251) as u8;
            byte.wrapping_mul(31).wrapping_add(seed)
        })
        .collect()
}
