//! The Schnorr identification verification predicate (spec.md §4.7) and,
//! for tests only, the matching prover — so P1 (soundness round-trip) can be
//! exercised without hand-deriving `z` in every test case.

use num_bigint::BigUint;
use pauth_common::group::GroupParams;

/// `left = g^z mod p`, `right = (u_t * y^c) mod p`; accept iff they match.
///
/// Neither `z` nor `c` is reduced mod `q` before exponentiation — the
/// verifier always computes directly modulo `p`, per spec.md §4.7. The
/// prover is the one that reduces its exponents mod `q`.
pub fn verify(group: &GroupParams, u_t: &BigUint, c: &BigUint, z: &BigUint, y: &BigUint) -> bool {
    let left = group.pow_mod(&group.g, z);
    let right = (u_t * group.pow_mod(y, c)) % &group.p;
    left == right
}

/// Draw a value uniformly from `[0, bound)` using a cryptographic RNG, via
/// rejection sampling so the result is not biased toward the low end of the
/// range (a plain `sample mod bound` would skew small values whenever
/// `bound` does not evenly divide `2^bits`).
pub fn random_below(bound: &BigUint) -> BigUint {
    use num_traits::Zero;
    use rand::RngCore;

    if bound.is_zero() {
        return BigUint::from(0u8);
    }
    let byte_len = (bound.bits() as usize).div_ceil(8).max(1);
    let top_bit_mask = {
        let extra_bits = byte_len * 8 - bound.bits() as usize;
        0xFFu8 >> extra_bits
    };
    let mut rng = rand::rng();
    loop {
        let mut buf = vec![0u8; byte_len];
        rng.fill_bytes(&mut buf);
        buf[0] &= top_bit_mask;
        let candidate = BigUint::from_bytes_be(&buf);
        if &candidate < bound {
            return candidate;
        }
    }
}

/// Test-only prover: given `(p, q, g, alpha, alpha_t, c)`, compute the
/// commitment `u_t` and response `z` a real client would send.
#[cfg(test)]
pub fn prove(group: &GroupParams, alpha: &BigUint, alpha_t: &BigUint, c: &BigUint) -> (BigUint, BigUint) {
    let q = group.q();
    let u_t = group.pow_mod(&group.g, alpha_t);
    let z = (alpha_t + alpha * c) % &q;
    (u_t, z)
}
