//! Named modular-exponentiation groups for the Schnorr identification protocol.
//!
//! Each group fixes a safe prime `p` (so that `q = (p - 1) / 2` is itself
//! prime) and a generator `g` of the order-`q` subgroup. `q` is always
//! derived from `p`, never stored, so there is exactly one source of truth.

use num_bigint::BigUint;
use num_traits::One;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A named Schnorr group: `p`, `g`, with `q = (p - 1) / 2` derived on demand.
#[derive(Debug, Clone)]
pub struct GroupParams {
    pub id: &'static str,
    pub p: BigUint,
    pub g: BigUint,
}

impl GroupParams {
    /// The order of the subgroup generated by `g`.
    pub fn q(&self) -> BigUint {
        (&self.p - BigUint::one()) / BigUint::from(2u8)
    }

    /// `g^exp mod p`.
    pub fn pow_mod(&self, base: &BigUint, exp: &BigUint) -> BigUint {
        base.modpow(exp, &self.p)
    }
}

/// RFC 3526 group 5 (MODP-1536), g = 2. The only group this server should
/// actually be deployed with — 1536 bits is the minimum the RFC still
/// recommends, and `g = 2` matches every known client implementation of
/// this protocol.
fn modp_1536() -> GroupParams {
    let p = BigUint::parse_bytes(
        concat!(
            "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
            "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
            "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
            "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
            "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
            "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
            "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
            "670C354E4ABC9804F1746C08CA237327FFFFFFFFFFFFFFFF",
        )
        .as_bytes(),
        16,
    )
    .expect("MODP-1536 prime literal is well-formed hex");

    GroupParams {
        id: "modp-1536",
        p,
        g: BigUint::from(2u8),
    }
}

/// A tiny toy group (p=23, g=2, q=11) used only in tests, where the whole
/// computation needs to be checkable by hand. Never select this for a real
/// deployment — 23 is trivially factorable.
fn mymod() -> GroupParams {
    GroupParams {
        id: "mymod",
        p: BigUint::from(23u8),
        g: BigUint::from(2u8),
    }
}

fn registry() -> &'static HashMap<&'static str, GroupParams> {
    static REGISTRY: OnceLock<HashMap<&'static str, GroupParams>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        for group in [modp_1536(), mymod()] {
            map.insert(group.id, group);
        }
        map
    })
}

/// Look up a named group, if the server knows it.
pub fn lookup(group_id: &str) -> Option<&'static GroupParams> {
    registry().get(group_id)
}
