//! MS-CHAP v1 and v2 for the point-to-point link layer.
//!
//! Both exchanges ride on CHAP framing: the authenticator sends a
//! length-prefixed random challenge, the peer answers with a fixed-size
//! response block, and the authenticator replies with a textual verdict.
//! For v2 the verdict also proves knowledge of the secret back to the peer
//! (`"S=<40 hex>"`), which the peer checks with [`check_success2`].
//!
//! The response block layout is shared by both versions: 49 octets, the
//! last being a flags octet. v1 carries an optional LAN Manager response in
//! the first 24 octets and the NT response in the next 24; v2 carries the
//! 16-octet peer challenge, 8 reserved octets and the NT response.
//!
//! Key material for Microsoft Point-to-Point Encryption falls out of the
//! same computation and is derived here as well (RFC 3079).
//!
//! Response comparisons are constant time. Secrets are taken as `&str` and
//! hashed as their little-endian UTF-16 encoding, 256 code units at most.
use alloc::string::String;
use core::fmt::Write;

use des::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use des::Des;
use md4::{Digest, Md4};
use rand_core::{CryptoRng, RngCore};
use sha1::Sha1;
use subtle::ConstantTimeEq;

/// Length of a v1 challenge.
pub const CHALLENGE_LEN: usize = 8;

/// Length of a v2 challenge and of the peer challenge.
pub const CHALLENGE2_LEN: usize = 16;

/// Length of the response block of either version.
pub const RESPONSE_LEN: usize = 49;

/// Length of the v2 authenticator response, in hex digits.
pub const AUTH_RESPONSE_LEN: usize = 40;

/// Longest secret, in UTF-16 code units.
pub const MAX_NT_PASSWORD: usize = 256;

/// Offsets inside the 49-octet response block.
mod layout {
    /// v1: LAN Manager response.
    pub(super) const LANMAN_RESP: usize = 0;
    /// v2: the peer challenge (16 octets, then 8 reserved).
    pub(super) const PEER_CHALLENGE: usize = 0;
    /// NT response, both versions.
    pub(super) const NT_RESP: usize = 24;
    /// Flags octet: v1 "use NT response", v2 reserved.
    pub(super) const FLAGS: usize = 48;
}

const LANMAN_MAGIC: &[u8; 8] = b"KGS!@#$%";

/// RFC 2759 magic constants of the authenticator response.
const AUTHENTICATOR_MAGIC1: &[u8; 39] = b"Magic server to client signing constant";
const AUTHENTICATOR_MAGIC2: &[u8; 41] = b"Pad to make it do more than one iteration";

/// RFC 3079 magic constants of the MPPE key derivation.
const MPPE_MASTER_KEY_MAGIC: &[u8; 27] = b"This is the MPPE Master Key";
const MPPE_CLIENT_SEND_MAGIC: &[u8; 84] =
    b"On the client side, this is the send key; on the server side, it is the receive key.";
const MPPE_SERVER_SEND_MAGIC: &[u8; 84] =
    b"On the client side, this is the receive key; on the server side, it is the send key.";
const SHA1_PAD1: [u8; 40] = [0x00; 40];
const SHA1_PAD2: [u8; 40] = [0xf2; 40];

/// One direction pair of MPPE session keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MppeKeys {
    /// Key for traffic we send.
    pub send: [u8; 16],
    /// Key for traffic we receive.
    pub recv: [u8; 16],
}

/// Generate a v1 challenge: the length octet followed by 8 random octets.
pub fn generate_challenge<R: RngCore + CryptoRng>(
    rng: &mut R,
    challenge: &mut [u8; CHALLENGE_LEN + 1],
) {
    challenge[0] = CHALLENGE_LEN as u8;
    rng.fill_bytes(&mut challenge[1..]);
}

/// Generate a v2 challenge: the length octet followed by 16 random octets.
pub fn generate_challenge2<R: RngCore + CryptoRng>(
    rng: &mut R,
    challenge: &mut [u8; CHALLENGE2_LEN + 1],
) {
    challenge[0] = CHALLENGE2_LEN as u8;
    rng.fill_bytes(&mut challenge[1..]);
}

/// MD4 over the UTF-16LE encoding of the secret.
pub fn nt_password_hash(secret: &str) -> [u8; 16] {
    let mut hasher = Md4::new();
    for unit in secret.encode_utf16().take(MAX_NT_PASSWORD) {
        hasher.update(unit.to_le_bytes());
    }
    hasher.finalize().into()
}

fn password_hash_hash(secret: &str) -> [u8; 16] {
    md4(&nt_password_hash(secret))
}

fn md4(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md4::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn sha1(parts: &[&[u8]]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Spread 56 key bits over 8 octets, leaving the low bit of each octet
/// for (odd) parity as DES expects.
fn expand_des_key(key: &[u8]) -> [u8; 8] {
    debug_assert!(key.len() >= 7);
    let mut out = [0u8; 8];
    for (i, slot) in out.iter_mut().enumerate() {
        let bit = i * 7;
        let word = (key[bit / 8] as u16) << 8
            | if bit / 8 + 1 < key.len() { key[bit / 8 + 1] as u16 } else { 0 };
        let seven = ((word >> (15 - (bit % 8) - 7)) & 0xfe) as u8;
        // Odd parity in the low bit; DES itself ignores it.
        *slot = seven | (seven.count_ones() as u8 + 1) % 2;
    }
    out
}

fn des_encrypt(key7: &[u8], block: &[u8; 8]) -> [u8; 8] {
    let key = expand_des_key(key7);
    let cipher = Des::new(GenericArray::from_slice(&key));
    let mut data = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut data);
    data.into()
}

/// The classic challenge response: the hash zero-padded to 21 octets,
/// split into three 7-octet DES keys, each encrypting the challenge.
pub fn challenge_response(challenge: &[u8; 8], password_hash: &[u8; 16]) -> [u8; 24] {
    let mut z_hash = [0u8; 21];
    z_hash[..16].copy_from_slice(password_hash);

    let mut response = [0u8; 24];
    for i in 0..3 {
        let block = des_encrypt(&z_hash[i * 7..i * 7 + 7], challenge);
        response[i * 8..i * 8 + 8].copy_from_slice(&block);
    }
    response
}

/// The LAN Manager hash: DES of a fixed string under the uppercased
/// secret. Case insensitive and limited to 14 octets by construction.
fn lm_password_hash(secret: &str) -> [u8; 16] {
    let mut ucase = [0u8; 14];
    for (slot, byte) in ucase.iter_mut().zip(secret.bytes()) {
        *slot = byte.to_ascii_uppercase();
    }
    let mut hash = [0u8; 16];
    hash[..8].copy_from_slice(&des_encrypt(&ucase[0..7], LANMAN_MAGIC));
    hash[8..].copy_from_slice(&des_encrypt(&ucase[7..14], LANMAN_MAGIC));
    hash
}

/// Build a v1 response block.
///
/// The NT response is always present; the LAN Manager response only when
/// configured, in which case the flags octet asks the authenticator to
/// verify against it.
pub fn make_response(
    challenge: &[u8; CHALLENGE_LEN],
    secret: &str,
    use_lanman: bool,
) -> [u8; RESPONSE_LEN] {
    let mut response = [0u8; RESPONSE_LEN];
    response[layout::NT_RESP..layout::NT_RESP + 24]
        .copy_from_slice(&challenge_response(challenge, &nt_password_hash(secret)));
    if use_lanman {
        response[layout::LANMAN_RESP..layout::LANMAN_RESP + 24]
            .copy_from_slice(&challenge_response(challenge, &lm_password_hash(secret)));
    }
    response[layout::FLAGS] = !use_lanman as u8;
    response
}

/// Verify a v1 response block, producing the CHAP verdict text.
pub fn verify_response(
    challenge: &[u8; CHALLENGE_LEN],
    secret: &str,
    response: &[u8],
    use_lanman: bool,
) -> (bool, String) {
    let failure = || {
        let mut message = String::from("E=691 R=1 C=");
        push_hex(&mut message, challenge);
        message.push_str(" V=0");
        message
    };

    if response.len() != RESPONSE_LEN {
        return (false, failure());
    }
    if response[layout::FLAGS] == 0 && !use_lanman {
        net_debug!("chap: peer request for LANMAN auth not supported");
        return (false, failure());
    }

    let matched = if response[layout::FLAGS] != 0 {
        let expected = challenge_response(challenge, &nt_password_hash(secret));
        bool::from(expected.ct_eq(&response[layout::NT_RESP..layout::NT_RESP + 24]))
    } else {
        let expected = challenge_response(challenge, &lm_password_hash(secret));
        bool::from(expected.ct_eq(&response[layout::LANMAN_RESP..layout::LANMAN_RESP + 24]))
    };

    if matched {
        (true, String::from("Access granted"))
    } else {
        (false, failure())
    }
}

/// The 8-octet challenge digest of v2, binding both challenges and the
/// username (without any `domain\` prefix).
pub fn challenge_hash(
    peer_challenge: &[u8; CHALLENGE2_LEN],
    auth_challenge: &[u8; CHALLENGE2_LEN],
    username: &str,
) -> [u8; 8] {
    let user = match username.rfind('\\') {
        Some(at) => &username[at + 1..],
        None => username,
    };
    let digest = sha1(&[peer_challenge, auth_challenge, user.as_bytes()]);
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// The v2 NT response.
pub fn generate_nt_response2(
    auth_challenge: &[u8; CHALLENGE2_LEN],
    peer_challenge: &[u8; CHALLENGE2_LEN],
    username: &str,
    secret: &str,
) -> [u8; 24] {
    let challenge = challenge_hash(peer_challenge, auth_challenge, username);
    challenge_response(&challenge, &nt_password_hash(secret))
}

/// The authenticator response of v2: 40 uppercase hex digits proving the
/// authenticator also knows the secret.
pub fn generate_authenticator_response(
    secret: &str,
    nt_response: &[u8; 24],
    peer_challenge: &[u8; CHALLENGE2_LEN],
    auth_challenge: &[u8; CHALLENGE2_LEN],
    username: &str,
) -> String {
    let hash_hash = password_hash_hash(secret);
    let digest = sha1(&[&hash_hash, nt_response, AUTHENTICATOR_MAGIC1]);
    let challenge = challenge_hash(peer_challenge, auth_challenge, username);
    let digest = sha1(&[&digest, &challenge, AUTHENTICATOR_MAGIC2]);

    let mut out = String::with_capacity(AUTH_RESPONSE_LEN);
    push_hex(&mut out, &digest);
    out
}

/// Build a v2 response block.
///
/// A fresh peer challenge is generated unless one is supplied (supplying
/// one is the verifying side recomputing the peer's answer). Returns the
/// response block, the expected authenticator response, and the MPPE keys
/// for the indicated side.
pub fn make_response2<R: RngCore + CryptoRng>(
    rng: &mut R,
    auth_challenge: &[u8; CHALLENGE2_LEN],
    peer_challenge: Option<&[u8; CHALLENGE2_LEN]>,
    username: &str,
    secret: &str,
    is_server: bool,
) -> ([u8; RESPONSE_LEN], String, MppeKeys) {
    let mut response = [0u8; RESPONSE_LEN];
    let mut peer = [0u8; CHALLENGE2_LEN];
    match peer_challenge {
        Some(supplied) => peer.copy_from_slice(supplied),
        None => rng.fill_bytes(&mut peer),
    }
    response[layout::PEER_CHALLENGE..layout::PEER_CHALLENGE + CHALLENGE2_LEN]
        .copy_from_slice(&peer);

    let nt_response = generate_nt_response2(auth_challenge, &peer, username, secret);
    response[layout::NT_RESP..layout::NT_RESP + 24].copy_from_slice(&nt_response);

    let authenticator = generate_authenticator_response(
        secret, &nt_response, &peer, auth_challenge, username);
    let keys = mppe_master_keys(secret, &nt_response, is_server);

    (response, authenticator, keys)
}

/// Verify a v2 response block, producing the CHAP verdict text.
///
/// On success the text carries the authenticator response; the trailing
/// `M=` part is withheld from peers whose flags octet marks them as
/// non-conforming.
pub fn verify_response2(
    auth_challenge: &[u8; CHALLENGE2_LEN],
    username: &str,
    secret: &str,
    response: &[u8],
) -> (bool, String) {
    let failure = || {
        let mut message = String::from("E=691 R=1 C=");
        push_hex(&mut message, auth_challenge);
        message.push_str(" V=0 M=Access denied");
        message
    };

    if response.len() != RESPONSE_LEN {
        return (false, failure());
    }

    let mut peer = [0u8; CHALLENGE2_LEN];
    peer.copy_from_slice(
        &response[layout::PEER_CHALLENGE..layout::PEER_CHALLENGE + CHALLENGE2_LEN]);
    let expected = generate_nt_response2(auth_challenge, &peer, username, secret);

    let matched = bool::from(
        expected.ct_eq(&response[layout::NT_RESP..layout::NT_RESP + 24]));
    if !matched {
        return (false, failure());
    }

    let authenticator = generate_authenticator_response(
        secret, &expected, &peer, auth_challenge, username);
    let mut message = String::from("S=");
    message.push_str(&authenticator);
    if response[layout::FLAGS] == 0 {
        message.push_str(" M=Access granted");
    }
    (true, message)
}

/// Client-side check of the v2 success message.
///
/// The message must begin with `"S="` followed by the expected 40 hex
/// digits; an optional `" M=<text>"` tail is accepted, anything else is
/// not.
pub fn check_success2(message: &[u8], expected_authenticator: &str) -> bool {
    if message.len() < 2 + AUTH_RESPONSE_LEN || &message[..2] != b"S=" {
        net_debug!("chap: success packet is badly formed");
        return false;
    }
    let (digits, rest) = message[2..].split_at(AUTH_RESPONSE_LEN);
    if !bool::from(digits.ct_eq(expected_authenticator.as_bytes())) {
        net_debug!("chap: mutual authentication failed");
        return false;
    }
    rest.is_empty() || rest.starts_with(b" M=")
}

/// The v1 MPPE session key; the same key serves both directions.
pub fn mppe_start_key(challenge: &[u8; CHALLENGE_LEN], secret: &str) -> [u8; 16] {
    let hash_hash = password_hash_hash(secret);
    let digest = sha1(&[&hash_hash, &hash_hash, challenge]);
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

/// The v2 MPPE session keys, derived from the master key with the
/// direction swapped between client and server.
pub fn mppe_master_keys(secret: &str, nt_response: &[u8; 24], is_server: bool)
    -> MppeKeys
{
    let hash_hash = password_hash_hash(secret);
    let digest = sha1(&[&hash_hash, nt_response, MPPE_MASTER_KEY_MAGIC]);
    let mut master = [0u8; 16];
    master.copy_from_slice(&digest[..16]);

    let asymmetric = |magic: &[u8]| {
        let digest = sha1(&[&master, &SHA1_PAD1, magic, &SHA1_PAD2]);
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[..16]);
        key
    };

    let (send_magic, recv_magic) = if is_server {
        (MPPE_SERVER_SEND_MAGIC, MPPE_CLIENT_SEND_MAGIC)
    } else {
        (MPPE_CLIENT_SEND_MAGIC, MPPE_SERVER_SEND_MAGIC)
    };
    MppeKeys {
        send: asymmetric(send_magic),
        recv: asymmetric(recv_magic),
    }
}

fn push_hex(out: &mut String, bytes: &[u8]) {
    for byte in bytes {
        // Infallible for String.
        let _ = write!(out, "{:02X}", byte);
    }
}
