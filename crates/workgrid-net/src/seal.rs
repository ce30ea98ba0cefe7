//! Payload transforms for the non-TLS security variants.
//!
//! Layouts, receive side reading right to left:
//!   - HMAC:     `payload || HMAC-SHA256(payload)`
//!   - AES:      `IV || AES-CFB128(payload || SHA256(payload))`
//!   - AES+HMAC: `IV || ciphertext || HMAC-SHA256(IV || ciphertext)`

use aws_lc_rs::cipher::{
    AES_128, AES_256, DecryptingKey, DecryptionContext, EncryptingKey, UnboundCipherKey,
};
use aws_lc_rs::iv::FixedLength;
use aws_lc_rs::{constant_time, digest, hmac};
use data_encoding::HEXLOWER;
use tracing::warn;

use crate::config::{NetConfig, Role, SecurityMode};
use crate::error::Error;

/// HMAC-SHA256 and SHA-256 output size.
pub const MAC_SIZE: usize = 32;
/// AES-CFB128 initialization vector size.
pub const IV_SIZE: usize = 16;

/// Apply the configured outbound transform to `payload`.
pub fn apply(config: &NetConfig, role: Role, payload: &[u8]) -> Result<Vec<u8>, Error> {
    match config.mode {
        SecurityMode::Tcp | SecurityMode::Tls => Ok(payload.to_vec()),
        SecurityMode::Hmac => Ok(hmac_seal(config.hmac_key(role)?, payload)),
        SecurityMode::Aes => aes_seal(config.aes_key(role)?, payload),
        SecurityMode::AesHmac => {
            let sealed = aes_seal(config.aes_key(role)?, payload)?;
            Ok(hmac_seal(config.hmac_key(role)?, &sealed))
        }
    }
}

/// Reverse the configured transform on a received frame payload.
pub fn open(config: &NetConfig, role: Role, data: &[u8]) -> Result<Vec<u8>, Error> {
    match config.mode {
        SecurityMode::Tcp | SecurityMode::Tls => Ok(data.to_vec()),
        SecurityMode::Hmac => hmac_open(config.hmac_key(role)?, data).map(<[u8]>::to_vec),
        SecurityMode::Aes => aes_open(config.aes_key(role)?, data),
        SecurityMode::AesHmac => {
            let inner = hmac_open(config.hmac_key(role)?, data)?;
            aes_open(config.aes_key(role)?, inner)
        }
    }
}

fn hmac_seal(key: &[u8], payload: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let tag = hmac::sign(&key, payload);

    let mut out = Vec::with_capacity(payload.len() + MAC_SIZE);
    out.extend_from_slice(payload);
    out.extend_from_slice(tag.as_ref());
    out
}

/// Verify and strip the trailing MAC. Comparison is constant-time.
fn hmac_open<'a>(key: &[u8], data: &'a [u8]) -> Result<&'a [u8], Error> {
    if data.len() < MAC_SIZE {
        return Err(Error::Unauthenticated);
    }
    let (message, mac) = data.split_at(data.len() - MAC_SIZE);

    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, message, mac).map_err(|_| {
        warn!("rejected message with bad MAC {}..", HEXLOWER.encode(&mac[..8]));
        Error::Unauthenticated
    })?;

    Ok(message)
}

fn aes_seal(key: &[u8], payload: &[u8]) -> Result<Vec<u8>, Error> {
    let mut in_out = Vec::with_capacity(payload.len() + MAC_SIZE);
    in_out.extend_from_slice(payload);
    in_out.extend_from_slice(digest::digest(&digest::SHA256, payload).as_ref());

    let enc = EncryptingKey::cfb128(cipher_key(key)?).map_err(|_| Error::DecryptFailed)?;
    let context = enc.encrypt(&mut in_out).map_err(|_| Error::DecryptFailed)?;
    let iv = match &context {
        DecryptionContext::Iv128(iv) => iv.as_ref(),
        _ => return Err(Error::DecryptFailed),
    };

    let mut out = Vec::with_capacity(IV_SIZE + in_out.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&in_out);
    Ok(out)
}

fn aes_open(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    if data.len() < IV_SIZE + MAC_SIZE {
        return Err(Error::DecryptFailed);
    }
    let (iv, ciphertext) = data.split_at(IV_SIZE);
    let iv = FixedLength::<IV_SIZE>::try_from(iv).map_err(|_| Error::DecryptFailed)?;

    let dec = DecryptingKey::cfb128(cipher_key(key)?).map_err(|_| Error::DecryptFailed)?;
    let mut in_out = ciphertext.to_vec();
    let plain = dec
        .decrypt(&mut in_out, DecryptionContext::Iv128(iv))
        .map_err(|_| Error::DecryptFailed)?;

    let (payload, wire_digest) = plain.split_at(plain.len() - MAC_SIZE);
    let computed = digest::digest(&digest::SHA256, payload);
    constant_time::verify_slices_are_equal(computed.as_ref(), wire_digest).map_err(|_| {
        warn!(
            "rejected message with bad digest {}..",
            HEXLOWER.encode(&wire_digest[..8])
        );
        Error::DecryptFailed
    })?;

    Ok(payload.to_vec())
}

fn cipher_key(key: &[u8]) -> Result<UnboundCipherKey, Error> {
    let algorithm = match key.len() {
        16 => &AES_128,
        32 => &AES_256,
        other => return Err(Error::BadAesKeyLength(other)),
    };
    UnboundCipherKey::new(algorithm, key).map_err(|_| Error::BadAesKeyLength(key.len()))
}
