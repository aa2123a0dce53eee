//! Versioned binary encoding of a [`RatchetSession`].
//!
//! ```text
//! version(1) | root(32) | flags(1) | cks(32)? | ckr(32)? | own_secret(32) | own_public(32)
//!   | remote(32)? | ns(4) | nr(4) | pn(4) | skipped_count(4) | (ratchet(32) | n(4) | mk(32))*
//! ```
//!
//! Integers are little-endian. Limits are not part of the blob; they are
//! supplied again when the session is restored.

use std::collections::VecDeque;

use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{key_array, KeyPair, KEY_LEN};

use super::session::{RatchetLimits, RatchetSession, SkippedKey};

pub const FORMAT_VERSION: u8 = 1;

const FLAG_SENDING_CHAIN: u8 = 0b001;
const FLAG_RECEIVING_CHAIN: u8 = 0b010;
const FLAG_REMOTE_RATCHET: u8 = 0b100;

const SKIPPED_ENTRY_LEN: usize = KEY_LEN + 4 + KEY_LEN;

pub fn serialize(session: &RatchetSession) -> Result<Vec<u8>, CryptoError> {
    let mut flags = 0u8;
    if session.sending_chain.is_some() {
        flags |= FLAG_SENDING_CHAIN;
    }
    if session.receiving_chain.is_some() {
        flags |= FLAG_RECEIVING_CHAIN;
    }
    if session.remote_ratchet.is_some() {
        flags |= FLAG_REMOTE_RATCHET;
    }
    let skipped_count = u32::try_from(session.skipped.len())
        .map_err(|_| CryptoError::Format("skipped-key cache too large".into()))?;

    let mut data = Vec::with_capacity(
        2 + 6 * KEY_LEN + 16 + session.skipped.len() * SKIPPED_ENTRY_LEN,
    );
    data.push(FORMAT_VERSION);
    data.extend_from_slice(&session.root_key);
    data.push(flags);
    if let Some(chain) = &session.sending_chain {
        data.extend_from_slice(chain);
    }
    if let Some(chain) = &session.receiving_chain {
        data.extend_from_slice(chain);
    }
    data.extend_from_slice(session.own_ratchet.secret());
    data.extend_from_slice(session.own_ratchet.public());
    if let Some(remote) = &session.remote_ratchet {
        data.extend_from_slice(remote);
    }
    data.extend_from_slice(&session.send_count.to_le_bytes());
    data.extend_from_slice(&session.recv_count.to_le_bytes());
    data.extend_from_slice(&session.previous_send_count.to_le_bytes());
    data.extend_from_slice(&skipped_count.to_le_bytes());
    for entry in &session.skipped {
        data.extend_from_slice(&entry.ratchet_public);
        data.extend_from_slice(&entry.message_number.to_le_bytes());
        data.extend_from_slice(&entry.message_key);
    }
    Ok(data)
}

/// Restore a session. Unknown versions, truncation and trailing bytes are
/// all `Format` errors.
pub fn deserialize(data: &[u8], limits: RatchetLimits) -> Result<RatchetSession, CryptoError> {
    let mut reader = Reader { data, pos: 0 };

    let version = reader.u8()?;
    if version != FORMAT_VERSION {
        return Err(CryptoError::Format(format!(
            "unsupported session format version {version}"
        )));
    }

    let root_key = reader.key()?;
    let flags = reader.u8()?;
    if flags & !(FLAG_SENDING_CHAIN | FLAG_RECEIVING_CHAIN | FLAG_REMOTE_RATCHET) != 0 {
        return Err(CryptoError::Format(format!("unknown session flags {flags:#04x}")));
    }
    let sending_chain = reader.key_if(flags & FLAG_SENDING_CHAIN != 0)?;
    let receiving_chain = reader.key_if(flags & FLAG_RECEIVING_CHAIN != 0)?;
    let own_secret = Zeroizing::new(reader.key()?);
    let own_public = reader.key()?;
    let remote_ratchet = reader.key_if(flags & FLAG_REMOTE_RATCHET != 0)?;
    let send_count = reader.u32()?;
    let recv_count = reader.u32()?;
    let previous_send_count = reader.u32()?;

    let skipped_count = reader.u32()? as usize;
    if skipped_count.checked_mul(SKIPPED_ENTRY_LEN) != Some(reader.remaining()) {
        return Err(CryptoError::Format(format!(
            "session blob announces {skipped_count} skipped keys but has {} trailing bytes",
            reader.remaining()
        )));
    }
    let mut skipped = VecDeque::with_capacity(skipped_count);
    for _ in 0..skipped_count {
        skipped.push_back(SkippedKey {
            ratchet_public: reader.key()?,
            message_number: reader.u32()?,
            message_key: reader.key()?,
        });
    }
    while skipped.len() > limits.max_skipped_keys {
        skipped.pop_front();
    }

    Ok(RatchetSession {
        root_key,
        sending_chain,
        receiving_chain,
        own_ratchet: KeyPair::from_parts(*own_secret, own_public),
        remote_ratchet,
        send_count,
        recv_count,
        previous_send_count,
        skipped,
        limits,
    })
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CryptoError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| CryptoError::Format("truncated session blob".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, CryptoError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CryptoError> {
        Ok(u32::from_le_bytes(key_array("session integer", self.take(4)?)?))
    }

    fn key(&mut self) -> Result<[u8; KEY_LEN], CryptoError> {
        key_array("session key", self.take(KEY_LEN)?)
    }

    fn key_if(&mut self, present: bool) -> Result<Option<[u8; KEY_LEN]>, CryptoError> {
        if present {
            self.key().map(Some)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CryptoProvider, DalekProvider};
    use crate::x3dh::SharedSecret;

    fn sessions() -> (RatchetSession, RatchetSession) {
        let provider = DalekProvider;
        let secret = SharedSecret::from_bytes([7; 32]);
        let spk = provider.generate_keypair();
        let limits = RatchetLimits::default();
        (
            RatchetSession::init_sender(&provider, &secret, spk.public(), limits).unwrap(),
            RatchetSession::init_receiver(&secret, spk, limits),
        )
    }

    #[test]
    fn restored_session_continues() {
        let provider = DalekProvider;
        let (mut alice, mut bob) = sessions();

        let m0 = alice.encrypt(&provider, b"m0", b"ad").unwrap();
        let m1 = alice.encrypt(&provider, b"m1", b"ad").unwrap();
        bob.decrypt(&provider, &m1.header, &m1.ciphertext, b"ad").unwrap();
        assert_eq!(bob.skipped_keys(), 1);

        let blob = serialize(&bob).unwrap();
        let mut restored = deserialize(&blob, RatchetLimits::default()).unwrap();
        assert_eq!(serialize(&restored).unwrap(), blob);

        assert_eq!(
            restored.decrypt(&provider, &m0.header, &m0.ciphertext, b"ad").unwrap(),
            b"m0"
        );
        let reply = restored.encrypt(&provider, b"reply", b"ad").unwrap();
        assert_eq!(
            alice.decrypt(&provider, &reply.header, &reply.ciphertext, b"ad").unwrap(),
            b"reply"
        );
    }

    #[test]
    fn receiver_before_first_message_roundtrips() {
        let (_, bob) = sessions();
        let blob = serialize(&bob).unwrap();
        assert_eq!(blob[33], 0);
        let restored = deserialize(&blob, RatchetLimits::default()).unwrap();
        assert!(!restored.can_send());
    }

    #[test]
    fn rejects_unknown_version_and_truncation() {
        let (alice, _) = sessions();
        let blob = serialize(&alice).unwrap();

        let mut wrong_version = blob.clone();
        wrong_version[0] = 2;
        assert!(matches!(
            deserialize(&wrong_version, RatchetLimits::default()),
            Err(CryptoError::Format(_))
        ));

        for len in [0, 1, 33, blob.len() - 1] {
            assert!(
                matches!(
                    deserialize(&blob[..len], RatchetLimits::default()),
                    Err(CryptoError::Format(_))
                ),
                "length {len}"
            );
        }

        let mut trailing = blob;
        trailing.push(0);
        assert!(matches!(
            deserialize(&trailing, RatchetLimits::default()),
            Err(CryptoError::Format(_))
        ));
    }

    #[test]
    fn smaller_limit_trims_cache_on_restore() {
        let provider = DalekProvider;
        let (mut alice, mut bob) = sessions();
        let msgs: Vec<_> = (0..5)
            .map(|_| alice.encrypt(&provider, b"x", b"").unwrap())
            .collect();
        bob.decrypt(&provider, &msgs[4].header, &msgs[4].ciphertext, b"")
            .unwrap();
        assert_eq!(bob.skipped_keys(), 4);

        let limits = RatchetLimits {
            max_skip: 10,
            max_skipped_keys: 1,
        };
        let restored = deserialize(&serialize(&bob).unwrap(), limits).unwrap();
        assert_eq!(restored.skipped_keys(), 1);
        assert_eq!(restored.limits(), limits);
    }
}
