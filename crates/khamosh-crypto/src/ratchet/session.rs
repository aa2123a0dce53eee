use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::keys::{fingerprint, KeyPair, KEY_LEN};
use crate::provider::CryptoProvider;
use crate::x3dh::SharedSecret;

use super::chain::{kdf_ck, kdf_rk, message_keys};
use super::header::MessageHeader;

pub const DEFAULT_MAX_SKIP: u32 = 1000;
pub const DEFAULT_MAX_SKIPPED_KEYS: usize = 2000;

/// Bounds on out-of-order tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatchetLimits {
    /// Largest number of message keys a single incoming message may skip.
    pub max_skip: u32,
    /// Capacity of the skipped-key cache. The oldest key is dropped first.
    pub max_skipped_keys: usize,
}

impl Default for RatchetLimits {
    fn default() -> Self {
        Self {
            max_skip: DEFAULT_MAX_SKIP,
            max_skipped_keys: DEFAULT_MAX_SKIPPED_KEYS,
        }
    }
}

/// Output of a single encrypt step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub header: MessageHeader,
    pub ciphertext: Vec<u8>,
}

/// Message key kept for a message that has not arrived yet.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct SkippedKey {
    #[zeroize(skip)]
    pub ratchet_public: [u8; KEY_LEN],
    #[zeroize(skip)]
    pub message_number: u32,
    pub message_key: [u8; KEY_LEN],
}

/// Double Ratchet state for one conversation.
#[derive(Clone)]
pub struct RatchetSession {
    pub(crate) root_key: [u8; KEY_LEN],
    pub(crate) sending_chain: Option<[u8; KEY_LEN]>,
    pub(crate) receiving_chain: Option<[u8; KEY_LEN]>,
    pub(crate) own_ratchet: KeyPair,
    pub(crate) remote_ratchet: Option<[u8; KEY_LEN]>,
    pub(crate) send_count: u32,
    pub(crate) recv_count: u32,
    pub(crate) previous_send_count: u32,
    pub(crate) skipped: VecDeque<SkippedKey>,
    pub(crate) limits: RatchetLimits,
}

impl Drop for RatchetSession {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.sending_chain.zeroize();
        self.receiving_chain.zeroize();
    }
}

impl std::fmt::Debug for RatchetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetSession")
            .field("own_ratchet", &fingerprint(self.own_ratchet.public()))
            .field("remote_ratchet", &self.remote_ratchet.as_ref().map(|k| fingerprint(k)))
            .field("send_count", &self.send_count)
            .field("recv_count", &self.recv_count)
            .field("previous_send_count", &self.previous_send_count)
            .field("skipped", &self.skipped.len())
            .finish_non_exhaustive()
    }
}

impl RatchetSession {
    /// Initiator side: ratchet once against the responder's signed pre-key so
    /// the first message can be sent immediately.
    pub fn init_sender(
        provider: &dyn CryptoProvider,
        shared_secret: &SharedSecret,
        receiver_ratchet_public: &[u8; KEY_LEN],
        limits: RatchetLimits,
    ) -> Result<Self, CryptoError> {
        let own_ratchet = provider.generate_keypair();
        let dh_out = provider.dh(own_ratchet.secret(), receiver_ratchet_public)?;
        let (root_key, sending_chain) = kdf_rk(shared_secret.as_bytes(), &dh_out)?;

        Ok(Self {
            root_key,
            sending_chain: Some(sending_chain),
            receiving_chain: None,
            own_ratchet,
            remote_ratchet: Some(*receiver_ratchet_public),
            send_count: 0,
            recv_count: 0,
            previous_send_count: 0,
            skipped: VecDeque::new(),
            limits,
        })
    }

    /// Responder side: the signed pre-key pair becomes the first ratchet key
    /// and no chain exists until the initiator's first message arrives.
    pub fn init_receiver(
        shared_secret: &SharedSecret,
        own_ratchet: KeyPair,
        limits: RatchetLimits,
    ) -> Self {
        Self {
            root_key: *shared_secret.as_bytes(),
            sending_chain: None,
            receiving_chain: None,
            own_ratchet,
            remote_ratchet: None,
            send_count: 0,
            recv_count: 0,
            previous_send_count: 0,
            skipped: VecDeque::new(),
            limits,
        }
    }

    pub fn can_send(&self) -> bool {
        self.sending_chain.is_some()
    }

    /// Initiator session whose peer has not answered yet.
    pub fn awaiting_reply(&self) -> bool {
        self.sending_chain.is_some() && self.receiving_chain.is_none()
    }

    pub fn send_count(&self) -> u32 {
        self.send_count
    }

    pub fn recv_count(&self) -> u32 {
        self.recv_count
    }

    pub fn skipped_keys(&self) -> usize {
        self.skipped.len()
    }

    pub fn limits(&self) -> RatchetLimits {
        self.limits
    }

    pub fn encrypt(
        &mut self,
        provider: &dyn CryptoProvider,
        plaintext: &[u8],
        ad: &[u8],
    ) -> Result<EncryptedMessage, CryptoError> {
        let chain_key = self.sending_chain.ok_or(CryptoError::SessionNotReady)?;
        let next_count = self
            .send_count
            .checked_add(1)
            .ok_or_else(|| CryptoError::InternalCrypto("sending chain exhausted".into()))?;
        let (next_chain, message_key) = kdf_ck(&chain_key)?;

        let header = MessageHeader {
            ratchet_public: *self.own_ratchet.public(),
            previous_chain_length: self.previous_send_count,
            message_number: self.send_count,
        };
        let ciphertext = seal(provider, &message_key, &header, plaintext, ad)?;

        self.sending_chain = Some(next_chain);
        self.send_count = next_count;
        Ok(EncryptedMessage { header, ciphertext })
    }

    /// Decrypt against a copy of the state and keep the copy only on success.
    ///
    /// Every failure is reported as `Authentication` and leaves `self` untouched.
    pub fn decrypt(
        &mut self,
        provider: &dyn CryptoProvider,
        header: &MessageHeader,
        ciphertext: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut staged = self.clone();
        match staged.decrypt_in_place(provider, header, ciphertext, ad) {
            Ok(plaintext) => {
                *self = staged;
                Ok(plaintext)
            }
            Err(e) => {
                tracing::debug!(
                    message_number = header.message_number,
                    error = %e,
                    "ratchet decrypt rejected"
                );
                Err(CryptoError::Authentication)
            }
        }
    }

    fn decrypt_in_place(
        &mut self,
        provider: &dyn CryptoProvider,
        header: &MessageHeader,
        ciphertext: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if let Some(message_key) = self.take_skipped(header) {
            return open(provider, &message_key.message_key, header, ciphertext, ad);
        }

        if self.remote_ratchet != Some(header.ratchet_public) {
            self.skip_message_keys(header.previous_chain_length)?;
            self.dh_ratchet(provider, &header.ratchet_public)?;
        }

        if header.message_number < self.recv_count {
            return Err(CryptoError::Format(format!(
                "message {} already received or evicted",
                header.message_number
            )));
        }
        self.skip_message_keys(header.message_number)?;

        let chain_key = self.receiving_chain.ok_or(CryptoError::Authentication)?;
        let (next_chain, message_key) = kdf_ck(&chain_key)?;
        self.receiving_chain = Some(next_chain);
        self.recv_count = self
            .recv_count
            .checked_add(1)
            .ok_or(CryptoError::Authentication)?;

        open(provider, &message_key, header, ciphertext, ad)
    }

    fn take_skipped(&mut self, header: &MessageHeader) -> Option<SkippedKey> {
        let index = self.skipped.iter().position(|entry| {
            entry.ratchet_public == header.ratchet_public
                && entry.message_number == header.message_number
        })?;
        self.skipped.remove(index)
    }

    /// Advance the receiving chain to `until`, caching each intermediate key.
    fn skip_message_keys(&mut self, until: u32) -> Result<(), CryptoError> {
        let (Some(mut chain_key), Some(remote)) = (self.receiving_chain, self.remote_ratchet) else {
            return Ok(());
        };
        if until <= self.recv_count {
            return Ok(());
        }
        if until - self.recv_count > self.limits.max_skip {
            return Err(CryptoError::Format(format!(
                "message skips {} keys, limit is {}",
                until - self.recv_count,
                self.limits.max_skip
            )));
        }

        while self.recv_count < until {
            let (next_chain, message_key) = kdf_ck(&chain_key)?;
            self.skipped.push_back(SkippedKey {
                ratchet_public: remote,
                message_number: self.recv_count,
                message_key,
            });
            while self.skipped.len() > self.limits.max_skipped_keys {
                self.skipped.pop_front();
            }
            chain_key = next_chain;
            self.recv_count += 1;
        }
        self.receiving_chain = Some(chain_key);
        Ok(())
    }

    fn dh_ratchet(
        &mut self,
        provider: &dyn CryptoProvider,
        remote: &[u8; KEY_LEN],
    ) -> Result<(), CryptoError> {
        self.previous_send_count = self.send_count;
        self.send_count = 0;
        self.recv_count = 0;
        self.remote_ratchet = Some(*remote);

        let dh_recv = provider.dh(self.own_ratchet.secret(), remote)?;
        let (root_key, receiving_chain) = kdf_rk(&self.root_key, &dh_recv)?;
        self.root_key = root_key;
        self.receiving_chain = Some(receiving_chain);

        self.own_ratchet = provider.generate_keypair();
        let dh_send = provider.dh(self.own_ratchet.secret(), remote)?;
        let (root_key, sending_chain) = kdf_rk(&self.root_key, &dh_send)?;
        self.root_key = root_key;
        self.sending_chain = Some(sending_chain);

        tracing::debug!(
            remote = %fingerprint(remote),
            previous_chain_length = self.previous_send_count,
            "DH ratchet step"
        );
        Ok(())
    }
}

/// AEAD associated data: caller AD followed by the encoded header.
fn full_ad(ad: &[u8], header: &MessageHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(ad.len() + super::HEADER_LEN);
    out.extend_from_slice(ad);
    out.extend_from_slice(&header.to_bytes());
    out
}

fn seal(
    provider: &dyn CryptoProvider,
    message_key: &[u8; KEY_LEN],
    header: &MessageHeader,
    plaintext: &[u8],
    ad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let keys = message_keys(message_key)?;
    provider.aead_seal(&keys.key, &keys.nonce, plaintext, &full_ad(ad, header))
}

fn open(
    provider: &dyn CryptoProvider,
    message_key: &[u8; KEY_LEN],
    header: &MessageHeader,
    ciphertext: &[u8],
    ad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let keys = message_keys(message_key)?;
    provider.aead_open(&keys.key, &keys.nonce, ciphertext, &full_ad(ad, header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::DalekProvider;

    const AD: &[u8] = b"alice-identity||bob-identity";

    fn pair(limits: RatchetLimits) -> (RatchetSession, RatchetSession) {
        let provider = DalekProvider;
        let secret = SharedSecret::from_bytes([0x42; 32]);
        let bob_spk = provider.generate_keypair();
        let alice = RatchetSession::init_sender(&provider, &secret, bob_spk.public(), limits).unwrap();
        let bob = RatchetSession::init_receiver(&secret, bob_spk, limits);
        (alice, bob)
    }

    #[test]
    fn in_order_exchange() {
        let provider = DalekProvider;
        let (mut alice, mut bob) = pair(RatchetLimits::default());

        for i in 0..5u32 {
            let msg = alice.encrypt(&provider, format!("m{i}").as_bytes(), AD).unwrap();
            assert_eq!(msg.header.message_number, i);
            let plaintext = bob.decrypt(&provider, &msg.header, &msg.ciphertext, AD).unwrap();
            assert_eq!(plaintext, format!("m{i}").as_bytes());
        }
        assert_eq!(bob.skipped_keys(), 0);
    }

    #[test]
    fn out_of_order_uses_cache() {
        let provider = DalekProvider;
        let (mut alice, mut bob) = pair(RatchetLimits::default());

        let msgs: Vec<_> = (0..3)
            .map(|i| alice.encrypt(&provider, &[i], AD).unwrap())
            .collect();

        for i in [2usize, 0, 1] {
            let plaintext = bob
                .decrypt(&provider, &msgs[i].header, &msgs[i].ciphertext, AD)
                .unwrap();
            assert_eq!(plaintext, vec![u8::try_from(i).unwrap()]);
        }
        assert_eq!(bob.skipped_keys(), 0);
    }

    #[test]
    fn receiver_cannot_send_first() {
        let provider = DalekProvider;
        let (_, mut bob) = pair(RatchetLimits::default());
        assert!(!bob.can_send());
        assert_eq!(
            bob.encrypt(&provider, b"hi", AD).unwrap_err(),
            CryptoError::SessionNotReady
        );
    }

    #[test]
    fn replay_is_rejected() {
        let provider = DalekProvider;
        let (mut alice, mut bob) = pair(RatchetLimits::default());

        let msg = alice.encrypt(&provider, b"once", AD).unwrap();
        bob.decrypt(&provider, &msg.header, &msg.ciphertext, AD).unwrap();
        assert_eq!(
            bob.decrypt(&provider, &msg.header, &msg.ciphertext, AD),
            Err(CryptoError::Authentication)
        );
    }

    #[test]
    fn gap_beyond_max_skip_is_rejected() {
        let provider = DalekProvider;
        let limits = RatchetLimits {
            max_skip: 2,
            max_skipped_keys: 10,
        };
        let (mut alice, mut bob) = pair(limits);

        let first = alice.encrypt(&provider, b"0", AD).unwrap();
        bob.decrypt(&provider, &first.header, &first.ciphertext, AD).unwrap();

        let msgs: Vec<_> = (0..4)
            .map(|_| alice.encrypt(&provider, b"x", AD).unwrap())
            .collect();
        // Message 4 would require caching keys 1, 2 and 3.
        assert_eq!(
            bob.decrypt(&provider, &msgs[3].header, &msgs[3].ciphertext, AD),
            Err(CryptoError::Authentication)
        );
        assert_eq!(bob.recv_count(), 1);
        bob.decrypt(&provider, &msgs[2].header, &msgs[2].ciphertext, AD)
            .unwrap();
    }

    #[test]
    fn cache_evicts_oldest() {
        let provider = DalekProvider;
        let limits = RatchetLimits {
            max_skip: 100,
            max_skipped_keys: 2,
        };
        let (mut alice, mut bob) = pair(limits);

        let msgs: Vec<_> = (0..4)
            .map(|i| alice.encrypt(&provider, &[i], AD).unwrap())
            .collect();
        bob.decrypt(&provider, &msgs[3].header, &msgs[3].ciphertext, AD)
            .unwrap();
        assert_eq!(bob.skipped_keys(), 2);

        // Key 0 was evicted; 1 and 2 are still cached.
        assert_eq!(
            bob.decrypt(&provider, &msgs[0].header, &msgs[0].ciphertext, AD),
            Err(CryptoError::Authentication)
        );
        assert_eq!(
            bob.decrypt(&provider, &msgs[1].header, &msgs[1].ciphertext, AD)
                .unwrap(),
            vec![1]
        );
        assert_eq!(
            bob.decrypt(&provider, &msgs[2].header, &msgs[2].ciphertext, AD)
                .unwrap(),
            vec![2]
        );
    }

    #[test]
    fn skipped_keys_survive_a_ratchet_step() {
        let provider = DalekProvider;
        let (mut alice, mut bob) = pair(RatchetLimits::default());

        let early = alice.encrypt(&provider, b"early", AD).unwrap();
        let late = alice.encrypt(&provider, b"late", AD).unwrap();
        bob.decrypt(&provider, &late.header, &late.ciphertext, AD).unwrap();

        let reply = bob.encrypt(&provider, b"reply", AD).unwrap();
        alice.decrypt(&provider, &reply.header, &reply.ciphertext, AD).unwrap();
        let next = alice.encrypt(&provider, b"next", AD).unwrap();
        assert_eq!(next.header.previous_chain_length, 2);
        bob.decrypt(&provider, &next.header, &next.ciphertext, AD).unwrap();

        assert_eq!(
            bob.decrypt(&provider, &early.header, &early.ciphertext, AD).unwrap(),
            b"early"
        );
    }
}
