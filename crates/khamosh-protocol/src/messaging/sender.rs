use khamosh_crypto::{associated_data, x3dh};

use super::envelope::{InitialMessage, SubsequentMessage, WireMessage};
use super::protocol::{MessageEnvelopeProtocol, MessageKind};
use crate::directory::Directory;
use crate::error::ProtocolError;
use crate::sessions::SessionState;
use crate::topic;
use crate::transport::Transport;

impl<D: Directory, T: Transport> MessageEnvelopeProtocol<D, T> {
    /// Send `plaintext`, starting a new session first when there is none or
    /// the stored one is unusable.
    pub async fn send_message(
        &self,
        peer: &str,
        plaintext: &[u8],
    ) -> Result<MessageKind, ProtocolError> {
        let _guard = self.lock_peer(peer).await;
        match self.sessions.state(peer)? {
            SessionState::Established => {
                self.send_subsequent(peer, plaintext).await?;
                Ok(MessageKind::Subsequent)
            }
            state => {
                if state == SessionState::Broken {
                    tracing::warn!(peer, "stored session unusable, starting a new handshake");
                }
                self.send_handshake(peer, plaintext).await?;
                Ok(MessageKind::Initial)
            }
        }
    }

    /// Run X3DH against `peer`'s published bundle and send the first message
    /// of a new session. Any existing session with `peer` is replaced.
    pub async fn send_initial(&self, peer: &str, plaintext: &[u8]) -> Result<(), ProtocolError> {
        let _guard = self.lock_peer(peer).await;
        self.send_handshake(peer, plaintext).await
    }

    /// Send over the established session with `peer`.
    pub async fn send(&self, peer: &str, plaintext: &[u8]) -> Result<(), ProtocolError> {
        let _guard = self.lock_peer(peer).await;
        self.send_subsequent(peer, plaintext).await
    }

    async fn send_handshake(&self, peer: &str, plaintext: &[u8]) -> Result<(), ProtocolError> {
        let request = self.bundle_request(peer)?;
        let bundle = self
            .directory
            .fetch_bundle(&request)
            .await?
            .to_prekey_bundle()?;

        let agreement = x3dh::initiator(
            self.provider.as_ref(),
            self.keys.identity.secret_key_bytes(),
            &bundle,
        )?;
        let ad = associated_data::build(&self.identity_public(), &bundle.identity_key)?;

        let ratchets = self.sessions.ratchets();
        ratchets.init_sender(peer, &agreement.shared_secret, &bundle.spk_public)?;
        let encrypted = match ratchets.encrypt(peer, plaintext, &ad) {
            Ok(encrypted) => encrypted,
            Err(e) => {
                self.sessions.unload(peer);
                return Err(e.into());
            }
        };

        let payload = WireMessage::Initial(InitialMessage {
            identity_key: self.identity_public(),
            ephemeral_key: agreement.ephemeral_public,
            spk_id: bundle.spk_id,
            opk_id: bundle.opk().map(|(id, _)| id),
            ciphertext: encrypted.ciphertext,
            header: encrypted.header.to_bytes(),
        })
        .to_bytes()?;

        // A session the peer never hears about must not be kept.
        let topic = topic::build_topic(&self.config.topic_prefix, peer, &self.local_id);
        if let Err(e) = self.transport.publish(&topic, payload).await {
            self.sessions.unload(peer);
            return Err(e);
        }
        if let Err(e) = self.sessions.persist(peer, &bundle.identity_key) {
            self.sessions.unload(peer);
            return Err(e);
        }

        tracing::info!(
            peer,
            spk_id = bundle.spk_id,
            opk_id = ?bundle.opk().map(|(id, _)| id),
            "session initiated"
        );
        Ok(())
    }

    async fn send_subsequent(&self, peer: &str, plaintext: &[u8]) -> Result<(), ProtocolError> {
        let peer_identity = self
            .sessions
            .peer_identity_key(peer)?
            .ok_or_else(|| ProtocolError::NoSession(peer.to_string()))?;
        self.sessions.ensure_loaded(peer)?;

        let ad = associated_data::build(&self.identity_public(), &peer_identity)?;
        let encrypted = self.sessions.ratchets().encrypt(peer, plaintext, &ad)?;

        // The chain has advanced; persist before publishing so a message key
        // is never derived twice.
        if let Err(e) = self.sessions.persist(peer, &peer_identity) {
            self.sessions.unload(peer);
            return Err(e);
        }

        let payload = WireMessage::Subsequent(SubsequentMessage {
            ciphertext: encrypted.ciphertext,
            header: encrypted.header.to_bytes(),
        })
        .to_bytes()?;
        let topic = topic::build_topic(&self.config.topic_prefix, peer, &self.local_id);
        self.transport.publish(&topic, payload).await?;

        tracing::debug!(
            peer,
            n = encrypted.header.message_number,
            "message sent"
        );
        Ok(())
    }
}
