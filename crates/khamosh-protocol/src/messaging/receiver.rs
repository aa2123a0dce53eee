use khamosh_crypto::{associated_data, x3dh};

use super::envelope::{InitialMessage, SubsequentMessage, WireMessage};
use super::protocol::{MessageEnvelopeProtocol, MessageKind, ReceivedMessage};
use crate::directory::Directory;
use crate::error::ProtocolError;
use crate::topic;
use crate::transport::Transport;

impl<D: Directory, T: Transport> MessageEnvelopeProtocol<D, T> {
    /// Handle a payload that arrived on one of this party's topics.
    pub async fn handle_incoming(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<ReceivedMessage, ProtocolError> {
        let (recipient, sender) = topic::parse_topic(&self.config.topic_prefix, topic)?;
        if recipient != self.local_id {
            return Err(ProtocolError::Transport(format!(
                "payload for {recipient} delivered to {}",
                self.local_id
            )));
        }
        self.receive_message(&sender, payload).await
    }

    /// Decode a payload from `sender` and decrypt it with the framing its
    /// shape calls for.
    pub async fn receive_message(
        &self,
        sender: &str,
        payload: &[u8],
    ) -> Result<ReceivedMessage, ProtocolError> {
        let (plaintext, kind) = match WireMessage::from_bytes(payload)? {
            WireMessage::Initial(message) => (
                self.receive_initial(sender, &message).await?,
                MessageKind::Initial,
            ),
            WireMessage::Subsequent(message) => (
                self.receive(sender, &message).await?,
                MessageKind::Subsequent,
            ),
        };
        Ok(ReceivedMessage {
            sender: sender.to_string(),
            plaintext,
            kind,
        })
    }

    /// Complete the responder side of X3DH and decrypt the first message.
    ///
    /// Replaces any existing session with `sender` once the message decrypts.
    /// The announced one-time pre-key is consumed before decryption, so a
    /// forged or replayed initial message still burns it.
    ///
    /// When both sides started a handshake before hearing from each other,
    /// the handshake from the lower identity key wins. The higher side adopts
    /// it and the lower side drops the other initial message.
    pub async fn receive_initial(
        &self,
        sender: &str,
        message: &InitialMessage,
    ) -> Result<Vec<u8>, ProtocolError> {
        let _guard = self.lock_peer(sender).await;

        let spk = &self.keys.signed_prekey;
        if message.spk_id != spk.id() {
            tracing::warn!(sender, spk_id = message.spk_id, "initial message for unknown signed pre-key");
            return Err(ProtocolError::UnknownSignedPreKey(message.spk_id));
        }

        if self.sessions.awaiting_reply(sender) && self.identity_public() < message.identity_key {
            tracing::warn!(sender, "crossed initial message dropped, keeping our handshake");
            return Err(ProtocolError::HandshakeCollision(sender.to_string()));
        }

        let opk_secret = message
            .opk_id
            .map(|id| self.prekeys.consume(id))
            .transpose()
            .inspect_err(|e| tracing::warn!(sender, error = %e, "one-time pre-key unavailable"))?;

        let shared_secret = x3dh::responder(
            self.provider.as_ref(),
            self.keys.identity.secret_key_bytes(),
            spk.secret(),
            opk_secret.as_ref().map(|secret| &secret[..]),
            &message.identity_key,
            &message.ephemeral_key,
        )?;
        let ad = associated_data::build(&message.identity_key, &self.identity_public())?;

        let ratchets = self.sessions.ratchets();
        ratchets.init_receiver(sender, &shared_secret, spk.secret(), spk.public())?;
        let plaintext = match ratchets.decrypt(sender, &message.header, &message.ciphertext, &ad) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                // Fall back to whatever the record held before.
                self.sessions.unload(sender);
                tracing::warn!(sender, error = %e, "initial message dropped");
                return Err(e.into());
            }
        };

        if let Err(e) = self.sessions.persist(sender, &message.identity_key) {
            self.sessions.unload(sender);
            return Err(e);
        }
        tracing::info!(sender, opk_id = ?message.opk_id, "session established");
        Ok(plaintext)
    }

    /// Decrypt a message on the established session with `sender`.
    pub async fn receive(
        &self,
        sender: &str,
        message: &SubsequentMessage,
    ) -> Result<Vec<u8>, ProtocolError> {
        let _guard = self.lock_peer(sender).await;

        let Some(peer_identity) = self.sessions.peer_identity_key(sender)? else {
            tracing::warn!(sender, "message arrived before handshake");
            return Err(ProtocolError::NoSession(sender.to_string()));
        };
        self.sessions.ensure_loaded(sender)?;

        let ad = associated_data::build(&peer_identity, &self.identity_public())?;
        let plaintext = self
            .sessions
            .ratchets()
            .decrypt(sender, &message.header, &message.ciphertext, &ad)
            .inspect_err(|e| tracing::warn!(sender, error = %e, "message dropped"))?;

        if let Err(e) = self.sessions.persist(sender, &peer_identity) {
            self.sessions.unload(sender);
            return Err(e);
        }
        tracing::debug!(sender, "message received");
        Ok(plaintext)
    }
}
