use crate::error::CryptoError;
use crate::keys::{key_array, KEY_LEN};

pub const ASSOCIATED_DATA_LEN: usize = 2 * KEY_LEN;

/// Associated data binding a conversation to both identities.
///
/// The sender's identity key always comes first, so both parties compute the
/// same bytes as long as they agree on who is sending.
pub fn build(
    sender_identity_public: &[u8],
    receiver_identity_public: &[u8],
) -> Result<[u8; ASSOCIATED_DATA_LEN], CryptoError> {
    let sender: [u8; KEY_LEN] = key_array("sender identity key", sender_identity_public)?;
    let receiver: [u8; KEY_LEN] = key_array("receiver identity key", receiver_identity_public)?;

    let mut ad = [0u8; ASSOCIATED_DATA_LEN];
    ad[..KEY_LEN].copy_from_slice(&sender);
    ad[KEY_LEN..].copy_from_slice(&receiver);
    Ok(ad)
}
