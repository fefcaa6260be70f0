//! Integrated address codec.
//!
//! An encoded address is `<prefix> ∥ base64(body ∥ checksum4)` over a custom
//! alphabet, where the body is
//! `uvarint(version) ∥ version payload ∥ integration byte ∥ optional fields`.
//! The integration byte is a bitmask of which optional payload fields follow,
//! in fixed order: registration, payment id, payment amount, payment asset.
//! New optional fields get new bits, so the format is append-only and
//! version-extensible. The checksum is computed before base64 so typos are
//! caught before protocol-level parsing.

use std::sync::OnceLock;

use base64::alphabet::Alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::{DecodePaddingMode, Engine};
use serde::{Deserialize, Serialize};

use crate::config::Network;
use crate::constants::{
    ASSET_LENGTH, CHECKSUM_SIZE, NETWORK_PREFIX_LENGTH, PAYMENT_ID_SIZE, PUBLIC_KEY_SIZE,
    SIGNATURE_SIZE,
};
use crate::crypto::checksum::{checksum, verify_checksum};
use crate::crypto::keys::{PublicKey, Signature};
use crate::serialize::{BufferReader, BufferWriter, CodecError};
use crate::Asset;

/// Integration byte bits.
const FLAG_REGISTRATION: u8 = 1;
const FLAG_PAYMENT_ID: u8 = 1 << 1;
const FLAG_PAYMENT_AMOUNT: u8 = 1 << 2;
const FLAG_PAYMENT_ASSET: u8 = 1 << 3;
const FLAG_KNOWN_MASK: u8 =
    FLAG_REGISTRATION | FLAG_PAYMENT_ID | FLAG_PAYMENT_AMOUNT | FLAG_PAYMENT_ASSET;

/// Custom base64 alphabet used for the address body (no padding).
const ADDRESS_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789$@";

fn engine() -> &'static GeneralPurpose {
    static ENGINE: OnceLock<GeneralPurpose> = OnceLock::new();
    ENGINE.get_or_init(|| {
        let alphabet = Alphabet::new(ADDRESS_ALPHABET).expect("valid address alphabet");
        let config = GeneralPurposeConfig::new()
            .with_encode_padding(false)
            .with_decode_padding_mode(DecodePaddingMode::RequireNone);
        GeneralPurpose::new(&alphabet, config)
    })
}

/// Address version tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressVersion {
    SimplePublicKey = 0,
}

/// Errors from address decoding.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address shorter than the network prefix")]
    InvalidLength,
    #[error("address network prefix unknown or not the selected network")]
    InvalidNetwork,
    #[error("address checksum mismatch")]
    InvalidChecksum,
    #[error("unknown address version or integration flag")]
    InvalidVersion,
    #[error("address body truncated")]
    Truncated,
}

impl From<CodecError> for AddressError {
    fn from(_: CodecError) -> Self {
        AddressError::Truncated
    }
}

/// A self-describing address carrying optional integration payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub network: Network,
    pub version: AddressVersion,
    pub public_key: PublicKey,
    /// Registration signature proving key ownership, so a first transfer can
    /// create the account without a separate registration transaction.
    pub registration: Option<Signature>,
    pub payment_id: Option<[u8; PAYMENT_ID_SIZE]>,
    pub payment_amount: Option<u64>,
    pub payment_asset: Option<Asset>,
}

impl Address {
    /// A bare address for a public key with no integration payloads.
    pub fn from_public_key(network: Network, public_key: PublicKey) -> Self {
        Address {
            network,
            version: AddressVersion::SimplePublicKey,
            public_key,
            registration: None,
            payment_id: None,
            payment_amount: None,
            payment_asset: None,
        }
    }

    fn integration_byte(&self) -> u8 {
        let mut out = 0;
        if self.registration.is_some() {
            out |= FLAG_REGISTRATION;
        }
        if self.payment_id.is_some() {
            out |= FLAG_PAYMENT_ID;
        }
        if self.payment_amount.is_some() {
            out |= FLAG_PAYMENT_AMOUNT;
        }
        if self.payment_asset.is_some() {
            out |= FLAG_PAYMENT_ASSET;
        }
        out
    }

    /// Encode to the human-readable form.
    pub fn encode(&self) -> String {
        let mut w = BufferWriter::new();
        w.write_uvarint(self.version as u64);
        match self.version {
            AddressVersion::SimplePublicKey => w.write_bytes(self.public_key.as_bytes()),
        }
        w.write_byte(self.integration_byte());
        if let Some(registration) = &self.registration {
            w.write_bytes(&registration.to_bytes());
        }
        if let Some(payment_id) = &self.payment_id {
            w.write_bytes(payment_id);
        }
        if let Some(amount) = self.payment_amount {
            w.write_uvarint(amount);
        }
        if let Some(asset) = &self.payment_asset {
            w.write_bytes(asset);
        }
        let mut body = w.into_bytes();
        let sum = checksum(&body);
        body.extend_from_slice(&sum);
        let mut out = String::with_capacity(NETWORK_PREFIX_LENGTH + body.len() * 4 / 3 + 1);
        out.push_str(self.network.prefix());
        out.push_str(&engine().encode(&body));
        out
    }

    /// Decode an address, requiring it to belong to `selected` network.
    pub fn decode(input: &str, selected: Network) -> Result<Address, AddressError> {
        if input.len() < NETWORK_PREFIX_LENGTH {
            return Err(AddressError::InvalidLength);
        }
        let (prefix, rest) = input.split_at(NETWORK_PREFIX_LENGTH);
        let network = Network::from_prefix(prefix).ok_or(AddressError::InvalidNetwork)?;
        if network != selected {
            return Err(AddressError::InvalidNetwork);
        }

        let buf = engine()
            .decode(rest)
            .map_err(|_| AddressError::Truncated)?;
        if buf.len() < CHECKSUM_SIZE + 1 {
            return Err(AddressError::InvalidLength);
        }
        let (body, sum) = buf.split_at(buf.len() - CHECKSUM_SIZE);
        if !verify_checksum(body, sum) {
            return Err(AddressError::InvalidChecksum);
        }

        let mut r = BufferReader::new(body);
        let version = match r.read_uvarint()? {
            0 => AddressVersion::SimplePublicKey,
            _ => return Err(AddressError::InvalidVersion),
        };
        let public_key = match version {
            AddressVersion::SimplePublicKey => PublicKey(r.read_array::<PUBLIC_KEY_SIZE>()?),
        };

        let integration = r.read_byte()?;
        if integration & !FLAG_KNOWN_MASK != 0 {
            return Err(AddressError::InvalidVersion);
        }

        let registration = if integration & FLAG_REGISTRATION != 0 {
            let bytes = r.read_bytes(SIGNATURE_SIZE)?;
            Some(Signature::from_bytes(bytes).ok_or(AddressError::Truncated)?)
        } else {
            None
        };
        let payment_id = if integration & FLAG_PAYMENT_ID != 0 {
            Some(r.read_array::<PAYMENT_ID_SIZE>()?)
        } else {
            None
        };
        let payment_amount = if integration & FLAG_PAYMENT_AMOUNT != 0 {
            Some(r.read_uvarint()?)
        } else {
            None
        };
        let payment_asset = if integration & FLAG_PAYMENT_ASSET != 0 {
            Some(r.read_array::<ASSET_LENGTH>()?)
        } else {
            None
        };

        if !r.is_empty() {
            return Err(AddressError::InvalidLength);
        }

        Ok(Address {
            network,
            version,
            public_key,
            registration,
            payment_id,
            payment_amount,
            payment_asset,
        })
    }

    /// Verify a detached message signature under this address's key.
    pub fn verify_signed_message(&self, message: &[u8], signature: &Signature) -> bool {
        self.public_key
            .verify(b"caligo.message", message, signature)
    }

    /// Decompress the public key to a curve point.
    pub fn point(&self) -> Option<curve25519_dalek::ristretto::RistrettoPoint> {
        self.public_key.decompress()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;

    fn test_address() -> Address {
        Address {
            network: Network::Devnet,
            version: AddressVersion::SimplePublicKey,
            public_key: Keypair::from_seed(b"addr-test").public,
            registration: None,
            payment_id: Some([1, 2, 3, 4, 5, 6, 7, 8]),
            payment_amount: Some(1000),
            payment_asset: None,
        }
    }

    #[test]
    fn encode_starts_with_network_prefix() {
        let addr = test_address();
        assert!(addr.encode().starts_with("PDN"));
        let mut mainnet = addr.clone();
        mainnet.network = Network::Mainnet;
        assert!(mainnet.encode().starts_with("PAN"));
    }

    #[test]
    fn roundtrip_integrated() {
        let addr = test_address();
        let encoded = addr.encode();
        let decoded = Address::decode(&encoded, Network::Devnet).unwrap();
        assert_eq!(decoded, addr);
    }

    #[test]
    fn roundtrip_bare() {
        let addr = Address::from_public_key(Network::Testnet, Keypair::generate().public);
        let decoded = Address::decode(&addr.encode(), Network::Testnet).unwrap();
        assert_eq!(decoded, addr);
    }

    #[test]
    fn roundtrip_all_fields() {
        let kp = Keypair::generate();
        let addr = Address {
            network: Network::Devnet,
            version: AddressVersion::SimplePublicKey,
            public_key: kp.public,
            registration: Some(kp.sign_registration()),
            payment_id: Some([0xff; 8]),
            payment_amount: Some(u64::MAX),
            payment_asset: Some([9u8; ASSET_LENGTH]),
        };
        let decoded = Address::decode(&addr.encode(), Network::Devnet).unwrap();
        assert_eq!(decoded, addr);
    }

    #[test]
    fn decode_rejects_short_input() {
        assert_eq!(
            Address::decode("PD", Network::Devnet),
            Err(AddressError::InvalidLength)
        );
        assert_eq!(
            Address::decode("", Network::Devnet),
            Err(AddressError::InvalidLength)
        );
    }

    #[test]
    fn decode_rejects_unknown_prefix() {
        assert_eq!(
            Address::decode("XXXabcdef", Network::Devnet),
            Err(AddressError::InvalidNetwork)
        );
    }

    #[test]
    fn decode_rejects_other_network() {
        let addr = test_address();
        assert_eq!(
            Address::decode(&addr.encode(), Network::Mainnet),
            Err(AddressError::InvalidNetwork)
        );
    }

    #[test]
    fn tampered_character_never_decodes_silently() {
        let addr = test_address();
        let encoded = addr.encode();
        // Flip every character position in turn to a different alphabet char;
        // decode must always fail, never return altered content.
        for i in NETWORK_PREFIX_LENGTH..encoded.len() {
            let mut chars: Vec<char> = encoded.chars().collect();
            let replacement = if chars[i] == 'A' { 'B' } else { 'A' };
            chars[i] = replacement;
            let tampered: String = chars.into_iter().collect();
            match Address::decode(&tampered, Network::Devnet) {
                Err(_) => {}
                Ok(decoded) => panic!(
                    "tampering at {} decoded successfully: {:?}",
                    i, decoded
                ),
            }
        }
    }

    #[test]
    fn truncated_body_fails() {
        let addr = test_address();
        let encoded = addr.encode();
        let truncated = &encoded[..encoded.len() - 4];
        assert!(Address::decode(truncated, Network::Devnet).is_err());
    }

    #[test]
    fn trailing_garbage_fails() {
        // Re-encode a valid body with extra bytes appended before the
        // checksum; the reader must reject the leftover.
        let addr = Address::from_public_key(Network::Devnet, Keypair::generate().public);
        let mut w = BufferWriter::new();
        w.write_uvarint(0);
        w.write_bytes(addr.public_key.as_bytes());
        w.write_byte(0);
        w.write_byte(0xaa); // trailing garbage
        let mut body = w.into_bytes();
        let sum = checksum(&body);
        body.extend_from_slice(&sum);
        let encoded = format!("{}{}", Network::Devnet.prefix(), engine().encode(&body));
        assert_eq!(
            Address::decode(&encoded, Network::Devnet),
            Err(AddressError::InvalidLength)
        );
    }

    #[test]
    fn unknown_integration_bit_fails() {
        let addr = Address::from_public_key(Network::Devnet, Keypair::generate().public);
        let mut w = BufferWriter::new();
        w.write_uvarint(0);
        w.write_bytes(addr.public_key.as_bytes());
        w.write_byte(FLAG_KNOWN_MASK + 0x10);
        let mut body = w.into_bytes();
        let sum = checksum(&body);
        body.extend_from_slice(&sum);
        let encoded = format!("{}{}", Network::Devnet.prefix(), engine().encode(&body));
        assert_eq!(
            Address::decode(&encoded, Network::Devnet),
            Err(AddressError::InvalidVersion)
        );
    }

    #[test]
    fn unknown_version_fails() {
        let mut w = BufferWriter::new();
        w.write_uvarint(7);
        let mut body = w.into_bytes();
        let sum = checksum(&body);
        body.extend_from_slice(&sum);
        let encoded = format!("{}{}", Network::Devnet.prefix(), engine().encode(&body));
        assert_eq!(
            Address::decode(&encoded, Network::Devnet),
            Err(AddressError::InvalidVersion)
        );
    }

    #[test]
    fn signed_message_verifies() {
        let kp = Keypair::generate();
        let addr = Address::from_public_key(Network::Devnet, kp.public);
        let sig = kp.sign(b"caligo.message", b"hello");
        assert!(addr.verify_signed_message(b"hello", &sig));
        assert!(!addr.verify_signed_message(b"world", &sig));
    }

    #[test]
    fn amount_zero_roundtrips() {
        let mut addr = test_address();
        addr.payment_amount = Some(0);
        let decoded = Address::decode(&addr.encode(), Network::Devnet).unwrap();
        assert_eq!(decoded.payment_amount, Some(0));
    }
}
