//! Minted access tokens for the Lightning rail.
//!
//! The identifier binds the token to one invoice: scheme version (2
//! bytes, big-endian), the invoice's 32-byte payment hash, and 32 fresh
//! random bytes. The MAC is the standard macaroon HMAC-SHA256 chain under
//! the persistent root key; v1 adds no caveats, so the chain is a single
//! step. Redemption additionally requires the preimage whose hash the
//! identifier embeds.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const L402_VERSION: u16 = 0;

const SERIAL_VERSION: u8 = 1;
const IDENTIFIER_LEN: usize = 2 + 32 + 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macaroon {
    location: String,
    identifier: Vec<u8>,
    signature: [u8; 32],
}

impl Macaroon {
    /// Mint a token bound to an invoice payment hash.
    pub fn mint(root_key: &[u8; 32], payment_hash: &[u8; 32], location: &str) -> Self {
        let mut identifier = Vec::with_capacity(IDENTIFIER_LEN);
        identifier.extend_from_slice(&L402_VERSION.to_be_bytes());
        identifier.extend_from_slice(payment_hash);
        let mut token_id = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut token_id);
        identifier.extend_from_slice(&token_id);

        let signature = chain_mac(root_key, &identifier);
        Self {
            location: location.to_string(),
            identifier,
            signature,
        }
    }

    /// Recompute the MAC chain and compare in constant time.
    pub fn verify(&self, root_key: &[u8; 32]) -> bool {
        let mut mac = HmacSha256::new_from_slice(root_key).expect("any key length accepted");
        mac.update(&self.identifier);
        mac.verify_slice(&self.signature).is_ok()
    }

    /// The payment hash embedded in the identifier.
    pub fn payment_hash(&self) -> Option<[u8; 32]> {
        if self.identifier.len() != IDENTIFIER_LEN {
            return None;
        }
        let version = u16::from_be_bytes([self.identifier[0], self.identifier[1]]);
        if version != L402_VERSION {
            return None;
        }
        self.identifier[2..34].try_into().ok()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let location = self.location.as_bytes();
        let mut out = Vec::with_capacity(1 + 2 + location.len() + 2 + self.identifier.len() + 32);
        out.push(SERIAL_VERSION);
        out.extend_from_slice(&(location.len() as u16).to_be_bytes());
        out.extend_from_slice(location);
        out.extend_from_slice(&(self.identifier.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.identifier);
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Option<Self> {
        if bytes.first() != Some(&SERIAL_VERSION) {
            return None;
        }
        let mut at = 1;
        let location_len = u16::from_be_bytes(take(bytes, &mut at, 2)?.try_into().ok()?) as usize;
        let location = String::from_utf8(take(bytes, &mut at, location_len)?.to_vec()).ok()?;
        let identifier_len =
            u16::from_be_bytes(take(bytes, &mut at, 2)?.try_into().ok()?) as usize;
        let identifier = take(bytes, &mut at, identifier_len)?.to_vec();
        let signature: [u8; 32] = take(bytes, &mut at, 32)?.try_into().ok()?;
        if at != bytes.len() {
            return None;
        }
        Some(Self {
            location,
            identifier,
            signature,
        })
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.serialize())
    }

    /// Decode a presented credential, accepting hex or base64.
    pub fn from_token(token: &str) -> Option<Self> {
        let bytes = hex::decode(token)
            .ok()
            .or_else(|| BASE64.decode(token).ok())?;
        Self::deserialize(&bytes)
    }
}

fn take<'a>(bytes: &'a [u8], at: &mut usize, n: usize) -> Option<&'a [u8]> {
    let slice = bytes.get(*at..*at + n)?;
    *at += n;
    Some(slice)
}

fn chain_mac(root_key: &[u8; 32], identifier: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(root_key).expect("any key length accepted");
    mac.update(identifier);
    mac.finalize().into_bytes().into()
}
