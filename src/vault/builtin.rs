//! Envelope encryption for inline ciphertext fields (`ExternalAgent.encrypted_credentials`,
//! `SSOConnection.client_secret_encrypted`). DEK/KEK pattern: a fresh random DEK encrypts the
//! plaintext, the DEK itself is encrypted with the process-wide KEK, and the plaintext DEK is
//! zeroed immediately after use.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroize;

pub type EncryptedBlob = (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>);

pub struct VaultCrypto {
    kek: [u8; 32],
}

impl VaultCrypto {
    pub fn new(master_key_hex: &str) -> anyhow::Result<Self> {
        let kek = parse_master_key(master_key_hex)?;
        Ok(Self { kek })
    }

    /// Encrypts a plaintext string using envelope encryption.
    /// Returns (encrypted_dek, dek_nonce, encrypted_secret, secret_nonce).
    pub fn encrypt_string(&self, plaintext: &str) -> anyhow::Result<EncryptedBlob> {
        let mut dek = [0u8; 32];
        OsRng.fill_bytes(&mut dek);

        let secret_cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let secret_nonce_bytes = generate_nonce();
        let secret_nonce = Nonce::from_slice(&secret_nonce_bytes);
        let encrypted_secret = secret_cipher
            .encrypt(secret_nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("secret encryption failed: {}", e))?;

        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_nonce_bytes = generate_nonce();
        let dek_nonce = Nonce::from_slice(&dek_nonce_bytes);
        let encrypted_dek = kek_cipher
            .encrypt(dek_nonce, dek.as_ref())
            .map_err(|e| anyhow::anyhow!("DEK encryption failed: {}", e))?;

        dek.zeroize();

        Ok((
            encrypted_dek,
            dek_nonce_bytes.to_vec(),
            encrypted_secret,
            secret_nonce_bytes.to_vec(),
        ))
    }

    /// Decrypts a secret using envelope decryption.
    pub fn decrypt_string(
        &self,
        encrypted_dek: &[u8],
        dek_nonce: &[u8],
        encrypted_secret: &[u8],
        secret_nonce: &[u8],
    ) -> anyhow::Result<String> {
        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let d_nonce = Nonce::from_slice(dek_nonce);
        let dek_bytes = kek_cipher
            .decrypt(d_nonce, encrypted_dek)
            .map_err(|e| anyhow::anyhow!("DEK decryption failed: {}", e))?;

        let mut dek = [0u8; 32];
        dek.copy_from_slice(&dek_bytes);

        let secret_cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let s_nonce = Nonce::from_slice(secret_nonce);
        let plaintext_bytes = secret_cipher
            .decrypt(s_nonce, encrypted_secret)
            .map_err(|e| anyhow::anyhow!("secret decryption failed: {}", e))?;

        dek.zeroize();

        Ok(String::from_utf8(plaintext_bytes)?)
    }

    /// Packs the four envelope components into the single blob stored in
    /// `encrypted_credentials`/`client_secret_encrypted` columns: four
    /// length-prefixed (u32 LE) segments in encrypt_string's return order.
    pub fn encrypt_to_blob(&self, plaintext: &str) -> anyhow::Result<Vec<u8>> {
        let (enc_dek, dek_nonce, enc_secret, secret_nonce) = self.encrypt_string(plaintext)?;
        let mut out = Vec::with_capacity(
            16 + enc_dek.len() + dek_nonce.len() + enc_secret.len() + secret_nonce.len(),
        );
        for part in [&enc_dek, &dek_nonce, &enc_secret, &secret_nonce] {
            out.extend_from_slice(&(part.len() as u32).to_le_bytes());
            out.extend_from_slice(part);
        }
        Ok(out)
    }

    pub fn decrypt_from_blob(&self, blob: &[u8]) -> anyhow::Result<String> {
        let mut cursor = blob;
        let mut parts = Vec::with_capacity(4);
        for _ in 0..4 {
            if cursor.len() < 4 {
                anyhow::bail!("truncated encrypted blob");
            }
            let len = u32::from_le_bytes(cursor[..4].try_into().unwrap()) as usize;
            cursor = &cursor[4..];
            if cursor.len() < len {
                anyhow::bail!("truncated encrypted blob");
            }
            parts.push(cursor[..len].to_vec());
            cursor = &cursor[len..];
        }
        self.decrypt_string(&parts[0], &parts[1], &parts[2], &parts[3])
    }
}

fn generate_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn parse_master_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    if hex.len() != 64 {
        anyhow::bail!(
            "KAIZEN_MASTER_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        );
    }
    let bytes = hex::decode(hex)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn encryption_roundtrip() {
        let crypto = VaultCrypto::new(TEST_KEY).unwrap();
        let secret = "sk_live_123456789";
        let (enc_dek, dek_nonce, enc_secret, secret_nonce) = crypto.encrypt_string(secret).unwrap();
        let decrypted = crypto
            .decrypt_string(&enc_dek, &dek_nonce, &enc_secret, &secret_nonce)
            .unwrap();
        assert_eq!(decrypted, secret);
    }

    #[test]
    fn blob_roundtrip() {
        let crypto = VaultCrypto::new(TEST_KEY).unwrap();
        let blob = crypto.encrypt_to_blob("discord-bot-token").unwrap();
        assert_eq!(crypto.decrypt_from_blob(&blob).unwrap(), "discord-bot-token");
    }

    #[test]
    fn rejects_short_master_key() {
        assert!(parse_master_key("deadbeef").is_err());
    }
}
