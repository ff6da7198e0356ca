use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use md5::Md5;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{PronoteError, Result};

pub const BLOCK_SIZE: usize = 16;

pub type AesKey = [u8; 16];
pub type AesIv = [u8; 16];

// Public half of the server's bootstrap key (1024 bits)
const RSA_1024_MODULUS: &str = "130337874517286041778445012253514395801341480334668979416920989365464528904618150245388048105865059387076357492684573172203245221386376405947824377827224846860699130638566643129067735803555082190977267155957271492183684665050351182476506458843580431717209261903043895605014125081521285387341454154194253026277";
const RSA_1024_EXPONENT: u64 = 65537;

const PADDING_ERROR: &str =
    "decryption failed while removing padding (probably bad credentials or an expired token)";

/// Append PKCS7 padding. Block-aligned input gets a full padding block.
pub fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let padding = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut padded = Vec::with_capacity(data.len() + padding);
    padded.extend_from_slice(data);
    padded.resize(data.len() + padding, padding as u8);
    padded
}

/// Strip and validate PKCS7 padding
pub fn pkcs7_unpad(data: &[u8]) -> Result<Vec<u8>> {
    let padding = *data.last().ok_or_else(|| PronoteError::crypto(PADDING_ERROR))? as usize;
    if padding == 0 || padding > BLOCK_SIZE || padding > data.len() {
        return Err(PronoteError::crypto(PADDING_ERROR));
    }
    let (plain, pad) = data.split_at(data.len() - padding);
    if pad.iter().any(|&b| b as usize != padding) {
        return Err(PronoteError::crypto(PADDING_ERROR));
    }
    Ok(plain.to_vec())
}

/// AES-128-CBC with PKCS7 padding
pub fn aes_encrypt(key: &AesKey, iv: &AesIv, plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let padded = pkcs7_pad(plaintext);
    let mut out = Vec::with_capacity(padded.len());
    let mut prev = *iv;

    for chunk in padded.chunks_exact(BLOCK_SIZE) {
        let mut block = Block::clone_from_slice(chunk);
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        cipher.encrypt_block(&mut block);
        prev.copy_from_slice(&block);
        out.extend_from_slice(&block);
    }
    out
}

/// AES-128-CBC decryption followed by padding validation
pub fn aes_decrypt(key: &AesKey, iv: &AesIv, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(PronoteError::crypto(format!(
            "ciphertext length {} is not a positive multiple of {}",
            ciphertext.len(),
            BLOCK_SIZE
        )));
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = Vec::with_capacity(ciphertext.len());
    let mut prev = *iv;

    for chunk in ciphertext.chunks_exact(BLOCK_SIZE) {
        let mut block = Block::clone_from_slice(chunk);
        cipher.decrypt_block(&mut block);
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        out.extend_from_slice(&block);
        prev.copy_from_slice(chunk);
    }
    pkcs7_unpad(&out)
}

/// One-way digest of arbitrary material to an AES key (MD5, as the server expects)
pub fn derive_key(material: &[u8]) -> AesKey {
    let digest = Md5::digest(material);
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest);
    key
}

/// Uppercase hex SHA-256, the password hash format of the login handshake
pub fn sha256_hex_upper(input: &str) -> String {
    hex::encode_upper(Sha256::digest(input.as_bytes()))
}

/// PKCS1 v1.5 encryption under the embedded bootstrap public key
pub fn rsa_encrypt(data: &[u8]) -> Result<Vec<u8>> {
    let modulus = BigUint::parse_bytes(RSA_1024_MODULUS.as_bytes(), 10)
        .ok_or_else(|| PronoteError::crypto("invalid embedded RSA modulus"))?;
    let public_key = RsaPublicKey::new(modulus, BigUint::from(RSA_1024_EXPONENT))
        .map_err(|e| PronoteError::crypto(format!("invalid embedded RSA key: {e}")))?;

    public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, data)
        .map_err(|e| PronoteError::crypto(format!("RSA encryption failed: {e}")))
}

/// Symmetric state of one session: current key and IV plus the temporary IV
/// drawn once at bootstrap.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoState {
    key: AesKey,
    iv: AesIv,
    iv_temp: AesIv,
}

impl CryptoState {
    /// Fresh state: default key (digest of empty input), zero IV, random temporary IV
    pub fn new() -> Self {
        let mut iv_temp = [0u8; 16];
        OsRng.fill_bytes(&mut iv_temp);
        Self::with_iv_temp(iv_temp)
    }

    pub fn with_iv_temp(iv_temp: AesIv) -> Self {
        Self {
            key: derive_key(&[]),
            iv: [0u8; 16],
            iv_temp,
        }
    }

    pub fn key(&self) -> &AesKey {
        &self.key
    }

    pub fn iv(&self) -> &AesIv {
        &self.iv
    }

    pub fn iv_temp(&self) -> &AesIv {
        &self.iv_temp
    }

    pub fn set_key(&mut self, key: AesKey) {
        self.key = key;
    }

    pub fn set_iv(&mut self, iv: AesIv) {
        self.iv = iv;
    }

    /// IV the server switches to after the parameter negotiation
    pub fn bootstrap_iv(&self) -> AesIv {
        derive_key(&self.iv_temp)
    }

    /// Base64 `Uuid` sent to the negotiation endpoint: the temporary IV,
    /// RSA-encrypted when the server asks for it.
    pub fn uuid_payload(&self, use_rsa: bool) -> Result<String> {
        if use_rsa {
            Ok(BASE64.encode(rsa_encrypt(&self.iv_temp)?))
        } else {
            Ok(BASE64.encode(self.iv_temp))
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        aes_encrypt(&self.key, &self.iv, plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        aes_decrypt(&self.key, &self.iv, ciphertext)
    }
}

impl Default for CryptoState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CryptoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoState").finish_non_exhaustive()
    }
}
