//! # Payload Encryption Seam
//!
//! The heap encrypts object ids and payloads through the [`Cipher`] trait so
//! the scheme can be swapped without touching the storage layer. The default
//! [`XorCipher`] applies a repeating-key XOR, which makes `encrypt` and
//! `decrypt` the same operation. An empty key degenerates to the one-byte
//! key `[0]`, and since `a ^ 0 == a` that is equivalent to no encryption at
//! all.
//!
//! Ids are encrypted before they are stored or hashed into bucket keys, so
//! the same clear id written under different keys lands in different
//! buckets. That is what lets multiple keys share one file without seeing
//! each other's objects.

/// Byte-buffer encryption policy used by the heap for ids and payloads.
pub trait Cipher {
    /// Writes the encrypted form of `input` into `output`. Both buffers have
    /// the same length; in-place operation is allowed.
    fn encrypt_into(&self, input: &[u8], output: &mut [u8]);

    /// Inverse of [`Cipher::encrypt_into`].
    fn decrypt_into(&self, input: &[u8], output: &mut [u8]);

    fn encrypt(&self, input: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; input.len()];
        self.encrypt_into(input, &mut out);
        out
    }

    fn decrypt(&self, input: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; input.len()];
        self.decrypt_into(input, &mut out);
        out
    }
}

/// Repeating-key XOR. Symmetric, so encryption and decryption coincide.
#[derive(Debug, Clone)]
pub struct XorCipher {
    key: Vec<u8>,
}

impl XorCipher {
    /// An empty key is replaced by the one-byte key `[0]`, the identity.
    pub fn new(key: &[u8]) -> Self {
        let key = if key.is_empty() {
            vec![0]
        } else {
            key.to_vec()
        };
        Self { key }
    }

    fn xor_into(&self, input: &[u8], output: &mut [u8]) {
        debug_assert_eq!(input.len(), output.len());

        for (i, (&src, dst)) in input.iter().zip(output.iter_mut()).enumerate() {
            *dst = src ^ self.key[i % self.key.len()];
        }
    }
}

impl Cipher for XorCipher {
    fn encrypt_into(&self, input: &[u8], output: &mut [u8]) {
        self.xor_into(input, output);
    }

    fn decrypt_into(&self, input: &[u8], output: &mut [u8]) {
        self.xor_into(input, output);
    }
}
