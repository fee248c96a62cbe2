//! # Blob Envelope
//!
//! A blob is the on-disk envelope holding one id+payload pair inside the
//! region a [`Record`](super::Record) describes:
//!
//! ```text
//! +---------+-----------------+----------+-----------+-----------------+
//! | u8 idn  | id bytes (idn)  | u32 hash | u32 plen  | payload (plen)  |
//! +---------+-----------------+----------+-----------+-----------------+
//! ```
//!
//! Multi-byte fields are big-endian. The hash is djb2-xor over the payload
//! bytes as stored, so over the ciphertext when encryption is in use.
//!
//! Payload bytes move through the [`PayloadSource`] and [`PayloadSink`]
//! capability traits so that the envelope stays encryption-agnostic: the
//! heap passes adapters that encrypt on the way in and decrypt on the way
//! out, and the payload is only traversed once in each direction.

/// Envelope bytes besides the id and payload: id length, hash, payload
/// length.
pub const BLOB_OVERHEAD: usize = 1 + 4 + 4;

/// Supplies payload bytes for [`BlobMut::write`], writing them straight into
/// the mapped region.
pub trait PayloadSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes exactly [`PayloadSource::len`] bytes into `dest`.
    fn fill(&self, dest: &mut [u8]);
}

/// Receives the verified payload bytes from [`Blob::read_payload`].
pub trait PayloadSink {
    fn consume(&mut self, src: &[u8]);
}

/// Read-only view over one blob region. The slice must cover exactly the
/// record's capacity.
pub struct Blob<'a> {
    buf: &'a [u8],
}

impl<'a> Blob<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Compares the stored id against `id`, byte for byte. Pure in-memory;
    /// no hash is computed.
    pub fn has_id(&self, id: &[u8]) -> bool {
        let Some(&id_len) = self.buf.first() else {
            return false;
        };
        let id_len = usize::from(id_len);

        if id.len() != id_len || 1 + id_len > self.buf.len() {
            return false;
        }

        &self.buf[1..1 + id_len] == id
    }

    /// Reads the payload, handing it to `sink` only after every field passed
    /// its bounds check and the stored hash matched. Returns false on any
    /// violation without invoking the sink; the blob is left untouched on
    /// disk either way.
    pub fn read_payload(&self, sink: &mut dyn PayloadSink) -> bool {
        let rec_size = self.buf.len();
        let Some(&id_len) = self.buf.first() else {
            return false;
        };
        let id_len = usize::from(id_len);

        if id_len + BLOB_OVERHEAD > rec_size {
            return false;
        }

        let hash_at = 1 + id_len;
        let stored_hash = read_u32(self.buf, hash_at);
        let payload_len = read_u32(self.buf, hash_at + 4) as usize;

        if payload_len > rec_size - BLOB_OVERHEAD - id_len {
            return false; // possible corruption
        }

        let payload = &self.buf[hash_at + 8..hash_at + 8 + payload_len];
        if hash(payload) != stored_hash {
            return false;
        }

        sink.consume(payload);
        true
    }
}

/// Writable view over one blob region.
pub struct BlobMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> BlobMut<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    /// Lays out the envelope and payload in place.
    ///
    /// Fields are written in order (id length, id, hash placeholder, payload
    /// length, payload); the hash is computed over the just-written payload
    /// bytes and back-patched, so the source streams directly into the
    /// mapped region and nothing is traversed twice.
    ///
    /// Returns false when the id exceeds 255 bytes, the payload exceeds
    /// `u32::MAX` bytes, or the envelope would not fit the region.
    pub fn write(&mut self, id: &[u8], source: &dyn PayloadSource) -> bool {
        let payload_len = source.len();

        if id.len() > usize::from(u8::MAX) || payload_len > u32::MAX as usize {
            return false;
        }
        if BLOB_OVERHEAD + id.len() + payload_len > self.buf.len() {
            return false;
        }

        self.buf[0] = id.len() as u8;
        self.buf[1..1 + id.len()].copy_from_slice(id);

        let hash_at = 1 + id.len();
        let len_at = hash_at + 4;
        let payload_at = len_at + 4;

        self.buf[len_at..len_at + 4].copy_from_slice(&(payload_len as u32).to_be_bytes());
        source.fill(&mut self.buf[payload_at..payload_at + payload_len]);

        let h = hash(&self.buf[payload_at..payload_at + payload_len]);
        self.buf[hash_at..hash_at + 4].copy_from_slice(&h.to_be_bytes());
        true
    }
}

/// Bytes a blob with the given id and payload lengths occupies on disk.
pub fn size_for(id_len: usize, payload_len: usize) -> usize {
    BLOB_OVERHEAD + id_len + payload_len
}

/// djb2 hash with the XOR substitution, computed in 32 bits with
/// wraparound. Used for payload integrity and for bucketing ids.
pub fn hash(bytes: &[u8]) -> u32 {
    let mut h: u32 = 5381;
    for &b in bytes {
        h = (h.wrapping_shl(5)).wrapping_add(h) ^ u32::from(b);
    }
    h
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(buf[at..at + 4].try_into().unwrap())
}
