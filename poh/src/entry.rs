//! A single entry (one "tick") in the Proof of History sequence.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sealane_sdk::hash::{Hash, Hasher, HASH_BYTES};
use sealane_sdk::SdkError;
use std::io::Read;

/// One link of the hash chain. The entry's hash commits to the previous
/// entry's hash and to every mixed-in fingerprint, in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PohEntry {
    pub hash: Hash,
    pub sequence: u64,
    /// wall-clock nanoseconds since the unix epoch, strictly increasing
    pub timestamp_ns: i64,
    pub mixed: Vec<Hash>,
}

impl PohEntry {
    /// The hash this entry must carry given its predecessor's hash and its
    /// own mixed data.
    pub fn expected_hash(prev_hash: &Hash, mixed: &[Hash]) -> Hash {
        let mut hasher = Hasher::default();
        hasher.hash(prev_hash.as_ref());
        for data in mixed {
            hasher.hash(data.as_ref());
        }
        hasher.result()
    }

    /// True iff this entry is a valid successor of `prev`: the sequence
    /// advances by one, time moves forward, and the hash chain holds.
    pub fn verify_from_previous(&self, prev: &PohEntry) -> bool {
        self.sequence == prev.sequence + 1
            && self.timestamp_ns > prev.timestamp_ns
            && self.hash == Self::expected_hash(&prev.hash, &self.mixed)
    }

    /// Serialize to the exchange layout: hash (32), seq (LE u64),
    /// timestamp (LE i64, ns), mix_count (LE u32), mixed hashes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut wr = Vec::with_capacity(HASH_BYTES + 8 + 8 + 4 + HASH_BYTES * self.mixed.len());
        wr.extend_from_slice(self.hash.as_ref());
        wr.write_u64::<LittleEndian>(self.sequence).expect("vec write");
        wr.write_i64::<LittleEndian>(self.timestamp_ns)
            .expect("vec write");
        wr.write_u32::<LittleEndian>(self.mixed.len() as u32)
            .expect("vec write");
        for data in &self.mixed {
            wr.extend_from_slice(data.as_ref());
        }
        wr
    }

    pub fn deserialize(input: &[u8]) -> Result<Self, SdkError> {
        const FIXED: usize = HASH_BYTES + 8 + 8 + 4;
        if input.len() < FIXED {
            return Err(SdkError::Truncated {
                needed: FIXED,
                had: input.len(),
            });
        }
        let mut rd = input;
        let mut hash = [0u8; HASH_BYTES];
        rd.read_exact(&mut hash).expect("length checked");
        let sequence = rd.read_u64::<LittleEndian>().expect("length checked");
        let timestamp_ns = rd.read_i64::<LittleEndian>().expect("length checked");
        let mix_count = rd.read_u32::<LittleEndian>().expect("length checked") as usize;
        let needed = FIXED + mix_count * HASH_BYTES;
        if input.len() < needed {
            return Err(SdkError::Truncated {
                needed,
                had: input.len(),
            });
        }
        let mut mixed = Vec::with_capacity(mix_count);
        for _ in 0..mix_count {
            let mut data = [0u8; HASH_BYTES];
            rd.read_exact(&mut data).expect("length checked");
            mixed.push(Hash::new_from_array(data));
        }
        Ok(Self {
            hash: Hash::new_from_array(hash),
            sequence,
            timestamp_ns,
            mixed,
        })
    }
}
