//! Hash slot calculation.
//!
//! Redis Cluster maps every key to one of 16384 slots with CRC16 (XMODEM)
//! of the key, or of its hash tag when the key contains `{tag}`.

/// Total number of hash slots in a cluster.
pub const CLUSTER_SLOTS: u16 = 16384;

const CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, byte| {
        let index = ((crc >> 8) ^ (*byte as u16)) as usize;
        (crc << 8) ^ CRC16_TABLE[index & 0xff]
    })
}

/// Calculate the hash slot for a key, honouring hash tags.
pub fn key_slot(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) % CLUSTER_SLOTS
}

/// The portion of the key between the first `{` and the following `}`,
/// or the whole key when there is no non-empty tag.
fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[start + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[start + 1..start + 1 + len];
            }
        }
    }
    key
}

/// An inclusive range of hash slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    /// Start slot (inclusive).
    pub start: u16,
    /// End slot (inclusive).
    pub end: u16,
}

impl SlotRange {
    /// Create a new slot range, clamped to the slot space.
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start: start.min(CLUSTER_SLOTS - 1),
            end: end.min(CLUSTER_SLOTS - 1),
        }
    }

    /// Every slot in the cluster.
    pub fn full() -> Self {
        Self::new(0, CLUSTER_SLOTS - 1)
    }

    /// Check if a slot is contained in this range.
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Parse a `CLUSTER NODES` slot token: `5461`, `0-5460`.
    ///
    /// Migration markers such as `[93->-node]` are not ownership and yield `None`.
    pub fn parse(token: &str) -> Option<Self> {
        if token.starts_with('[') {
            return None;
        }
        match token.split_once('-') {
            Some((start, end)) => Some(Self::new(start.parse().ok()?, end.parse().ok()?)),
            None => token.parse().ok().map(|slot| Self::new(slot, slot)),
        }
    }
}
