//! 双哈希 Bloom Filter，等值 / IN 查询快速过滤
//!
//! 第 i 个探测位 = (h1 + i·h2) mod num_bits。哈希只依赖输入字节，落盘后跨进程稳定。

use crate::common::{OlapError, Result};
use crate::pb::BloomFilterPb;

const MIN_BITS:   u64 = 64;
const MAX_HASHES: u32 = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    bits:       Vec<u8>,
    num_bits:   u64,
    num_hashes: u32,
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in data {
        h ^= b as u64;
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

/// murmur3 fmix64
fn mix(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

impl BloomFilter {
    /// 按期望基数与每 key 位数创建
    pub fn new(expected_ndv: usize, bits_per_key: usize) -> Self {
        let num_bits   = ((expected_ndv * bits_per_key) as u64).max(MIN_BITS);
        let num_bytes  = ((num_bits + 7) / 8) as usize;
        // k = bits_per_key · ln2
        let num_hashes = ((bits_per_key as f64 * std::f64::consts::LN_2).round() as u32).clamp(1, MAX_HASHES);
        Self { bits: vec![0u8; num_bytes], num_bits, num_hashes }
    }

    fn bit_positions(&self, value: &[u8]) -> impl Iterator<Item = u64> {
        let h1 = fnv1a(value);
        let h2 = mix(h1) | 1;
        let nb = self.num_bits;
        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % nb)
    }

    pub fn add(&mut self, value: &[u8]) {
        let bits: Vec<u64> = self.bit_positions(value).collect();
        for bit in bits {
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    pub fn may_contain(&self, value: &[u8]) -> bool {
        self.bit_positions(value).all(|bit| self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0)
    }

    pub fn to_pb(&self) -> BloomFilterPb {
        BloomFilterPb { num_bits: self.num_bits, num_hashes: self.num_hashes, bits: self.bits.clone() }
    }

    pub fn from_pb(pb: BloomFilterPb) -> Result<Self> {
        let expected = ((pb.num_bits + 7) / 8) as usize;
        if pb.num_bits == 0 || pb.bits.len() != expected || pb.num_hashes == 0 || pb.num_hashes > MAX_HASHES {
            return Err(OlapError::Corruption(format!(
                "bloom filter header bits={} bytes={} hashes={}", pb.num_bits, pb.bits.len(), pb.num_hashes
            )));
        }
        Ok(Self { bits: pb.bits, num_bits: pb.num_bits, num_hashes: pb.num_hashes })
    }
}
