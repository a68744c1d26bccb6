//! 压缩/解压（LZ4 / None）
//!
//! 压缩是 page 级的可插拔变换：page 层只依赖 `BlockCompressionCodec`。

use crate::common::{OlapError, Result};
use crate::field_type::CompressionType;

pub trait BlockCompressionCodec: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>>;
}

pub struct NoCompression;

impl BlockCompressionCodec for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> { Ok(data.to_vec()) }

    fn decompress(&self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
        if data.len() != uncompressed_len {
            return Err(OlapError::Corruption(format!(
                "uncompressed page has {} bytes, header says {uncompressed_len}", data.len()
            )));
        }
        Ok(data.to_vec())
    }
}

pub struct Lz4Codec;

impl BlockCompressionCodec for Lz4Codec {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(data, None, false)
            .map_err(|e| OlapError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
        let size = i32::try_from(uncompressed_len)
            .map_err(|_| OlapError::Corruption(format!("page size {uncompressed_len} too large")))?;
        let out = lz4::block::decompress(data, Some(size))
            .map_err(|e| OlapError::Corruption(format!("lz4 decompress failed: {e}")))?;
        if out.len() != uncompressed_len {
            return Err(OlapError::Corruption(format!(
                "lz4 produced {} bytes, expected {uncompressed_len}", out.len()
            )));
        }
        Ok(out)
    }
}

pub fn codec_for(codec: CompressionType) -> &'static dyn BlockCompressionCodec {
    match codec {
        CompressionType::None => &NoCompression,
        CompressionType::Lz4  => &Lz4Codec,
    }
}

pub fn compress(data: &[u8], codec: CompressionType) -> Result<Vec<u8>> {
    codec_for(codec).compress(data)
}

pub fn decompress(
    data:             &[u8],
    codec:            CompressionType,
    uncompressed_len: usize,
) -> Result<Vec<u8>> {
    codec_for(codec).decompress(data, uncompressed_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_restores_input() {
        let data: Vec<u8> = (0..4096u32).flat_map(|i| (i % 17).to_le_bytes()).collect();
        let packed = compress(&data, CompressionType::Lz4).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed, CompressionType::Lz4, data.len()).unwrap(), data);
    }

    #[test]
    fn garbage_is_corruption() {
        let err = decompress(&[0xff, 0xff, 0xff], CompressionType::Lz4, 64).unwrap_err();
        assert!(err.is_corruption());
        assert!(decompress(b"abc", CompressionType::None, 4).unwrap_err().is_corruption());
    }
}
