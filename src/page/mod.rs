//! Data Page / Index Page 读写
//!
//! Data page：
//! ```text
//! ┌──────────────────────────────────┐
//! │ value_count  (u32 LE)            │  含 Null 在内的行数
//! │ first_row_id (u32 LE)            │
//! │ uncomp_size  (u32 LE)            │
//! │ has_nulls    (u8)                │
//! │ [null_bitmap len (u32 LE) + bits]│  仅 has_nulls = 1
//! │ data         (encoded+compressed)│  只含非 Null 值
//! │ CRC32        (u32 LE)            │
//! └──────────────────────────────────┘
//! ```
//!
//! Index page：`prost body + CRC32 (u32 LE)`。

use std::io::{Cursor, Write};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::common::{OlapError, Result};
use crate::compression;
use crate::encoding;
use crate::field_type::{CompressionType, EncodingType, FieldType, Value};
use crate::io::FileReader;
use crate::pb::PagePointerPb;

const PAGE_HEADER_SIZE: usize = 13;
const CHECKSUM_SIZE:    usize = 4;

// ── PagePointer ───────────────────────────────────────────────────────────────

/// page 在 segment 文件中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PagePointer {
    pub offset: u64,
    pub size:   u32,
}

impl PagePointer {
    pub fn new(offset: u64, size: u32) -> Self { Self { offset, size } }

    /// 读出 page 的全部字节
    pub fn read(&self, file: &dyn FileReader) -> Result<Vec<u8>> {
        file.read_at(self.offset, self.size as usize)
    }
}

impl From<PagePointer> for PagePointerPb {
    fn from(p: PagePointer) -> Self {
        Self { offset: p.offset, size: p.size }
    }
}

impl From<&PagePointerPb> for PagePointer {
    fn from(pb: &PagePointerPb) -> Self {
        Self { offset: pb.offset, size: pb.size }
    }
}

// ── PageBuilder ───────────────────────────────────────────────────────────────

pub struct PageBuilder {
    pub first_row_id: u32,
    field_type:       FieldType,
    encoding:         EncodingType,
    compression:      CompressionType,
    max_rows:         usize,
    values:           Vec<Value>,
}

impl PageBuilder {
    pub fn new(
        first_row_id: u32,
        field_type:   FieldType,
        encoding:     EncodingType,
        compression:  CompressionType,
        max_rows:     usize,
    ) -> Self {
        Self { first_row_id, field_type, encoding, compression, max_rows, values: Vec::new() }
    }

    pub fn add(&mut self, v: Value) {
        self.values.push(v);
    }

    pub fn values(&self)   -> &[Value] { &self.values }
    pub fn len(&self)      -> usize    { self.values.len() }
    pub fn is_empty(&self) -> bool     { self.values.is_empty() }
    pub fn is_full(&self)  -> bool     { self.values.len() >= self.max_rows }

    /// 序列化为页字节（null bitmap → encode → compress → 加 header + CRC）
    pub fn build(self) -> Result<Vec<u8>> {
        let count     = self.values.len() as u32;
        let has_nulls = self.values.iter().any(Value::is_null);

        let mut null_bits = Vec::new();
        if has_nulls {
            null_bits = vec![0u8; (self.values.len() + 7) / 8];
            for (i, v) in self.values.iter().enumerate() {
                if v.is_null() {
                    null_bits[i / 8] |= 1 << (i % 8);
                }
            }
        }

        let non_null: Vec<Value> = self.values.into_iter().filter(|v| !v.is_null()).collect();
        let encoded     = encoding::encode(&non_null, self.encoding, self.field_type)?;
        let uncomp_size = encoded.len() as u32;
        let compressed  = compression::compress(&encoded, self.compression)?;

        let mut page = Vec::with_capacity(PAGE_HEADER_SIZE + null_bits.len() + compressed.len() + 8);
        page.extend_from_slice(&count.to_le_bytes());
        page.extend_from_slice(&self.first_row_id.to_le_bytes());
        page.extend_from_slice(&uncomp_size.to_le_bytes());
        page.push(has_nulls as u8);
        if has_nulls {
            page.extend_from_slice(&(null_bits.len() as u32).to_le_bytes());
            page.extend_from_slice(&null_bits);
        }
        page.extend_from_slice(&compressed);

        let crc = crc32fast::hash(&page);
        page.extend_from_slice(&crc.to_le_bytes());
        Ok(page)
    }
}

// ── PageDecoder ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct PageDecoder {
    pub first_row_id: u32,
    /// 按行展开，Null 行为 `Value::Null`
    pub values:       Vec<Value>,
}

impl PageDecoder {
    pub fn decode(
        data:        &[u8],
        field_type:  FieldType,
        encoding:    EncodingType,
        compression: CompressionType,
    ) -> Result<Self> {
        let body = verify_checksum(data, "data page")?;
        if body.len() < PAGE_HEADER_SIZE {
            return Err(OlapError::Corruption(format!("data page of {} bytes is too short", data.len())));
        }

        let mut cur = Cursor::new(body);
        let value_count  = cur.read_u32::<LittleEndian>().map_err(short_header)? as usize;
        let first_row_id = cur.read_u32::<LittleEndian>().map_err(short_header)?;
        let uncomp_size  = cur.read_u32::<LittleEndian>().map_err(short_header)? as usize;
        let has_nulls    = cur.read_u8().map_err(short_header)?;

        let mut nulls: Option<&[u8]> = None;
        match has_nulls {
            0 => {}
            1 => {
                let len = cur.read_u32::<LittleEndian>().map_err(short_header)? as usize;
                let pos = cur.position() as usize;
                if len != (value_count + 7) / 8 || pos + len > body.len() {
                    return Err(OlapError::Corruption(format!(
                        "null bitmap of {len} bytes does not fit page of {value_count} rows"
                    )));
                }
                nulls = Some(&body[pos..pos + len]);
                cur.set_position((pos + len) as u64);
            }
            other => {
                return Err(OlapError::Corruption(format!("bad has_nulls flag {other}")));
            }
        }

        let is_null = |i: usize| nulls.map_or(false, |bits| bits[i / 8] & (1 << (i % 8)) != 0);
        let null_count = (0..value_count).filter(|&i| is_null(i)).count();

        let payload = &body[cur.position() as usize..];
        let raw     = compression::decompress(payload, compression, uncomp_size)?;
        let mut dense = encoding::decode(&raw, encoding, field_type, value_count - null_count)?
            .into_iter();

        let mut values = Vec::with_capacity(value_count);
        for i in 0..value_count {
            if is_null(i) {
                values.push(Value::Null);
            } else {
                let v = dense.next().ok_or_else(|| {
                    OlapError::Corruption(format!("data page ran out of values at row {i}"))
                })?;
                values.push(v);
            }
        }
        Ok(Self { first_row_id, values })
    }
}

fn short_header(e: std::io::Error) -> OlapError {
    OlapError::Corruption(format!("truncated page header: {e}"))
}

/// 校验尾部 CRC32，返回去掉校验和后的正文
fn verify_checksum<'a>(data: &'a [u8], what: &str) -> Result<&'a [u8]> {
    if data.len() < CHECKSUM_SIZE {
        return Err(OlapError::Corruption(format!("{what} of {} bytes has no checksum", data.len())));
    }
    let (body, tail) = data.split_at(data.len() - CHECKSUM_SIZE);
    let stored = Cursor::new(tail).read_u32::<LittleEndian>().map_err(short_header)?;
    let actual = crc32fast::hash(body);
    if stored != actual {
        return Err(OlapError::Corruption(format!(
            "{what} checksum mismatch: stored={stored:#010x} actual={actual:#010x}"
        )));
    }
    Ok(body)
}

// ── PageSink ──────────────────────────────────────────────────────────────────

/// 顺序写出 page 并记录每个 page 的文件偏移
pub struct PageSink<W: Write> {
    inner:  W,
    offset: u64,
}

impl<W: Write> PageSink<W> {
    pub fn new(inner: W) -> Self { Self { inner, offset: 0 } }

    pub fn offset(&self) -> u64 { self.offset }

    pub fn append(&mut self, bytes: &[u8]) -> Result<PagePointer> {
        let size = u32::try_from(bytes.len())
            .map_err(|_| OlapError::InvalidArgument(format!("page of {} bytes is too large", bytes.len())))?;
        self.inner.write_all(bytes)?;
        let ptr = PagePointer::new(self.offset, size);
        self.offset += bytes.len() as u64;
        Ok(ptr)
    }

    pub fn into_inner(self) -> W { self.inner }
}

// ── Index page ────────────────────────────────────────────────────────────────

pub fn build_index_page<M: prost::Message>(msg: &M) -> Vec<u8> {
    let mut page = msg.encode_to_vec();
    let crc = crc32fast::hash(&page);
    page.extend_from_slice(&crc.to_le_bytes());
    page
}

pub fn parse_index_page<M: prost::Message + Default>(data: &[u8]) -> Result<M> {
    let body = verify_checksum(data, "index page")?;
    M::decode(body).map_err(|e| OlapError::Corruption(format!("malformed index page: {e}")))
}

/// 读取并解析 `ptr` 指向的 index page
pub fn read_index_page<M: prost::Message + Default>(
    file: &dyn FileReader,
    ptr:  PagePointer,
) -> Result<M> {
    parse_index_page(&ptr.read(file)?)
}
