//! Segment V2 列的物理字段类型与运行时值

use std::cmp::Ordering;

use crate::common::{ColumnType, ColumnUniqueId, OlapError, Result};

/// 列在 Segment 文件中的存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int8, Int16, Int32, Int64,
    Float32, Float64,
    /// 变长字节（Varchar / String）
    Bytes,
    /// 日期存储为 i32（自 1970-01-01 起的天数）
    Date,
}

impl From<ColumnType> for FieldType {
    fn from(ct: ColumnType) -> Self {
        match ct {
            ColumnType::Int8    => Self::Int8,
            ColumnType::Int16   => Self::Int16,
            ColumnType::Int32   => Self::Int32,
            ColumnType::Int64   => Self::Int64,
            ColumnType::Float32 => Self::Float32,
            ColumnType::Float64 => Self::Float64,
            ColumnType::Varchar => Self::Bytes,
            ColumnType::Date    => Self::Date,
        }
    }
}

impl FieldType {
    /// 固定字节宽度；变长类型返回 None
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Int8               => Some(1),
            Self::Int16              => Some(2),
            Self::Int32 | Self::Date => Some(4),
            Self::Int64              => Some(8),
            Self::Float32            => Some(4),
            Self::Float64            => Some(8),
            Self::Bytes              => None,
        }
    }
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::Date)
    }

    /// 有序整数用 Delta；字符串用字典；其余用 Plain
    pub fn default_encoding(self) -> EncodingType {
        if self.is_integer() {
            EncodingType::DeltaBinary
        } else if self == Self::Bytes {
            EncodingType::Dictionary
        } else {
            EncodingType::Plain
        }
    }
}

/// 编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingType {
    Plain,
    RunLength,
    DeltaBinary,
    Dictionary,
}

/// 压缩方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Lz4,
}

/// 写入侧每列的物理描述（写入 Footer）
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub unique_id:        ColumnUniqueId,
    pub name:             String,
    pub field_type:       FieldType,
    pub is_nullable:      bool,
    pub encoding:         EncodingType,
    pub compression:      CompressionType,
    pub max_length:       u32,
    pub has_bloom_filter: bool,
    pub has_bitmap_index: bool,
}

impl ColumnMeta {
    pub fn new(unique_id: ColumnUniqueId, name: &str, field_type: FieldType) -> Self {
        Self {
            unique_id, name: name.into(), field_type,
            is_nullable: false, encoding: field_type.default_encoding(),
            compression: CompressionType::Lz4, max_length: 65535,
            has_bloom_filter: false, has_bitmap_index: false,
        }
    }

    pub fn with_encoding(mut self, enc: EncodingType) -> Self {
        self.encoding = enc; self
    }
    pub fn with_compression(mut self, comp: CompressionType) -> Self {
        self.compression = comp; self
    }
    pub fn nullable(mut self) -> Self {
        self.is_nullable = true; self
    }
    pub fn with_bloom_filter(mut self) -> Self {
        self.has_bloom_filter = true; self
    }
    pub fn with_bitmap_index(mut self) -> Self {
        self.has_bitmap_index = true; self
    }
}

/// 列值（运行时表示）
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int8(v)  => Some(*v as i64),
            Self::Int16(v) => Some(*v as i64),
            Self::Int32(v) => Some(*v as i64),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float32(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self { Self::Bytes(b) => Some(b), _ => None }
    }

    /// 是否是 `ft` 列可以直接存储的值（Null 总是可以）
    pub fn matches_type(&self, ft: FieldType) -> bool {
        matches!(
            (self, ft),
            (Self::Null, _)
                | (Self::Int8(_), FieldType::Int8)
                | (Self::Int16(_), FieldType::Int16)
                | (Self::Int32(_), FieldType::Int32 | FieldType::Date)
                | (Self::Int64(_), FieldType::Int64)
                | (Self::Float32(_), FieldType::Float32)
                | (Self::Float64(_), FieldType::Float64)
                | (Self::Bytes(_), FieldType::Bytes)
        )
    }

    /// 用 i64 构造指定整数类型的值（越界报错）
    pub fn from_i64(ft: FieldType, v: i64) -> Result<Self> {
        let out_of_range = || OlapError::InvalidArgument(format!("{v} out of range for {ft:?}"));
        Ok(match ft {
            FieldType::Int8  => Self::Int8(i8::try_from(v).map_err(|_| out_of_range())?),
            FieldType::Int16 => Self::Int16(i16::try_from(v).map_err(|_| out_of_range())?),
            FieldType::Int32 | FieldType::Date =>
                Self::Int32(i32::try_from(v).map_err(|_| out_of_range())?),
            FieldType::Int64 => Self::Int64(v),
            FieldType::Float32 => Self::Float32(v as f32),
            FieldType::Float64 => Self::Float64(v as f64),
            FieldType::Bytes => Self::Bytes(v.to_string().into_bytes()),
        })
    }

    /// 把谓词字面量转换成列类型（如 Int64 字面量比较 Int32 列）
    pub fn cast_to(&self, ft: FieldType) -> Result<Self> {
        if self.matches_type(ft) {
            return Ok(self.clone());
        }
        match (self, ft) {
            (Self::Bytes(b), _) => {
                let s = std::str::from_utf8(b)
                    .map_err(|e| OlapError::InvalidArgument(format!("non utf8 literal: {e}")))?;
                Self::parse(ft, s)
            }
            (_, FieldType::Float32) | (_, FieldType::Float64) => {
                let f = self.as_f64().ok_or_else(|| {
                    OlapError::InvalidArgument(format!("cannot cast {self:?} to {ft:?}"))
                })?;
                Ok(if ft == FieldType::Float32 { Self::Float32(f as f32) } else { Self::Float64(f) })
            }
            _ => match self.as_i64() {
                Some(v) => Self::from_i64(ft, v),
                None => Err(OlapError::InvalidArgument(format!("cannot cast {self:?} to {ft:?}"))),
            },
        }
    }

    /// 从字符串解析（默认值、delete 条件的持久化形式）
    pub fn parse(ft: FieldType, s: &str) -> Result<Self> {
        let bad = |e: &dyn std::fmt::Display| {
            OlapError::InvalidArgument(format!("cannot parse {s:?} as {ft:?}: {e}"))
        };
        let t = s.trim();
        Ok(match ft {
            FieldType::Int8    => Self::Int8(t.parse().map_err(|e| bad(&e))?),
            FieldType::Int16   => Self::Int16(t.parse().map_err(|e| bad(&e))?),
            FieldType::Int32   => Self::Int32(t.parse().map_err(|e| bad(&e))?),
            FieldType::Int64   => Self::Int64(t.parse().map_err(|e| bad(&e))?),
            FieldType::Float32 => Self::Float32(t.parse().map_err(|e| bad(&e))?),
            FieldType::Float64 => Self::Float64(t.parse().map_err(|e| bad(&e))?),
            FieldType::Bytes   => Self::Bytes(s.as_bytes().to_vec()),
            FieldType::Date    => Self::Int32(parse_date(t).ok_or_else(|| bad(&"bad date"))?),
        })
    }

    /// 同类型值之间的比较；Null 或类型不同返回 None
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Int8(a), Self::Int8(b))       => Some(a.cmp(b)),
            (Self::Int16(a), Self::Int16(b))     => Some(a.cmp(b)),
            (Self::Int32(a), Self::Int32(b))     => Some(a.cmp(b)),
            (Self::Int64(a), Self::Int64(b))     => Some(a.cmp(b)),
            (Self::Float32(a), Self::Float32(b)) => Some(a.total_cmp(b)),
            (Self::Float64(a), Self::Float64(b)) => Some(a.total_cmp(b)),
            (Self::Bytes(a), Self::Bytes(b))     => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// 保序字节串：对同类型值，字节序比较结果与值比较一致。Null 返回空串。
    pub fn to_sort_key(&self) -> Vec<u8> {
        match self {
            Self::Null       => vec![],
            Self::Int8(v)    => vec![(*v as u8) ^ 0x80],
            Self::Int16(v)   => ((*v as u16) ^ 0x8000).to_be_bytes().to_vec(),
            Self::Int32(v)   => ((*v as u32) ^ 0x8000_0000).to_be_bytes().to_vec(),
            Self::Int64(v)   => ((*v as u64) ^ (1 << 63)).to_be_bytes().to_vec(),
            Self::Float32(v) => {
                let bits = v.to_bits();
                let key  = if bits >> 31 == 1 { !bits } else { bits | (1 << 31) };
                key.to_be_bytes().to_vec()
            }
            Self::Float64(v) => {
                let bits = v.to_bits();
                let key  = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
                key.to_be_bytes().to_vec()
            }
            Self::Bytes(b)   => b.clone(),
        }
    }

    /// `to_sort_key` 的逆
    pub fn from_sort_key(ft: FieldType, key: &[u8]) -> Result<Self> {
        fn fixed<const N: usize>(key: &[u8]) -> Result<[u8; N]> {
            key.try_into().map_err(|_| {
                OlapError::Corruption(format!("sort key length {} != {N}", key.len()))
            })
        }
        Ok(match ft {
            FieldType::Int8  => Self::Int8((fixed::<1>(key)?[0] ^ 0x80) as i8),
            FieldType::Int16 => Self::Int16((u16::from_be_bytes(fixed(key)?) ^ 0x8000) as i16),
            FieldType::Int32 | FieldType::Date =>
                Self::Int32((u32::from_be_bytes(fixed(key)?) ^ 0x8000_0000) as i32),
            FieldType::Int64 => Self::Int64((u64::from_be_bytes(fixed(key)?) ^ (1 << 63)) as i64),
            FieldType::Float32 => {
                let k = u32::from_be_bytes(fixed(key)?);
                let bits = if k >> 31 == 1 { k & !(1 << 31) } else { !k };
                Self::Float32(f32::from_bits(bits))
            }
            FieldType::Float64 => {
                let k = u64::from_be_bytes(fixed(key)?);
                let bits = if k >> 63 == 1 { k & !(1 << 63) } else { !k };
                Self::Float64(f64::from_bits(bits))
            }
            FieldType::Bytes => Self::Bytes(key.to_vec()),
        })
    }

    /// 用于多列 key 比较的字节串，Null 排在所有非 Null 之前
    pub fn to_key_bytes(&self) -> Vec<u8> {
        if self.is_null() {
            return vec![0];
        }
        let mut out = vec![1];
        out.extend(self.to_sort_key());
        out
    }
}

/// "YYYY-MM-DD" 或整数天数
fn parse_date(s: &str) -> Option<i32> {
    if let Ok(days) = s.parse::<i32>() {
        return Some(days);
    }
    let mut parts = s.splitn(3, '-');
    let y: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let d: i64 = parts.next()?.parse().ok()?;
    if !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return None;
    }
    // days_from_civil
    let y = if m <= 2 { y - 1 } else { y };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    i32::try_from(era * 146097 + doe - 719468).ok()
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null       => write!(f, "NULL"),
            Self::Int8(v)    => write!(f, "{v}"),
            Self::Int16(v)   => write!(f, "{v}"),
            Self::Int32(v)   => write!(f, "{v}"),
            Self::Int64(v)   => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Bytes(b)   => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_keys_preserve_order() {
        let ints = [i64::MIN, -7, -1, 0, 1, 42, i64::MAX];
        for w in ints.windows(2) {
            assert!(Value::Int64(w[0]).to_sort_key() < Value::Int64(w[1]).to_sort_key());
        }
        let floats = [f64::NEG_INFINITY, -2.5, -0.0, 0.0, 1e-9, 3.0, f64::INFINITY];
        for w in floats.windows(2) {
            assert!(Value::Float64(w[0]).to_sort_key() <= Value::Float64(w[1]).to_sort_key());
        }
        assert!(Value::Int16(-300).to_sort_key() < Value::Int16(5).to_sort_key());
    }

    #[test]
    fn sort_key_decodes_back() {
        let cases = [
            (FieldType::Int8, Value::Int8(-3)),
            (FieldType::Int32, Value::Int32(-123456)),
            (FieldType::Date, Value::Int32(19000)),
            (FieldType::Float32, Value::Float32(-1.5)),
            (FieldType::Float64, Value::Float64(2.25)),
            (FieldType::Bytes, Value::Bytes(b"abc".to_vec())),
        ];
        for (ft, v) in cases {
            assert_eq!(Value::from_sort_key(ft, &v.to_sort_key()).unwrap(), v);
        }
        assert!(Value::from_sort_key(FieldType::Int64, &[1, 2]).unwrap_err().is_corruption());
    }

    #[test]
    fn parse_and_cast() {
        assert_eq!(Value::parse(FieldType::Int32, " 17 ").unwrap(), Value::Int32(17));
        assert_eq!(Value::parse(FieldType::Date, "1970-01-02").unwrap(), Value::Int32(1));
        assert_eq!(Value::parse(FieldType::Date, "2000-03-01").unwrap(), Value::Int32(11017));
        assert!(Value::parse(FieldType::Int8, "300").is_err());
        assert_eq!(Value::Int64(5).cast_to(FieldType::Int16).unwrap(), Value::Int16(5));
        assert_eq!(Value::Bytes(b"9".to_vec()).cast_to(FieldType::Int64).unwrap(), Value::Int64(9));
        assert!(Value::Int64(1 << 40).cast_to(FieldType::Int32).is_err());
    }

    #[test]
    fn null_key_bytes_sort_first() {
        assert!(Value::Null.to_key_bytes() < Value::Bytes(vec![]).to_key_bytes());
        assert!(Value::Null.to_key_bytes() < Value::Int64(i64::MIN).to_key_bytes());
    }
}
