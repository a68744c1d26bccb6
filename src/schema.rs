//! Tablet schema：列定义与 key 模型
//!
//! 列以 `unique_id` 标识，schema change 加减列不会改变已有列的 id，
//! segment footer 也按这个 id 记录列，旧 segment 因此可以被新 schema 读取。

use crate::common::{AggregateType, ColumnType, ColumnUniqueId, KeysType, OlapError, Result, SchemaHash};
use crate::field_type::{ColumnMeta, CompressionType, FieldType, Value};
use crate::pb::{self, ColumnPb, TabletSchemaPb};

// ── 列定义 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TabletColumn {
    pub unique_id:        ColumnUniqueId,
    pub name:             String,
    pub column_type:      ColumnType,
    pub is_key:           bool,
    pub is_nullable:      bool,
    pub aggregation:      AggregateType,
    /// 持久化为字符串，读取时按列类型解析
    pub default_value:    Option<String>,
    /// VARCHAR 最大字节长度
    pub length:           u32,
    pub is_bf_column:     bool,
    pub has_bitmap_index: bool,
}

impl TabletColumn {
    /// 构建 key 列
    pub fn key(id: ColumnUniqueId, name: &str, column_type: ColumnType) -> Self {
        Self {
            unique_id: id, name: name.into(),
            column_type, is_key: true, is_nullable: false,
            aggregation: AggregateType::None, default_value: None, length: 0,
            is_bf_column: false, has_bitmap_index: false,
        }
    }
    /// 构建 value 列
    pub fn value(id: ColumnUniqueId, name: &str, column_type: ColumnType, agg: AggregateType) -> Self {
        Self {
            unique_id: id, name: name.into(),
            column_type, is_key: false, is_nullable: true,
            aggregation: agg, default_value: None, length: 0,
            is_bf_column: false, has_bitmap_index: false,
        }
    }
    /// 构建 VARCHAR 列
    pub fn varchar(id: ColumnUniqueId, name: &str, max_len: u32, is_key: bool) -> Self {
        Self {
            unique_id: id, name: name.into(),
            column_type: ColumnType::Varchar,
            is_key, is_nullable: !is_key,
            aggregation: AggregateType::None, default_value: None, length: max_len,
            is_bf_column: false, has_bitmap_index: false,
        }
    }

    pub fn with_default(mut self, v: &str) -> Self {
        self.default_value = Some(v.into()); self
    }
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false; self
    }
    pub fn nullable(mut self) -> Self {
        self.is_nullable = true; self
    }
    pub fn with_bloom_filter(mut self) -> Self {
        self.is_bf_column = true; self
    }
    pub fn with_bitmap_index(mut self) -> Self {
        self.has_bitmap_index = true; self
    }

    pub fn field_type(&self) -> FieldType { FieldType::from(self.column_type) }

    /// 解析后的默认值；未声明默认值时返回 None
    pub fn parsed_default(&self) -> Result<Option<Value>> {
        self.default_value.as_deref().map(|s| Value::parse(self.field_type(), s)).transpose()
    }

    /// 写入 segment 时的物理描述
    pub fn column_meta(&self, compression: CompressionType) -> ColumnMeta {
        let mut meta = ColumnMeta::new(self.unique_id, &self.name, self.field_type())
            .with_compression(compression);
        meta.is_nullable      = self.is_nullable;
        meta.has_bloom_filter = self.is_bf_column;
        meta.has_bitmap_index = self.has_bitmap_index;
        if self.length > 0 {
            meta.max_length = self.length;
        }
        meta
    }

    pub fn to_pb(&self) -> ColumnPb {
        ColumnPb {
            unique_id:        self.unique_id,
            name:             self.name.clone(),
            column_type:      pb::ColumnTypePb::from(self.column_type) as i32,
            is_key:           self.is_key,
            is_nullable:      self.is_nullable,
            aggregation:      pb::AggregateTypePb::from(self.aggregation) as i32,
            default_value:    self.default_value.clone(),
            length:           self.length,
            is_bf_column:     self.is_bf_column,
            has_bitmap_index: self.has_bitmap_index,
        }
    }

    pub fn from_pb(p: &ColumnPb) -> Result<Self> {
        let column_type: pb::ColumnTypePb   = pb::enum_from_i32(p.column_type, "column type")?;
        let aggregation: pb::AggregateTypePb = pb::enum_from_i32(p.aggregation, "aggregation")?;
        Ok(Self {
            unique_id:        p.unique_id,
            name:             p.name.clone(),
            column_type:      column_type.into(),
            is_key:           p.is_key,
            is_nullable:      p.is_nullable,
            aggregation:      aggregation.into(),
            default_value:    p.default_value.clone(),
            length:           p.length,
            is_bf_column:     p.is_bf_column,
            has_bitmap_index: p.has_bitmap_index,
        })
    }
}

// ── Tablet Schema ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TabletSchema {
    pub schema_version:        u32,
    pub keys_type:             KeysType,
    pub columns:               Vec<TabletColumn>,
    pub schema_hash:           SchemaHash,
    /// ShortKey 索引包含的前缀 key 列数
    pub num_short_key_columns: u32,
    pub next_column_unique_id: ColumnUniqueId,
    pub compression:           CompressionType,
}

fn schema_hash_of(columns: &[TabletColumn]) -> SchemaHash {
    columns.iter().fold(0u32, |h, c| h ^ c.unique_id.wrapping_mul(2654435761))
}

impl TabletSchema {
    pub fn new(keys_type: KeysType, columns: Vec<TabletColumn>) -> Self {
        let num_keys = columns.iter().filter(|c| c.is_key).count() as u32;
        let next_id  = columns.iter().map(|c| c.unique_id + 1).max().unwrap_or(0);
        Self {
            schema_version: 1, keys_type,
            schema_hash: schema_hash_of(&columns),
            num_short_key_columns: num_keys.min(3),
            next_column_unique_id: next_id,
            compression: CompressionType::Lz4,
            columns,
        }
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &TabletColumn> {
        self.columns.iter().filter(|c| c.is_key)
    }
    pub fn value_columns(&self) -> impl Iterator<Item = &TabletColumn> {
        self.columns.iter().filter(|c| !c.is_key)
    }
    pub fn num_columns(&self)     -> usize { self.columns.len() }
    pub fn num_key_columns(&self) -> usize { self.key_columns().count() }

    pub fn column(&self, idx: usize) -> Option<&TabletColumn> { self.columns.get(idx) }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
    pub fn column_by_name(&self, name: &str) -> Option<&TabletColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
    pub fn column_by_unique_id(&self, id: ColumnUniqueId) -> Option<&TabletColumn> {
        self.columns.iter().find(|c| c.unique_id == id)
    }

    /// 追加一列，分配新的 unique id（light schema change）
    ///
    /// 新增的非空列必须带默认值，否则旧 segment 无法补齐该列。
    pub fn add_column(&mut self, mut col: TabletColumn) -> Result<ColumnUniqueId> {
        if self.column_by_name(&col.name).is_some() {
            return Err(OlapError::InvalidArgument(format!("column {} already exists", col.name)));
        }
        if !col.is_nullable && col.default_value.is_none() {
            return Err(OlapError::InvalidArgument(format!(
                "new column {} must be nullable or have a default", col.name
            )));
        }
        col.parsed_default()?;
        col.unique_id = self.next_column_unique_id;
        self.next_column_unique_id += 1;
        let id = col.unique_id;
        self.columns.push(col);
        self.bump_version();
        Ok(id)
    }

    pub fn drop_column(&mut self, name: &str) -> Result<TabletColumn> {
        let idx = self.field_index(name)
            .ok_or_else(|| OlapError::InvalidArgument(format!("no column named {name}")))?;
        if self.columns[idx].is_key {
            return Err(OlapError::InvalidArgument(format!("cannot drop key column {name}")));
        }
        let col = self.columns.remove(idx);
        self.bump_version();
        Ok(col)
    }

    fn bump_version(&mut self) {
        self.schema_version += 1;
        self.schema_hash = schema_hash_of(&self.columns);
    }

    pub fn validate(&self) -> Result<()> {
        let keys = self.num_key_columns();
        if keys == 0 {
            return Err(OlapError::SchemaMismatch("schema has no key column".into()));
        }
        if self.columns.iter().take(keys).any(|c| !c.is_key) {
            return Err(OlapError::SchemaMismatch("key columns must precede value columns".into()));
        }
        if self.num_short_key_columns as usize > keys {
            return Err(OlapError::SchemaMismatch(format!(
                "{} short key columns but only {keys} keys", self.num_short_key_columns
            )));
        }
        let mut ids: Vec<_> = self.columns.iter().map(|c| c.unique_id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(OlapError::SchemaMismatch("duplicate column unique id".into()));
        }
        for col in &self.columns {
            col.parsed_default().map_err(|e| {
                OlapError::SchemaMismatch(format!("bad default for {}: {e}", col.name))
            })?;
        }
        Ok(())
    }

    pub fn to_pb(&self) -> TabletSchemaPb {
        TabletSchemaPb {
            keys_type:             pb::KeysTypePb::from(self.keys_type) as i32,
            columns:               self.columns.iter().map(TabletColumn::to_pb).collect(),
            num_short_key_columns: self.num_short_key_columns,
            schema_version:        self.schema_version,
            next_column_unique_id: self.next_column_unique_id,
            compression_type:      pb::CompressionTypePb::from(self.compression) as i32,
        }
    }

    pub fn from_pb(p: &TabletSchemaPb) -> Result<Self> {
        let keys_type: pb::KeysTypePb          = pb::enum_from_i32(p.keys_type, "keys type")?;
        let compression: pb::CompressionTypePb = pb::enum_from_i32(p.compression_type, "compression")?;
        let columns = p.columns.iter().map(TabletColumn::from_pb).collect::<Result<Vec<_>>>()?;
        Ok(Self {
            schema_version:        p.schema_version,
            keys_type:             keys_type.into(),
            schema_hash:           schema_hash_of(&columns),
            num_short_key_columns: p.num_short_key_columns,
            next_column_unique_id: p.next_column_unique_id,
            compression:           compression.into(),
            columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TabletSchema {
        TabletSchema::new(KeysType::Unique, vec![
            TabletColumn::key(0, "id", ColumnType::Int64),
            TabletColumn::varchar(1, "name", 64, false),
            TabletColumn::value(2, "score", ColumnType::Int32, AggregateType::Replace),
        ])
    }

    #[test]
    fn add_and_drop_keep_unique_ids() {
        let mut s = schema();
        assert!(s.add_column(TabletColumn::value(0, "c", ColumnType::Int32, AggregateType::None)
            .not_null()).is_err());
        let id = s.add_column(TabletColumn::value(0, "c", ColumnType::Int32, AggregateType::None)
            .not_null().with_default("0")).unwrap();
        assert_eq!(id, 3);
        s.drop_column("name").unwrap();
        assert_eq!(s.column_by_name("score").unwrap().unique_id, 2);
        assert_eq!(s.field_index("c"), Some(2));
        assert!(s.drop_column("id").is_err());
        assert_eq!(s.schema_version, 3);
        s.validate().unwrap();
    }

    #[test]
    fn pb_keeps_schema() {
        let s = schema();
        assert_eq!(TabletSchema::from_pb(&s.to_pb()).unwrap(), s);

        let mut p = s.to_pb();
        p.columns[0].column_type = 42;
        assert!(TabletSchema::from_pb(&p).unwrap_err().is_corruption());
    }

    #[test]
    fn bad_default_fails_validation() {
        let s = TabletSchema::new(KeysType::Duplicate, vec![
            TabletColumn::key(0, "k", ColumnType::Int32),
            TabletColumn::value(1, "v", ColumnType::Int8, AggregateType::None).with_default("999"),
        ]);
        assert!(matches!(s.validate(), Err(OlapError::SchemaMismatch(_))));
    }
}
