//! 列谓词与 delete 谓词
//!
//! `ColumnPredicate` 是下推到 segment 的单列条件，字面量已是 `Value`；
//! `DeletePredicate` 是一条 DELETE 语句的持久化形式，列按名字引用，字面量按字符串保存，
//! 读取时对照当前 schema 转换成 `ColumnPredicate`。同一条 DELETE 的各条件是 AND 关系。

use std::cmp::Ordering;

use crate::common::{ColumnUniqueId, OlapError, Result};
use crate::field_type::{FieldType, Value};
use crate::index::{BloomFilter, ZoneMap};
use crate::pb::{self, DeleteConditionPb, DeletePredicatePb, PredicateOpPb};
use crate::schema::TabletSchema;

/// 不带操作数的比较符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq, Ne, Lt, Le, Gt, Ge, In, IsNull, IsNotNull,
}

impl From<CompareOp> for PredicateOpPb {
    fn from(op: CompareOp) -> Self {
        match op {
            CompareOp::Eq        => Self::Eq,
            CompareOp::Ne        => Self::Ne,
            CompareOp::Lt        => Self::Lt,
            CompareOp::Le        => Self::Le,
            CompareOp::Gt        => Self::Gt,
            CompareOp::Ge        => Self::Ge,
            CompareOp::In        => Self::In,
            CompareOp::IsNull    => Self::IsNull,
            CompareOp::IsNotNull => Self::IsNotNull,
        }
    }
}

impl From<PredicateOpPb> for CompareOp {
    fn from(pb: PredicateOpPb) -> Self {
        match pb {
            PredicateOpPb::Eq        => Self::Eq,
            PredicateOpPb::Ne        => Self::Ne,
            PredicateOpPb::Lt        => Self::Lt,
            PredicateOpPb::Le        => Self::Le,
            PredicateOpPb::Gt        => Self::Gt,
            PredicateOpPb::Ge        => Self::Ge,
            PredicateOpPb::In        => Self::In,
            PredicateOpPb::IsNull    => Self::IsNull,
            PredicateOpPb::IsNotNull => Self::IsNotNull,
        }
    }
}

// ── PredicateOp ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateOp {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Le(Value),
    Gt(Value),
    Ge(Value),
    In(Vec<Value>),
    IsNull,
    IsNotNull,
}

impl PredicateOp {
    /// 由比较符和操作数构造，检查操作数个数
    pub fn build(op: CompareOp, mut operands: Vec<Value>) -> Result<Self> {
        let arity = |n: usize, operands: &[Value]| {
            if operands.len() == n {
                Ok(())
            } else {
                Err(OlapError::InvalidArgument(format!(
                    "{op:?} takes {n} operand(s), got {}", operands.len()
                )))
            }
        };
        Ok(match op {
            CompareOp::IsNull    => { arity(0, &operands)?; Self::IsNull }
            CompareOp::IsNotNull => { arity(0, &operands)?; Self::IsNotNull }
            CompareOp::In => {
                if operands.is_empty() {
                    return Err(OlapError::InvalidArgument("IN needs at least one operand".into()));
                }
                Self::In(operands)
            }
            _ => {
                arity(1, &operands)?;
                let v = operands.pop().unwrap_or(Value::Null);
                match op {
                    CompareOp::Eq => Self::Eq(v),
                    CompareOp::Ne => Self::Ne(v),
                    CompareOp::Lt => Self::Lt(v),
                    CompareOp::Le => Self::Le(v),
                    CompareOp::Gt => Self::Gt(v),
                    _             => Self::Ge(v),
                }
            }
        })
    }

    pub fn kind(&self) -> CompareOp {
        match self {
            Self::Eq(_)     => CompareOp::Eq,
            Self::Ne(_)     => CompareOp::Ne,
            Self::Lt(_)     => CompareOp::Lt,
            Self::Le(_)     => CompareOp::Le,
            Self::Gt(_)     => CompareOp::Gt,
            Self::Ge(_)     => CompareOp::Ge,
            Self::In(_)     => CompareOp::In,
            Self::IsNull    => CompareOp::IsNull,
            Self::IsNotNull => CompareOp::IsNotNull,
        }
    }

    /// 把字面量转换为列类型
    pub fn cast_to(&self, ft: FieldType) -> Result<Self> {
        Ok(match self {
            Self::Eq(v) => Self::Eq(v.cast_to(ft)?),
            Self::Ne(v) => Self::Ne(v.cast_to(ft)?),
            Self::Lt(v) => Self::Lt(v.cast_to(ft)?),
            Self::Le(v) => Self::Le(v.cast_to(ft)?),
            Self::Gt(v) => Self::Gt(v.cast_to(ft)?),
            Self::Ge(v) => Self::Ge(v.cast_to(ft)?),
            Self::In(vs) => Self::In(vs.iter().map(|v| v.cast_to(ft)).collect::<Result<_>>()?),
            Self::IsNull    => Self::IsNull,
            Self::IsNotNull => Self::IsNotNull,
        })
    }

    /// 行级求值。Null 只满足 IS NULL。
    pub fn evaluate(&self, v: &Value) -> bool {
        if v.is_null() {
            return matches!(self, Self::IsNull);
        }
        let is = |x: &Value, ok: fn(Ordering) -> bool| v.compare(x).map_or(false, ok);
        match self {
            Self::Eq(x)     => is(x, Ordering::is_eq),
            Self::Ne(x)     => is(x, Ordering::is_ne),
            Self::Lt(x)     => is(x, Ordering::is_lt),
            Self::Le(x)     => is(x, Ordering::is_le),
            Self::Gt(x)     => is(x, Ordering::is_gt),
            Self::Ge(x)     => is(x, Ordering::is_ge),
            Self::In(xs)    => xs.iter().any(|x| is(x, Ordering::is_eq)),
            Self::IsNull    => false,
            Self::IsNotNull => true,
        }
    }

    /// 等值类谓词在 bloom filter / bitmap 索引上探测的值
    pub fn point_values(&self) -> Option<&[Value]> {
        match self {
            Self::Eq(v)  => Some(std::slice::from_ref(v)),
            Self::In(vs) => Some(vs),
            _ => None,
        }
    }
}

// ── ColumnPredicate ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPredicate {
    /// 列的 unique id
    pub column_id: ColumnUniqueId,
    pub op:        PredicateOp,
}

impl ColumnPredicate {
    pub fn new(column_id: ColumnUniqueId, op: PredicateOp) -> Self {
        Self { column_id, op }
    }

    pub fn evaluate(&self, v: &Value) -> bool { self.op.evaluate(v) }

    pub fn match_zone_map(&self, zm: &ZoneMap) -> bool { zm.match_predicate(&self.op) }

    /// false 表示 bloom filter 证明没有行满足谓词
    pub fn match_bloom_filter(&self, bf: &BloomFilter) -> bool {
        match self.op.point_values() {
            Some(values) => values.iter().any(|v| bf.may_contain(&v.to_sort_key())),
            None => true,
        }
    }
}

// ── Delete 谓词 ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCondition {
    pub column_name: String,
    pub op:          CompareOp,
    pub values:      Vec<String>,
}

impl DeleteCondition {
    pub fn new(column_name: &str, op: CompareOp, values: &[&str]) -> Self {
        Self {
            column_name: column_name.into(),
            op,
            values: values.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn to_column_predicate(&self, schema: &TabletSchema) -> Result<ColumnPredicate> {
        let col = schema.column_by_name(&self.column_name).ok_or_else(|| {
            OlapError::SchemaMismatch(format!("delete condition on unknown column {}", self.column_name))
        })?;
        let ft = col.field_type();
        let operands = self.values.iter().map(|s| Value::parse(ft, s)).collect::<Result<Vec<_>>>()?;
        Ok(ColumnPredicate::new(col.unique_id, PredicateOp::build(self.op, operands)?))
    }
}

impl std::fmt::Display for DeleteCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:?} ({})", self.column_name, self.op, self.values.join(","))
    }
}

/// 一条 DELETE 语句：version 之前写入的、满足全部条件的行不可见
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePredicate {
    pub version:    i64,
    pub conditions: Vec<DeleteCondition>,
}

impl DeletePredicate {
    pub fn new(conditions: Vec<DeleteCondition>) -> Self {
        Self { version: -1, conditions }
    }

    /// 绑定到 schema，得到 AND 关系的列谓词
    pub fn to_column_predicates(&self, schema: &TabletSchema) -> Result<Vec<ColumnPredicate>> {
        self.conditions.iter().map(|c| c.to_column_predicate(schema)).collect()
    }

    pub fn to_pb(&self) -> DeletePredicatePb {
        DeletePredicatePb {
            version:    self.version,
            conditions: self.conditions.iter().map(|c| DeleteConditionPb {
                column_name: c.column_name.clone(),
                op:          PredicateOpPb::from(c.op) as i32,
                values:      c.values.clone(),
            }).collect(),
        }
    }

    pub fn from_pb(p: &DeletePredicatePb) -> Result<Self> {
        let conditions = p.conditions.iter().map(|c| {
            let op: PredicateOpPb = pb::enum_from_i32(c.op, "predicate op")?;
            Ok(DeleteCondition { column_name: c.column_name.clone(), op: op.into(), values: c.values.clone() })
        }).collect::<Result<Vec<_>>>()?;
        Ok(Self { version: p.version, conditions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AggregateType, ColumnType, KeysType};
    use crate::schema::TabletColumn;

    #[test]
    fn row_evaluation() {
        let lt = PredicateOp::Lt(Value::Int32(5));
        assert!(lt.evaluate(&Value::Int32(4)));
        assert!(!lt.evaluate(&Value::Int32(5)));
        assert!(!lt.evaluate(&Value::Null));
        assert!(PredicateOp::IsNull.evaluate(&Value::Null));
        assert!(!PredicateOp::Ne(Value::Int32(1)).evaluate(&Value::Null));
        let inp = PredicateOp::In(vec![Value::Bytes(b"a".to_vec()), Value::Bytes(b"c".to_vec())]);
        assert!(inp.evaluate(&Value::Bytes(b"c".to_vec())));
        assert!(!inp.evaluate(&Value::Bytes(b"b".to_vec())));
    }

    #[test]
    fn build_checks_arity() {
        assert!(PredicateOp::build(CompareOp::Eq, vec![]).is_err());
        assert!(PredicateOp::build(CompareOp::IsNull, vec![Value::Int8(1)]).is_err());
        assert!(PredicateOp::build(CompareOp::In, vec![]).is_err());
        assert_eq!(
            PredicateOp::build(CompareOp::Ge, vec![Value::Int8(1)]).unwrap(),
            PredicateOp::Ge(Value::Int8(1))
        );
    }

    #[test]
    fn delete_predicate_binds_to_schema() {
        let schema = TabletSchema::new(KeysType::Duplicate, vec![
            TabletColumn::key(0, "k", ColumnType::Int64),
            TabletColumn::value(7, "d", ColumnType::Date, AggregateType::None),
        ]);
        let pred = DeletePredicate::new(vec![
            DeleteCondition::new("k", CompareOp::In, &["1", "2"]),
            DeleteCondition::new("d", CompareOp::Lt, &["2000-01-01"]),
        ]);
        let bound = pred.to_column_predicates(&schema).unwrap();
        assert_eq!(bound[0], ColumnPredicate::new(0, PredicateOp::In(vec![Value::Int64(1), Value::Int64(2)])));
        assert_eq!(bound[1].column_id, 7);
        assert!(bound[1].evaluate(&Value::Int32(0)));

        let bad = DeletePredicate::new(vec![DeleteCondition::new("gone", CompareOp::Eq, &["1"])]);
        assert!(matches!(bad.to_column_predicates(&schema), Err(OlapError::SchemaMismatch(_))));
    }

    #[test]
    fn bloom_filter_rejects_absent_values() {
        let mut bf = BloomFilter::new(16, 10);
        bf.add(&Value::Int32(7).to_sort_key());
        assert!(ColumnPredicate::new(0, PredicateOp::Eq(Value::Int32(7))).match_bloom_filter(&bf));
        assert!(ColumnPredicate::new(0, PredicateOp::Gt(Value::Int32(100))).match_bloom_filter(&bf));
        let absent = (1000..1010).map(Value::Int32).collect();
        assert!(!ColumnPredicate::new(0, PredicateOp::In(absent)).match_bloom_filter(&bf));
    }
}
