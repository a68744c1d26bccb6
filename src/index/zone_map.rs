//! Zone map：page / segment 级 min、max 与 null 统计
//!
//! min / max 只统计非 Null 值，落盘为保序 sort key。

use std::cmp::Ordering;

use crate::common::Result;
use crate::field_type::{FieldType, Value};
use crate::pb::ZoneMapPb;
use crate::predicate::PredicateOp;

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneMap {
    pub min:          Option<Value>,
    pub max:          Option<Value>,
    pub has_null:     bool,
    pub has_not_null: bool,
}

impl Default for ZoneMap {
    fn default() -> Self {
        Self { min: None, max: None, has_null: false, has_not_null: false }
    }
}

impl ZoneMap {
    /// 全部行取同一个值时的 zone map（新增列的默认值）
    pub fn for_constant(v: &Value) -> Self {
        let mut zm = Self::default();
        zm.add(v);
        zm
    }

    pub fn add(&mut self, v: &Value) {
        if v.is_null() {
            self.has_null = true;
            return;
        }
        self.has_not_null = true;
        if self.min.as_ref().map_or(true, |m| v.compare(m) == Some(Ordering::Less)) {
            self.min = Some(v.clone());
        }
        if self.max.as_ref().map_or(true, |m| v.compare(m) == Some(Ordering::Greater)) {
            self.max = Some(v.clone());
        }
    }

    pub fn merge(&mut self, other: &ZoneMap) {
        self.has_null |= other.has_null;
        if let Some(min) = &other.min { self.add(min); }
        if let Some(max) = &other.max { self.add(max); }
    }

    /// 是否可能存在满足 `op` 的行；false 表示可以整块跳过
    ///
    /// `op` 的字面量必须已经转换为列类型。
    pub fn match_predicate(&self, op: &PredicateOp) -> bool {
        let (min, max) = match (&self.min, &self.max) {
            (Some(min), Some(max)) if self.has_not_null => (min, max),
            _ => return matches!(op, PredicateOp::IsNull) && self.has_null,
        };
        // 类型不可比时不裁剪
        let may = |bound: &Value, x: &Value, ok: fn(Ordering) -> bool| bound.compare(x).map_or(true, ok);
        let within = |x: &Value| may(min, x, Ordering::is_le) && may(max, x, Ordering::is_ge);
        match op {
            PredicateOp::Eq(x) => within(x),
            PredicateOp::Ne(x) => !(min.compare(x) == Some(Ordering::Equal)
                && max.compare(x) == Some(Ordering::Equal)),
            PredicateOp::Lt(x) => may(min, x, Ordering::is_lt),
            PredicateOp::Le(x) => may(min, x, Ordering::is_le),
            PredicateOp::Gt(x) => may(max, x, Ordering::is_gt),
            PredicateOp::Ge(x) => may(max, x, Ordering::is_ge),
            PredicateOp::In(xs) => xs.iter().any(within),
            PredicateOp::IsNull => self.has_null,
            PredicateOp::IsNotNull => true,
        }
    }

    pub fn to_pb(&self) -> ZoneMapPb {
        ZoneMapPb {
            min:          self.min.as_ref().map(Value::to_sort_key).unwrap_or_default(),
            max:          self.max.as_ref().map(Value::to_sort_key).unwrap_or_default(),
            has_null:     self.has_null,
            has_not_null: self.has_not_null,
        }
    }

    pub fn from_pb(pb: &ZoneMapPb, ft: FieldType) -> Result<Self> {
        let (min, max) = if pb.has_not_null {
            (Some(Value::from_sort_key(ft, &pb.min)?), Some(Value::from_sort_key(ft, &pb.max)?))
        } else {
            (None, None)
        };
        Ok(Self { min, max, has_null: pb.has_null, has_not_null: pb.has_not_null })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zm(values: &[Value]) -> ZoneMap {
        let mut z = ZoneMap::default();
        for v in values {
            z.add(v);
        }
        z
    }

    #[test]
    fn range_predicates() {
        let z = zm(&[Value::Int32(10), Value::Int32(3), Value::Int32(7)]);
        assert_eq!(z.min, Some(Value::Int32(3)));
        assert_eq!(z.max, Some(Value::Int32(10)));
        assert!(z.match_predicate(&PredicateOp::Eq(Value::Int32(5))));
        assert!(!z.match_predicate(&PredicateOp::Eq(Value::Int32(11))));
        assert!(!z.match_predicate(&PredicateOp::Lt(Value::Int32(3))));
        assert!(z.match_predicate(&PredicateOp::Le(Value::Int32(3))));
        assert!(!z.match_predicate(&PredicateOp::Gt(Value::Int32(10))));
        assert!(z.match_predicate(&PredicateOp::Ge(Value::Int32(10))));
        assert!(!z.match_predicate(&PredicateOp::In(vec![Value::Int32(0), Value::Int32(99)])));
        assert!(!z.match_predicate(&PredicateOp::IsNull));
    }

    #[test]
    fn all_null_zone_only_matches_is_null() {
        let z = zm(&[Value::Null, Value::Null]);
        assert!(z.match_predicate(&PredicateOp::IsNull));
        assert!(!z.match_predicate(&PredicateOp::IsNotNull));
        assert!(!z.match_predicate(&PredicateOp::Ne(Value::Int64(1))));
        assert!(!ZoneMap::default().match_predicate(&PredicateOp::IsNull));
    }

    #[test]
    fn ne_prunes_constant_zone() {
        let z = zm(&[Value::Bytes(b"a".to_vec()), Value::Bytes(b"a".to_vec())]);
        assert!(!z.match_predicate(&PredicateOp::Ne(Value::Bytes(b"a".to_vec()))));
        assert!(z.match_predicate(&PredicateOp::Ne(Value::Bytes(b"b".to_vec()))));
    }

    #[test]
    fn pb_keeps_statistics() {
        let z = zm(&[Value::Float64(-1.5), Value::Null, Value::Float64(2.0)]);
        let back = ZoneMap::from_pb(&z.to_pb(), FieldType::Float64).unwrap();
        assert_eq!(back, z);
    }
}
