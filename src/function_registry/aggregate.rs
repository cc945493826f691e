//! Aggregate function variant (§4.4, §4.6 "reducer element"): a mutable
//! accumulator fed one value per input row, yielding a final value on
//! `finish()`. `DISTINCT` is layered on generically as a decorator that
//! dedupes by `Value::dedup_key` before forwarding to the inner reducer,
//! matching §4.6 ("implemented by the reducer element using a set keyed by
//! the JSON-serialized value").

use std::collections::BTreeSet;

use super::FunctionRegistry;
use crate::errors::{EngineError, EngineResult};
use crate::value::Value;

pub trait Reducer {
    fn reduce(&mut self, value: &Value) -> EngineResult<()>;
    fn finish(&self) -> Value;
}

pub struct DistinctReducer {
    inner: Box<dyn Reducer>,
    seen: BTreeSet<String>,
}

impl DistinctReducer {
    pub fn new(inner: Box<dyn Reducer>) -> Self {
        DistinctReducer { inner, seen: BTreeSet::new() }
    }
}

impl Reducer for DistinctReducer {
    fn reduce(&mut self, value: &Value) -> EngineResult<()> {
        if self.seen.insert(value.dedup_key()) {
            self.inner.reduce(value)
        } else {
            Ok(())
        }
    }

    fn finish(&self) -> Value {
        self.inner.finish()
    }
}

#[derive(Default)]
struct SumReducer {
    int_total: i64,
    float_total: f64,
    saw_float: bool,
    saw_number: bool,
    string_total: Option<String>,
}

impl Reducer for SumReducer {
    // Open question (§9): `sum` over strings concatenates (§4.3); a bucket
    // that mixes numbers and strings is a runtime type mismatch rather than
    // a silent coercion either way.
    fn reduce(&mut self, value: &Value) -> EngineResult<()> {
        match value {
            Value::Null => {}
            Value::Integer(i) => {
                if self.string_total.is_some() {
                    return Err(EngineError::runtime("cannot sum a mix of numbers and strings"));
                }
                self.saw_number = true;
                self.int_total += i;
                self.float_total += *i as f64;
            }
            Value::Float(f) => {
                if self.string_total.is_some() {
                    return Err(EngineError::runtime("cannot sum a mix of numbers and strings"));
                }
                self.saw_number = true;
                self.saw_float = true;
                self.float_total += f;
            }
            Value::String(s) => {
                if self.saw_number {
                    return Err(EngineError::runtime("cannot sum a mix of numbers and strings"));
                }
                let acc = self.string_total.get_or_insert_with(String::new);
                acc.push_str(s);
            }
            other => {
                return Err(EngineError::runtime(format!("cannot sum a {}", other.type_name())));
            }
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        if let Some(s) = &self.string_total {
            return Value::String(s.clone());
        }
        if !self.saw_number {
            return Value::Integer(0);
        }
        if self.saw_float {
            Value::Float(self.float_total)
        } else {
            Value::Integer(self.int_total)
        }
    }
}

#[derive(Default)]
struct AvgReducer {
    total: f64,
    count: usize,
}

impl Reducer for AvgReducer {
    fn reduce(&mut self, value: &Value) -> EngineResult<()> {
        if let Some(f) = value.as_f64() {
            self.total += f;
            self.count += 1;
        } else if !value.is_null() {
            return Err(EngineError::runtime(format!("cannot average a {}", value.type_name())));
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Float(self.total / self.count as f64)
        }
    }
}

#[derive(Default)]
struct CountReducer {
    count: i64,
}

impl Reducer for CountReducer {
    fn reduce(&mut self, value: &Value) -> EngineResult<()> {
        if !value.is_null() {
            self.count += 1;
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        Value::Integer(self.count)
    }
}

#[derive(Default)]
struct MinReducer {
    current: Option<Value>,
}

impl Reducer for MinReducer {
    fn reduce(&mut self, value: &Value) -> EngineResult<()> {
        if value.is_null() {
            return Ok(());
        }
        match &self.current {
            None => self.current = Some(value.clone()),
            Some(cur) => match value.compare(cur) {
                Some(std::cmp::Ordering::Less) => self.current = Some(value.clone()),
                Some(_) => {}
                None => return Err(EngineError::runtime(format!("cannot compare {} and {}", value.type_name(), cur.type_name()))),
            },
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        self.current.clone().unwrap_or(Value::Null)
    }
}

#[derive(Default)]
struct MaxReducer {
    current: Option<Value>,
}

impl Reducer for MaxReducer {
    fn reduce(&mut self, value: &Value) -> EngineResult<()> {
        if value.is_null() {
            return Ok(());
        }
        match &self.current {
            None => self.current = Some(value.clone()),
            Some(cur) => match value.compare(cur) {
                Some(std::cmp::Ordering::Greater) => self.current = Some(value.clone()),
                Some(_) => {}
                None => return Err(EngineError::runtime(format!("cannot compare {} and {}", value.type_name(), cur.type_name()))),
            },
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        self.current.clone().unwrap_or(Value::Null)
    }
}

#[derive(Default)]
struct CollectReducer {
    items: Vec<Value>,
}

impl Reducer for CollectReducer {
    fn reduce(&mut self, value: &Value) -> EngineResult<()> {
        if !value.is_null() {
            self.items.push(value.clone());
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        Value::Array(self.items.clone())
    }
}

pub fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register_aggregate("sum", "Sums numeric values (or concatenates strings)", true, || {
        Box::<SumReducer>::default()
    });
    registry.register_aggregate("avg", "Arithmetic mean of numeric values", true, || Box::<AvgReducer>::default());
    registry.register_aggregate("count", "Counts non-null values", true, || Box::<CountReducer>::default());
    registry.register_aggregate("min", "Smallest value by comparison order", false, || {
        Box::<MinReducer>::default()
    });
    registry.register_aggregate("max", "Largest value by comparison order", false, || {
        Box::<MaxReducer>::default()
    });
    registry.register_aggregate("collect", "Gathers non-null values into an array", true, || {
        Box::<CollectReducer>::default()
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_over_integers() {
        let mut r = SumReducer::default();
        r.reduce(&Value::Integer(1)).unwrap();
        r.reduce(&Value::Integer(2)).unwrap();
        r.reduce(&Value::Null).unwrap();
        assert_eq!(r.finish(), Value::Integer(3));
    }

    #[test]
    fn sum_over_strings_concatenates() {
        let mut r = SumReducer::default();
        r.reduce(&Value::String("a".into())).unwrap();
        r.reduce(&Value::String("b".into())).unwrap();
        assert_eq!(r.finish(), Value::String("ab".into()));
    }

    #[test]
    fn sum_over_mixed_numbers_and_strings_is_an_error() {
        let mut r = SumReducer::default();
        r.reduce(&Value::Integer(1)).unwrap();
        assert!(r.reduce(&Value::String("a".into())).is_err());
    }

    #[test]
    fn distinct_dedupes_by_value() {
        let mut r = DistinctReducer::new(Box::<CollectReducer>::default());
        r.reduce(&Value::Integer(1)).unwrap();
        r.reduce(&Value::Integer(1)).unwrap();
        r.reduce(&Value::Integer(2)).unwrap();
        assert_eq!(r.finish(), Value::Array(vec![Value::Integer(1), Value::Integer(2)]));
    }

    #[test]
    fn avg_ignores_non_numeric() {
        let mut r = AvgReducer::default();
        r.reduce(&Value::Integer(2)).unwrap();
        r.reduce(&Value::Integer(4)).unwrap();
        assert_eq!(r.finish(), Value::Float(3.0));
    }
}
