use std::mem;

use indexmap::IndexMap;
use serde::Serialize;

/// A decoded field set: field names in first-seen order.
pub type Table = IndexMap<String, Value>;

/// A decoded field value. `Map` holds entries created by bracketed keys (`a[k]=v`); `List` holds
/// entries created by empty brackets (`a[]=v`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(String),
    Map(Table),
    List(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// If this is a `Map`, the entry for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Merge `incoming` into this value:
    ///
    ///   * two maps merge entry by entry, recursively for keys present in both;
    ///   * two lists are concatenated;
    ///   * a list merged into a map appends its elements under the map's next integer keys;
    ///   * a map merged into a list first turns the list into a map keyed `"0"`, `"1"`, ...;
    ///   * anything involving a scalar replaces this value with `incoming`.
    pub fn merge(&mut self, incoming: Value) {
        let existing = mem::replace(self, Value::List(Vec::new()));
        *self = existing.merged(incoming);
    }

    fn merged(self, incoming: Value) -> Value {
        match (self, incoming) {
            (Value::Map(mut m), Value::Map(inc)) => {
                merge_tables(&mut m, inc);
                Value::Map(m)
            }
            (Value::List(mut l), Value::List(inc)) => {
                l.extend(inc);
                Value::List(l)
            }
            (Value::Map(mut m), Value::List(inc)) => {
                for v in inc {
                    let k = next_index(&m);
                    m.insert(k, v);
                }
                Value::Map(m)
            }
            (Value::List(l), Value::Map(inc)) => {
                let mut m = l
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect::<Table>();
                merge_tables(&mut m, inc);
                Value::Map(m)
            }
            (_, inc) => inc,
        }
    }
}

/// Merge `incoming` into `t` entry by entry. Keys already in `t` keep their position.
pub fn merge_tables(t: &mut Table, incoming: Table) {
    for (k, v) in incoming {
        match t.get_mut(&k) {
            Some(existing) => existing.merge(v),
            None => {
                t.insert(k, v);
            }
        }
    }
}

/// One more than the largest key of `m` which is a canonical non-negative integer, or `"0"`.
/// Keys are compared and incremented as decimal strings, so there is no largest index.
fn next_index(m: &Table) -> String {
    let max = m
        .keys()
        .filter(|k| is_index(k))
        .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    let Some(max) = max else {
        return "0".to_owned();
    };
    let mut digits = max.clone().into_bytes();
    for d in digits.iter_mut().rev() {
        if *d == b'9' {
            *d = b'0';
        } else {
            *d += 1;
            return String::from_utf8_lossy(&digits).into_owned();
        }
    }
    digits.insert(0, b'1');
    String::from_utf8_lossy(&digits).into_owned()
}

/// Is `k` a non-negative integer without leading zeros?
fn is_index(k: &str) -> bool {
    !k.is_empty() && k.bytes().all(|b| b.is_ascii_digit()) && (k == "0" || !k.starts_with('0'))
}

#[cfg(test)]
mod test {
    use super::*;

    fn s(v: &str) -> Value {
        Value::Scalar(v.to_owned())
    }

    fn map(entries: &[(&str, Value)]) -> Value {
        Value::Map(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn maps_merge_recursively() {
        let mut v = map(&[("x", map(&[("p", s("1"))])), ("y", s("2"))]);
        v.merge(map(&[("x", map(&[("q", s("3"))])), ("z", s("4"))]));
        assert_eq!(
            v,
            map(&[
                ("x", map(&[("p", s("1")), ("q", s("3"))])),
                ("y", s("2")),
                ("z", s("4"))
            ])
        );
    }

    #[test]
    fn equal_keys_later_scalar_wins() {
        let mut v = map(&[("x", s("1")), ("y", s("2"))]);
        v.merge(map(&[("x", s("3"))]));
        assert_eq!(v, map(&[("x", s("3")), ("y", s("2"))]));
    }

    #[test]
    fn lists_concatenate() {
        let mut v = Value::List(vec![s("1")]);
        v.merge(Value::List(vec![s("2"), s("3")]));
        assert_eq!(v, Value::List(vec![s("1"), s("2"), s("3")]));
    }

    #[test]
    fn list_into_map_appends() {
        let mut v = map(&[("x", s("a")), ("3", s("b")), ("07", s("c"))]);
        v.merge(Value::List(vec![s("d"), s("e")]));
        assert_eq!(
            v,
            map(&[
                ("x", s("a")),
                ("3", s("b")),
                ("07", s("c")),
                ("4", s("d")),
                ("5", s("e"))
            ])
        );

        let mut v = map(&[("x", s("a"))]);
        v.merge(Value::List(vec![s("b")]));
        assert_eq!(v, map(&[("x", s("a")), ("0", s("b"))]));

        let mut v = map(&[("18446744073709551615", s("a")), ("9", s("b"))]);
        v.merge(Value::List(vec![s("c"), s("d")]));
        assert_eq!(
            v,
            map(&[
                ("18446744073709551615", s("a")),
                ("9", s("b")),
                ("18446744073709551616", s("c")),
                ("18446744073709551617", s("d"))
            ])
        );

        let mut v = map(&[("-1", s("a")), ("+2", s("b")), ("99", s("c"))]);
        v.merge(Value::List(vec![s("d")]));
        assert_eq!(v.get("100"), Some(&s("d")));
    }

    #[test]
    fn map_into_list_promotes() {
        let mut v = Value::List(vec![s("a"), s("b")]);
        v.merge(map(&[("1", s("c")), ("k", s("d"))]));
        assert_eq!(
            v,
            map(&[("0", s("a")), ("1", s("c")), ("k", s("d"))])
        );
    }

    #[test]
    fn scalars_and_containers_replace() {
        let mut v = s("1");
        v.merge(Value::List(vec![s("2")]));
        assert_eq!(v, Value::List(vec![s("2")]));
        v.merge(s("3"));
        assert_eq!(v, s("3"));
        let mut v = map(&[("x", Value::List(vec![s("1")]))]);
        v.merge(map(&[("x", s("2"))]));
        assert_eq!(v, map(&[("x", s("2"))]));
    }

    #[test]
    fn accessors() {
        let v = map(&[("x", s("1"))]);
        assert_eq!(v.get("x").and_then(Value::as_str), Some("1"));
        assert_eq!(v.get("y"), None);
        assert_eq!(v.as_str(), None);
        assert_eq!(s("1").get("x"), None);
    }
}
