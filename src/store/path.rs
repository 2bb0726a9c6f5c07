use std::fmt;

use serde_json::Value;

/// Dotted path into a JSON document: `.` (root), `.resources.coins`,
/// `.travelQueue.0`. A leading `$` is accepted. Numeric segments index arrays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct JsonPath {
    segments: Vec<String>,
}

impl JsonPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(path: &str) -> Self {
        let trimmed = path.strip_prefix('$').unwrap_or(path);
        Self {
            segments: trimmed
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// Split into parent path and last segment. `None` for the root.
    pub fn split_last(&self) -> Option<(JsonPath, &str)> {
        let (last, parent) = self.segments.split_last()?;
        Some((
            JsonPath {
                segments: parent.to_vec(),
            },
            last.as_str(),
        ))
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str(".");
        }
        for s in &self.segments {
            write!(f, ".{s}")?;
        }
        Ok(())
    }
}

impl From<&str> for JsonPath {
    fn from(path: &str) -> Self {
        JsonPath::parse(path)
    }
}

/// A single path-addressed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum DocOp {
    /// Replace the subtree (creating the last segment if absent).
    Set(Value),
    /// Add to a numeric value.
    IncrBy(i64),
    /// Append elements to an array.
    Append(Vec<Value>),
    /// Set the value only if nothing is there yet. At the root this creates
    /// a missing document and leaves an existing one alone.
    Init(Value),
}

/// Why a path operation could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    Missing,
    WrongType(&'static str),
}

pub fn lookup<'a>(doc: &'a Value, path: &JsonPath) -> Option<&'a Value> {
    path.segments().iter().try_fold(doc, |node, seg| match node {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub fn lookup_mut<'a>(doc: &'a mut Value, path: &JsonPath) -> Option<&'a mut Value> {
    path.segments().iter().try_fold(doc, |node, seg| match node {
        Value::Object(map) => map.get_mut(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    })
}

/// Apply `op` at `path`. Returns the new number for `IncrBy`.
pub fn apply(doc: &mut Value, path: &JsonPath, op: &DocOp) -> Result<Option<i64>, PathError> {
    match op {
        DocOp::Set(value) => {
            let Some((parent, last)) = path.split_last() else {
                *doc = value.clone();
                return Ok(None);
            };
            match lookup_mut(doc, &parent).ok_or(PathError::Missing)? {
                Value::Object(map) => {
                    map.insert(last.to_string(), value.clone());
                }
                Value::Array(items) => {
                    let slot = last
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| items.get_mut(i))
                        .ok_or(PathError::Missing)?;
                    *slot = value.clone();
                }
                _ => return Err(PathError::WrongType("an object or array")),
            }
            Ok(None)
        }
        DocOp::IncrBy(by) => {
            let target = lookup_mut(doc, path).ok_or(PathError::Missing)?;
            let current = target.as_i64().ok_or(PathError::WrongType("an integer"))?;
            let next = current
                .checked_add(*by)
                .ok_or(PathError::WrongType("an integer in range"))?;
            *target = Value::from(next);
            Ok(Some(next))
        }
        DocOp::Append(values) => {
            let target = lookup_mut(doc, path).ok_or(PathError::Missing)?;
            let items = target.as_array_mut().ok_or(PathError::WrongType("an array"))?;
            items.extend(values.iter().cloned());
            Ok(None)
        }
        DocOp::Init(value) => {
            if lookup(doc, path).is_some() {
                return Ok(None);
            }
            apply(doc, path, &DocOp::Set(value.clone()))
        }
    }
}
