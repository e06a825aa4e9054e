use std::collections::HashMap;

use crate::error::PackstreamError;
use crate::markers::signature;
use crate::value::Value;

/// A raw packstream structure: a one-byte signature and its fields, in
/// wire order. Version-specific typed structures (`Node`, `Path`, the
/// temporal family) are views over this, materialized by
/// [`Structure::into_typed`].
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub signature: u8,
    pub fields: Vec<Value>,
}

impl Structure {
    pub fn new(signature: u8, fields: Vec<Value>) -> Self {
        Structure { signature, fields }
    }

    fn expect(&self, n: usize) -> Result<(), PackstreamError> {
        if self.fields.len() != n {
            Err(PackstreamError::WrongFieldCount {
                signature: self.signature,
                expected: n,
                actual: self.fields.len(),
            })
        } else {
            Ok(())
        }
    }

    /// Interpret this structure's fields according to its signature.
    /// Returns [`GraphValue::Raw`] for signatures this crate doesn't
    /// have a typed mapping for (forward-compatible with future
    /// versions' structure catalogue).
    pub fn into_typed(self) -> Result<GraphValue, PackstreamError> {
        match self.signature {
            signature::NODE => {
                self.expect(4)?;
                let mut f = self.fields.into_iter();
                Ok(GraphValue::Node(Node {
                    id: int_field(f.next().unwrap())?,
                    labels: string_list_field(f.next().unwrap())?,
                    properties: map_field(f.next().unwrap())?,
                    element_id: opt_string_field(f.next().unwrap()),
                }))
            }
            signature::RELATIONSHIP => {
                self.expect(8).or_else(|_| self.expect_range(5, 8))?;
                let mut f = self.fields.into_iter();
                Ok(GraphValue::Relationship(Relationship {
                    id: int_field(f.next().unwrap())?,
                    start_node_id: int_field(f.next().unwrap())?,
                    end_node_id: int_field(f.next().unwrap())?,
                    rel_type: string_field(f.next().unwrap())?,
                    properties: map_field(f.next().unwrap())?,
                    element_id: f.next().and_then(opt_string_field),
                    start_node_element_id: f.next().and_then(opt_string_field),
                    end_node_element_id: f.next().and_then(opt_string_field),
                }))
            }
            signature::UNBOUND_RELATIONSHIP => {
                let mut f = self.fields.into_iter();
                Ok(GraphValue::UnboundRelationship(UnboundRelationship {
                    id: int_field(f.next().ok_or(PackstreamError::WrongFieldCount {
                        signature: signature::UNBOUND_RELATIONSHIP,
                        expected: 3,
                        actual: 0,
                    })?)?,
                    rel_type: string_field(f.next().unwrap())?,
                    properties: map_field(f.next().unwrap())?,
                    element_id: f.next().and_then(opt_string_field),
                }))
            }
            signature::PATH => {
                self.expect(3)?;
                let mut f = self.fields.into_iter();
                let nodes = list_field(f.next().unwrap())?
                    .into_iter()
                    .map(|v| as_structure(v)?.into_typed())
                    .map(|r| r.and_then(GraphValue::into_node))
                    .collect::<Result<Vec<_>, _>>()?;
                let rels = list_field(f.next().unwrap())?
                    .into_iter()
                    .map(|v| as_structure(v)?.into_typed())
                    .map(|r| r.and_then(GraphValue::into_unbound_relationship))
                    .collect::<Result<Vec<_>, _>>()?;
                let sequence = list_field(f.next().unwrap())?
                    .into_iter()
                    .map(int_field)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(GraphValue::Path(Path::materialize(nodes, rels, sequence)?))
            }
            signature::POINT_2D => {
                self.expect(3)?;
                let mut f = self.fields.into_iter();
                Ok(GraphValue::Point2D(Point2D {
                    srid: int_field(f.next().unwrap())? as i32,
                    x: float_field(f.next().unwrap())?,
                    y: float_field(f.next().unwrap())?,
                }))
            }
            signature::POINT_3D => {
                self.expect(4)?;
                let mut f = self.fields.into_iter();
                Ok(GraphValue::Point3D(Point3D {
                    srid: int_field(f.next().unwrap())? as i32,
                    x: float_field(f.next().unwrap())?,
                    y: float_field(f.next().unwrap())?,
                    z: float_field(f.next().unwrap())?,
                }))
            }
            signature::DATE => {
                self.expect(1)?;
                Ok(GraphValue::Date(Date {
                    epoch_days: int_field(self.fields.into_iter().next().unwrap())?,
                }))
            }
            signature::LOCAL_TIME => {
                self.expect(1)?;
                Ok(GraphValue::LocalTime(LocalTime {
                    nanos_of_day: int_field(self.fields.into_iter().next().unwrap())?,
                }))
            }
            signature::TIME => {
                self.expect(2)?;
                let mut f = self.fields.into_iter();
                Ok(GraphValue::Time(Time {
                    nanos_of_day: int_field(f.next().unwrap())?,
                    tz_offset_seconds: int_field(f.next().unwrap())? as i32,
                }))
            }
            signature::LOCAL_DATE_TIME => {
                self.expect(2)?;
                let mut f = self.fields.into_iter();
                Ok(GraphValue::LocalDateTime(LocalDateTime {
                    seconds: int_field(f.next().unwrap())?,
                    nanos: int_field(f.next().unwrap())?,
                }))
            }
            signature::DURATION => {
                self.expect(4)?;
                let mut f = self.fields.into_iter();
                Ok(GraphValue::Duration(Duration {
                    months: int_field(f.next().unwrap())?,
                    days: int_field(f.next().unwrap())?,
                    seconds: int_field(f.next().unwrap())?,
                    nanos: int_field(f.next().unwrap())?,
                }))
            }
            signature::DATE_TIME_OFFSET_LEGACY | signature::DATE_TIME_OFFSET_UTC => {
                self.expect(3)?;
                let utc = self.signature == signature::DATE_TIME_OFFSET_UTC;
                let mut f = self.fields.into_iter();
                Ok(GraphValue::DateTimeOffset(DateTimeOffset {
                    seconds: int_field(f.next().unwrap())?,
                    nanos: int_field(f.next().unwrap())?,
                    tz_offset_seconds: int_field(f.next().unwrap())? as i32,
                    utc_epoch: utc,
                }))
            }
            signature::DATE_TIME_ZONE_ID_LEGACY | signature::DATE_TIME_ZONE_ID_UTC => {
                self.expect(3)?;
                let utc = self.signature == signature::DATE_TIME_ZONE_ID_UTC;
                let mut f = self.fields.into_iter();
                Ok(GraphValue::DateTimeZoneId(DateTimeZoneId {
                    seconds: int_field(f.next().unwrap())?,
                    nanos: int_field(f.next().unwrap())?,
                    zone_id: string_field(f.next().unwrap())?,
                    utc_epoch: utc,
                }))
            }
            other => Err(PackstreamError::UnknownSignature { signature: other }),
        }
    }

    fn expect_range(&self, lo: usize, hi: usize) -> Result<(), PackstreamError> {
        if self.fields.len() >= lo && self.fields.len() <= hi {
            Ok(())
        } else {
            Err(PackstreamError::WrongFieldCount {
                signature: self.signature,
                expected: hi,
                actual: self.fields.len(),
            })
        }
    }
}

fn int_field(v: Value) -> Result<i64, PackstreamError> {
    v.as_integer().ok_or(PackstreamError::UnknownMarker { marker: 0 })
}

fn float_field(v: Value) -> Result<f64, PackstreamError> {
    match v {
        Value::Float(f) => Ok(f),
        _ => Err(PackstreamError::UnknownMarker { marker: 0 }),
    }
}

fn string_field(v: Value) -> Result<String, PackstreamError> {
    match v {
        Value::String(s) => Ok(s),
        _ => Err(PackstreamError::UnknownMarker { marker: 0 }),
    }
}

fn opt_string_field(v: Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn map_field(v: Value) -> Result<HashMap<String, Value>, PackstreamError> {
    match v {
        Value::Map(m) => Ok(m),
        _ => Err(PackstreamError::UnknownMarker { marker: 0 }),
    }
}

fn list_field(v: Value) -> Result<Vec<Value>, PackstreamError> {
    match v {
        Value::List(l) => Ok(l),
        _ => Err(PackstreamError::UnknownMarker { marker: 0 }),
    }
}

fn string_list_field(v: Value) -> Result<Vec<String>, PackstreamError> {
    list_field(v)?.into_iter().map(string_field).collect()
}

fn as_structure(v: Value) -> Result<Structure, PackstreamError> {
    match v {
        Value::Structure(s) => Ok(s),
        _ => Err(PackstreamError::UnknownMarker { marker: 0 }),
    }
}

/// A materialized graph-aware value: the typed counterpart of a wire
/// [`Structure`] once its signature is known.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphValue {
    Node(Node),
    Relationship(Relationship),
    UnboundRelationship(UnboundRelationship),
    Path(Path),
    Point2D(Point2D),
    Point3D(Point3D),
    Date(Date),
    LocalTime(LocalTime),
    Time(Time),
    LocalDateTime(LocalDateTime),
    Duration(Duration),
    DateTimeOffset(DateTimeOffset),
    DateTimeZoneId(DateTimeZoneId),
}

impl GraphValue {
    fn into_node(self) -> Result<Node, PackstreamError> {
        match self {
            GraphValue::Node(n) => Ok(n),
            _ => Err(PackstreamError::UnknownSignature { signature: 0 }),
        }
    }

    fn into_unbound_relationship(self) -> Result<UnboundRelationship, PackstreamError> {
        match self {
            GraphValue::UnboundRelationship(r) => Ok(r),
            _ => Err(PackstreamError::UnknownSignature { signature: 0 }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: HashMap<String, Value>,
    /// Present from Bolt 5.0 onward; `None` on older dialects.
    pub element_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: i64,
    pub start_node_id: i64,
    pub end_node_id: i64,
    pub rel_type: String,
    pub properties: HashMap<String, Value>,
    pub element_id: Option<String>,
    pub start_node_element_id: Option<String>,
    pub end_node_element_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnboundRelationship {
    pub id: i64,
    pub rel_type: String,
    pub properties: HashMap<String, Value>,
    pub element_id: Option<String>,
}

impl UnboundRelationship {
    /// Bind this unbound relationship to concrete start/end node ids,
    /// as performed during [`Path`] materialization.
    pub fn bind(self, start_node_id: i64, end_node_id: i64) -> Relationship {
        Relationship {
            id: self.id,
            start_node_id,
            end_node_id,
            rel_type: self.rel_type,
            properties: self.properties,
            element_id: self.element_id,
            start_node_element_id: None,
            end_node_element_id: None,
        }
    }
}

/// A reconstructed path: nodes in traversal order plus the bound
/// relationship that connects each consecutive pair.
///
/// The wire representation is `(nodes, relationships, sequence)` where
/// `sequence` is a list of signed integers; a positive entry is a 1-based
/// index into `relationships` traversed forward, a negative entry is
/// traversed in reverse. Each `UnboundRelationship` is bound to its
/// inferred start/end nodes at materialization time.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

impl Path {
    fn materialize(
        nodes: Vec<Node>,
        rels: Vec<UnboundRelationship>,
        sequence: Vec<i64>,
    ) -> Result<Path, PackstreamError> {
        let mut bound = Vec::with_capacity(sequence.len() / 2);
        let mut node_idx = 0usize;
        for pair in sequence.chunks(2) {
            let (rel_entry, next_node_entry) = (pair[0], pair.get(1).copied());
            if rel_entry == 0 {
                return Err(PackstreamError::InvalidPathSequence { index: node_idx });
            }
            let next_node_idx = match next_node_entry {
                Some(n) => n as usize,
                None => break,
            };
            let start = &nodes[node_idx];
            let end = &nodes[next_node_idx];
            let rel_index = (rel_entry.unsigned_abs() - 1) as usize;
            let unbound = rels[rel_index].clone();
            let bound_rel = if rel_entry > 0 {
                unbound.bind(start.id, end.id)
            } else {
                unbound.bind(end.id, start.id)
            };
            bound.push(bound_rel);
            node_idx = next_node_idx;
        }
        Ok(Path {
            nodes,
            relationships: bound,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2D {
    pub srid: i32,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub srid: i32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    pub epoch_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub nanos_of_day: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub nanos_of_day: i64,
    pub tz_offset_seconds: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDateTime {
    pub seconds: i64,
    pub nanos: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanos: i64,
}

/// The wire convention for the epoch seconds changes from local-time-based
/// to UTC-based at the v5 "UTC patch"; `utc_epoch` records which
/// convention produced this value so callers can apply the correct offset
/// arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub struct DateTimeOffset {
    pub seconds: i64,
    pub nanos: i64,
    pub tz_offset_seconds: i32,
    pub utc_epoch: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateTimeZoneId {
    pub seconds: i64,
    pub nanos: i64,
    pub zone_id: String,
    pub utc_epoch: bool,
}
