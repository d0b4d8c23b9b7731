//! Property values.
//!
//! Floating point components compare by bit pattern, so a value read back
//! from the store is equal to the value written even for NaN payloads.

use std::fmt;

use crate::primitives::bytes::ord;

/// Coordinate reference system of a point.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Crs {
    /// Planar coordinates.
    Cartesian,
    /// Longitude and latitude.
    Wgs84,
}

impl Crs {
    pub(crate) fn code(self) -> u8 {
        match self {
            Crs::Cartesian => 1,
            Crs::Wgs84 => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Crs::Cartesian),
            2 => Some(Crs::Wgs84),
            _ => None,
        }
    }
}

/// A two dimensional point.
#[derive(Copy, Clone, Debug)]
pub struct Point {
    /// Reference system.
    pub crs: Crs,
    /// First coordinate.
    pub x: f64,
    /// Second coordinate.
    pub y: f64,
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.crs == other.crs
            && self.x.to_bits() == other.x.to_bits()
            && self.y.to_bits() == other.y.to_bits()
    }
}

impl Eq for Point {}

/// Dates and times.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TemporalValue {
    /// Days since the Unix epoch.
    Date {
        /// Day number.
        epoch_day: i64,
    },
    /// Time of day without a zone.
    LocalTime {
        /// Nanoseconds since midnight.
        nano_of_day: i64,
    },
    /// Date and time without a zone.
    LocalDateTime {
        /// Milliseconds since the epoch.
        epoch_millis: i64,
    },
    /// Date and time at a fixed UTC offset.
    DateTime {
        /// Milliseconds since the epoch.
        epoch_millis: i64,
        /// Offset from UTC.
        offset_seconds: i32,
    },
}

/// Homogeneous arrays.
#[derive(Clone, Debug)]
pub enum ArrayValue {
    /// Booleans.
    Bool(Vec<bool>),
    /// Signed bytes.
    Byte(Vec<i8>),
    /// 16-bit integers.
    Short(Vec<i16>),
    /// Characters.
    Char(Vec<char>),
    /// 32-bit integers.
    Int(Vec<i32>),
    /// 64-bit integers.
    Long(Vec<i64>),
    /// Single-precision floats.
    Float(Vec<f32>),
    /// Double-precision floats.
    Double(Vec<f64>),
    /// Strings.
    String(Vec<String>),
}

impl ArrayValue {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Bool(v) => v.len(),
            ArrayValue::Byte(v) => v.len(),
            ArrayValue::Short(v) => v.len(),
            ArrayValue::Char(v) => v.len(),
            ArrayValue::Int(v) => v.len(),
            ArrayValue::Long(v) => v.len(),
            ArrayValue::Float(v) => v.len(),
            ArrayValue::Double(v) => v.len(),
            ArrayValue::String(v) => v.len(),
        }
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for ArrayValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ArrayValue::Bool(a), ArrayValue::Bool(b)) => a == b,
            (ArrayValue::Byte(a), ArrayValue::Byte(b)) => a == b,
            (ArrayValue::Short(a), ArrayValue::Short(b)) => a == b,
            (ArrayValue::Char(a), ArrayValue::Char(b)) => a == b,
            (ArrayValue::Int(a), ArrayValue::Int(b)) => a == b,
            (ArrayValue::Long(a), ArrayValue::Long(b)) => a == b,
            (ArrayValue::Float(a), ArrayValue::Float(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (ArrayValue::Double(a), ArrayValue::Double(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (ArrayValue::String(a), ArrayValue::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ArrayValue {}

/// A property value.
#[derive(Clone, Debug)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// A signed byte.
    Byte(i8),
    /// A 16-bit integer.
    Short(i16),
    /// A character.
    Char(char),
    /// A 32-bit integer.
    Int(i32),
    /// A 64-bit integer.
    Long(i64),
    /// A single-precision float; equal when the bits are.
    Float(f32),
    /// A double-precision float; equal when the bits are.
    Double(f64),
    /// A string of any length.
    String(String),
    /// A spatial point.
    Point(Point),
    /// A date, time or instant.
    Temporal(TemporalValue),
    /// A homogeneous array.
    Array(ArrayValue),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Point(a), Value::Point(b)) => a == b,
            (Value::Temporal(a), Value::Temporal(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    /// Order-preserving byte key used by property indexes. Integral types
    /// share one key space so that `Int(1)` and `Long(1)` collide.
    pub fn index_key(&self, out: &mut Vec<u8>) {
        match self {
            Value::Bool(v) => {
                out.push(1);
                out.push(*v as u8);
            }
            Value::Byte(v) => integral_key(out, *v as i64),
            Value::Short(v) => integral_key(out, *v as i64),
            Value::Int(v) => integral_key(out, *v as i64),
            Value::Long(v) => integral_key(out, *v),
            Value::Float(v) => {
                out.push(3);
                ord::put_f64(out, *v as f64);
            }
            Value::Double(v) => {
                out.push(3);
                ord::put_f64(out, *v);
            }
            Value::Char(c) => {
                out.push(4);
                let mut buf = [0u8; 4];
                ord::put_str(out, c.encode_utf8(&mut buf));
            }
            Value::String(s) => {
                out.push(4);
                ord::put_str(out, s);
            }
            Value::Point(p) => {
                out.push(5);
                out.push(p.crs.code());
                ord::put_f64(out, p.x);
                ord::put_f64(out, p.y);
            }
            Value::Temporal(t) => {
                out.push(6);
                match t {
                    TemporalValue::Date { epoch_day } => {
                        out.push(1);
                        ord::put_i64(out, *epoch_day);
                    }
                    TemporalValue::LocalTime { nano_of_day } => {
                        out.push(2);
                        ord::put_i64(out, *nano_of_day);
                    }
                    TemporalValue::LocalDateTime { epoch_millis } => {
                        out.push(3);
                        ord::put_i64(out, *epoch_millis);
                    }
                    TemporalValue::DateTime {
                        epoch_millis,
                        offset_seconds,
                    } => {
                        out.push(4);
                        ord::put_i64(out, *epoch_millis);
                        ord::put_i64(out, *offset_seconds as i64);
                    }
                }
            }
            Value::Array(array) => {
                out.push(7);
                out.extend_from_slice(&(array.len() as u32).to_be_bytes());
                out.extend_from_slice(format!("{array:?}").as_bytes());
            }
        }
    }
}

fn integral_key(out: &mut Vec<u8>, v: i64) {
    out.push(2);
    ord::put_i64(out, v);
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Short(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "'{v}'"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Point(p) => write!(f, "point({:?}, {}, {})", p.crs, p.x, p.y),
            Value::Temporal(t) => write!(f, "{t:?}"),
            Value::Array(a) => write!(f, "{a:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_compare_bitwise() {
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));
        assert_ne!(Value::Int(1), Value::Long(1));
    }

    #[test]
    fn integral_index_keys_collide_across_widths() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        Value::Int(7).index_key(&mut a);
        Value::Long(7).index_key(&mut b);
        assert_eq!(a, b);
        let mut c = Vec::new();
        Value::Long(8).index_key(&mut c);
        assert!(b < c);
    }
}
