use std::{cmp::Ordering, fmt, sync::Arc};

use arrow::{
    array::{
        Array, ArrayRef, BinaryArray, BooleanArray, Float64Array, Int64Array, StringArray,
        UInt64Array,
    },
    compute::cast,
    datatypes::DataType,
    error::ArrowError,
    util::display::{ArrayFormatter, FormatOptions},
};

/// Literal values accepted by predicate operands.
#[derive(Clone, Debug)]
pub enum ScalarValue {
    /// Represents SQL/Arrow `NULL`.
    Null,
    /// Boolean literal.
    Boolean(bool),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 64-bit floating point.
    Float64(f64),
    /// UTF-8 string.
    Utf8(String),
    /// Binary blob.
    Binary(Vec<u8>),
}

impl ScalarValue {
    /// Returns true when the literal is the `Null` variant.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Compares this scalar with another, returning the ordering when both sides are comparable.
    ///
    /// Integers of either signedness compare exactly; integers and floats compare as `f64`.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        use ScalarValue::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Boolean(lhs), Boolean(rhs)) => Some(lhs.cmp(rhs)),
            (Int64(lhs), Int64(rhs)) => Some(lhs.cmp(rhs)),
            (UInt64(lhs), UInt64(rhs)) => Some(lhs.cmp(rhs)),
            (Int64(lhs), UInt64(rhs)) => Some(i128::from(*lhs).cmp(&i128::from(*rhs))),
            (UInt64(lhs), Int64(rhs)) => Some(i128::from(*lhs).cmp(&i128::from(*rhs))),
            (Float64(lhs), Float64(rhs)) => lhs.partial_cmp(rhs),
            (Float64(lhs), Int64(rhs)) => lhs.partial_cmp(&(*rhs as f64)),
            (Float64(lhs), UInt64(rhs)) => lhs.partial_cmp(&(*rhs as f64)),
            (Int64(lhs), Float64(rhs)) => (*lhs as f64).partial_cmp(rhs),
            (UInt64(lhs), Float64(rhs)) => (*lhs as f64).partial_cmp(rhs),
            (Utf8(lhs), Utf8(rhs)) => Some(lhs.cmp(rhs)),
            (Binary(lhs), Binary(rhs)) => Some(lhs.cmp(rhs)),
            _ => None,
        }
    }

    /// Arrow type the literal is materialized with before casting.
    #[must_use]
    pub fn natural_type(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::UInt64(_) => DataType::UInt64,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Utf8(_) => DataType::Utf8,
            ScalarValue::Binary(_) => DataType::Binary,
        }
    }

    /// Returns true when a column of `data_type` can be compared against this literal.
    #[must_use]
    pub fn is_comparable_with(&self, data_type: &DataType) -> bool {
        match self {
            ScalarValue::Null => true,
            ScalarValue::Boolean(_) => matches!(data_type, DataType::Boolean),
            ScalarValue::Int64(_) | ScalarValue::UInt64(_) | ScalarValue::Float64(_) => {
                data_type.is_numeric()
            }
            ScalarValue::Utf8(_) => {
                matches!(data_type, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View)
            }
            ScalarValue::Binary(_) => matches!(
                data_type,
                DataType::Binary | DataType::LargeBinary | DataType::BinaryView
            ),
        }
    }

    /// Materializes the literal as an array of `len` copies with the requested type.
    pub fn to_array(&self, data_type: &DataType, len: usize) -> Result<ArrayRef, ArrowError> {
        let natural: ArrayRef = match self {
            ScalarValue::Null => return Ok(arrow::array::new_null_array(data_type, len)),
            ScalarValue::Boolean(v) => Arc::new(BooleanArray::from(vec![*v; len])),
            ScalarValue::Int64(v) => Arc::new(Int64Array::from(vec![*v; len])),
            ScalarValue::UInt64(v) => Arc::new(UInt64Array::from(vec![*v; len])),
            ScalarValue::Float64(v) => Arc::new(Float64Array::from(vec![*v; len])),
            ScalarValue::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str(); len])),
            ScalarValue::Binary(v) => Arc::new(BinaryArray::from(vec![v.as_slice(); len])),
        };
        if natural.data_type() == data_type {
            Ok(natural)
        } else {
            cast(&natural, data_type)
        }
    }

    /// Reads row `row` of `array` as a literal, widening integers and floats.
    ///
    /// Returns `None` for types that have no literal representation.
    pub fn try_from_array(array: &dyn Array, row: usize) -> Option<ScalarValue> {
        if array.is_null(row) {
            return Some(ScalarValue::Null);
        }
        let data_type = array.data_type();
        let widened = match data_type {
            DataType::Boolean => {
                let array = array.as_any().downcast_ref::<BooleanArray>()?;
                return Some(ScalarValue::Boolean(array.value(row)));
            }
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
                cast(&array.slice(row, 1), &DataType::Int64).ok()?
            }
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
                cast(&array.slice(row, 1), &DataType::UInt64).ok()?
            }
            DataType::Float16 | DataType::Float32 | DataType::Float64 => {
                cast(&array.slice(row, 1), &DataType::Float64).ok()?
            }
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
                cast(&array.slice(row, 1), &DataType::Utf8).ok()?
            }
            DataType::Binary | DataType::LargeBinary | DataType::BinaryView => {
                cast(&array.slice(row, 1), &DataType::Binary).ok()?
            }
            _ => return None,
        };
        let widened = widened.as_ref();
        match widened.data_type() {
            DataType::Int64 => widened
                .as_any()
                .downcast_ref::<Int64Array>()
                .map(|a| ScalarValue::Int64(a.value(0))),
            DataType::UInt64 => widened
                .as_any()
                .downcast_ref::<UInt64Array>()
                .map(|a| ScalarValue::UInt64(a.value(0))),
            DataType::Float64 => widened
                .as_any()
                .downcast_ref::<Float64Array>()
                .map(|a| ScalarValue::Float64(a.value(0))),
            DataType::Utf8 => widened
                .as_any()
                .downcast_ref::<StringArray>()
                .map(|a| ScalarValue::Utf8(a.value(0).to_string())),
            DataType::Binary => widened
                .as_any()
                .downcast_ref::<BinaryArray>()
                .map(|a| ScalarValue::Binary(a.value(0).to_vec())),
            _ => None,
        }
    }

    /// Parses a textual partition value into a literal of the field's type.
    ///
    /// Returns `None` when the text does not decode as `data_type`.
    pub fn parse_as(text: &str, data_type: &DataType) -> Option<ScalarValue> {
        match data_type {
            DataType::Boolean => text.parse::<bool>().ok().map(ScalarValue::Boolean),
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
                let value = text.parse::<i64>().ok()?;
                let fits = cast(&(Arc::new(Int64Array::from(vec![value])) as ArrayRef), data_type)
                    .map(|array| array.null_count() == 0)
                    .unwrap_or(false);
                fits.then_some(ScalarValue::Int64(value))
            }
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
                let value = text.parse::<u64>().ok()?;
                let fits = cast(&(Arc::new(UInt64Array::from(vec![value])) as ArrayRef), data_type)
                    .map(|array| array.null_count() == 0)
                    .unwrap_or(false);
                fits.then_some(ScalarValue::UInt64(value))
            }
            DataType::Float16 | DataType::Float32 | DataType::Float64 => {
                text.parse::<f64>().ok().map(ScalarValue::Float64)
            }
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
                Some(ScalarValue::Utf8(text.to_string()))
            }
            _ => None,
        }
    }

    /// Renders the literal the way it appears inside a partition path segment.
    pub fn to_path_text(&self) -> Option<String> {
        match self {
            ScalarValue::Null | ScalarValue::Binary(_) => None,
            ScalarValue::Boolean(v) => Some(v.to_string()),
            ScalarValue::Int64(v) => Some(v.to_string()),
            ScalarValue::UInt64(v) => Some(v.to_string()),
            ScalarValue::Float64(v) => Some(v.to_string()),
            ScalarValue::Utf8(v) => Some(v.clone()),
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScalarValue::Null, ScalarValue::Null) => true,
            (ScalarValue::Float64(lhs), ScalarValue::Float64(rhs)) => {
                lhs.to_bits() == rhs.to_bits()
            }
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("null"),
            ScalarValue::Boolean(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::UInt64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{v}"),
            ScalarValue::Utf8(v) => write!(f, "\"{v}\""),
            ScalarValue::Binary(v) => {
                let array = BinaryArray::from(vec![v.as_slice()]);
                let formatter = ArrayFormatter::try_new(&array, &FormatOptions::default())
                    .map_err(|_| fmt::Error)?;
                write!(f, "{}", formatter.value(0))
            }
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int64(i64::from(value))
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int64(value)
    }
}

impl From<u32> for ScalarValue {
    fn from(value: u32) -> Self {
        ScalarValue::UInt64(u64::from(value))
    }
}

impl From<u64> for ScalarValue {
    fn from(value: u64) -> Self {
        ScalarValue::UInt64(value)
    }
}

impl From<f32> for ScalarValue {
    fn from(value: f32) -> Self {
        ScalarValue::Float64(f64::from(value))
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float64(value)
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Utf8(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_owned())
    }
}

impl From<Vec<u8>> for ScalarValue {
    fn from(value: Vec<u8>) -> Self {
        ScalarValue::Binary(value)
    }
}

impl From<&[u8]> for ScalarValue {
    fn from(value: &[u8]) -> Self {
        ScalarValue::Binary(value.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Int32Array, StringArray};

    use super::*;

    #[test]
    fn mixed_width_numeric_comparison() {
        assert_eq!(
            ScalarValue::Int64(-1).compare(&ScalarValue::UInt64(1)),
            Some(Ordering::Less)
        );
        assert_eq!(
            ScalarValue::Float64(2.0).compare(&ScalarValue::Int64(2)),
            Some(Ordering::Equal)
        );
        assert_eq!(ScalarValue::from("a").compare(&ScalarValue::Int64(1)), None);
        assert_eq!(ScalarValue::Null.compare(&ScalarValue::Null), None);
        assert_eq!(ScalarValue::Null, ScalarValue::Null);
    }

    #[test]
    fn parse_respects_field_width() {
        assert_eq!(
            ScalarValue::parse_as("42", &DataType::Int32),
            Some(ScalarValue::Int64(42))
        );
        assert_eq!(ScalarValue::parse_as("300", &DataType::Int8), None);
        assert_eq!(ScalarValue::parse_as("abc", &DataType::Int64), None);
        assert_eq!(
            ScalarValue::parse_as("NY", &DataType::Utf8),
            Some(ScalarValue::from("NY"))
        );
    }

    #[test]
    fn array_round_trip_widens() {
        let ints = Int32Array::from(vec![Some(7), None]);
        assert_eq!(
            ScalarValue::try_from_array(&ints, 0),
            Some(ScalarValue::Int64(7))
        );
        assert_eq!(ScalarValue::try_from_array(&ints, 1), Some(ScalarValue::Null));

        let strings = StringArray::from(vec!["CA"]);
        assert_eq!(
            ScalarValue::try_from_array(&strings, 0),
            Some(ScalarValue::from("CA"))
        );

        let array = ScalarValue::Int64(5).to_array(&DataType::Int32, 3).unwrap();
        assert_eq!(array.data_type(), &DataType::Int32);
        assert_eq!(array.len(), 3);
    }
}
