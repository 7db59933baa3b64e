use std::cmp::Ordering;
use std::fmt;

use crate::data::value::{compare_values, Value};
use crate::error::{Result, TreeError};

/// Element type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

impl ScalarType {
    pub const ALL: [ScalarType; 11] = [
        ScalarType::Bool,
        ScalarType::Char,
        ScalarType::UChar,
        ScalarType::Short,
        ScalarType::UShort,
        ScalarType::Int,
        ScalarType::UInt,
        ScalarType::Long,
        ScalarType::ULong,
        ScalarType::Float,
        ScalarType::Double,
    ];

    /// Short leaf code, e.g. `F` or `UI`
    pub fn code(self) -> &'static str {
        match self {
            ScalarType::Bool => "B",
            ScalarType::Char => "C",
            ScalarType::UChar => "UC",
            ScalarType::Short => "S",
            ScalarType::UShort => "US",
            ScalarType::Int => "I",
            ScalarType::UInt => "UI",
            ScalarType::Long => "L",
            ScalarType::ULong => "UL",
            ScalarType::Float => "F",
            ScalarType::Double => "D",
        }
    }

    /// Long leaf type name, e.g. `Float_t`
    pub fn type_name(self) -> &'static str {
        match self {
            ScalarType::Bool => "Bool_t",
            ScalarType::Char => "Char_t",
            ScalarType::UChar => "UChar_t",
            ScalarType::Short => "Short_t",
            ScalarType::UShort => "UShort_t",
            ScalarType::Int => "Int_t",
            ScalarType::UInt => "UInt_t",
            ScalarType::Long => "Long64_t",
            ScalarType::ULong => "ULong64_t",
            ScalarType::Float => "Float_t",
            ScalarType::Double => "Double_t",
        }
    }

    pub fn is_char(self) -> bool {
        matches!(self, ScalarType::Char | ScalarType::UChar)
    }

    pub fn is_integral(self) -> bool {
        !matches!(
            self,
            ScalarType::Bool | ScalarType::Float | ScalarType::Double
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            ScalarType::UChar | ScalarType::UShort | ScalarType::UInt | ScalarType::ULong
        )
    }

    pub fn default_value(self) -> Value {
        match self {
            ScalarType::Bool => Value::Bool(false),
            ScalarType::Char | ScalarType::Short | ScalarType::Int | ScalarType::Long => {
                Value::Int(0)
            }
            ScalarType::UChar | ScalarType::UShort | ScalarType::UInt | ScalarType::ULong => {
                Value::UInt(0)
            }
            ScalarType::Float | ScalarType::Double => Value::Float(0.0),
        }
    }

    /// Convert an arbitrary value into this type's canonical representation.
    ///
    /// Negative input to an unsigned type fails here, at assignment time.
    /// Integer types reject NaN and infinities.
    pub fn convert(self, value: &Value) -> Result<Value> {
        let mismatch = || TreeError::TypeMismatch {
            expected: self.type_name(),
            found: value.describe(),
        };
        if let Value::Float(f) = value {
            if !f.is_finite() && self.is_integral() {
                return Err(self.out_of_range(value));
            }
        }
        match self {
            ScalarType::Bool => value.as_bool().map(Value::Bool).ok_or_else(mismatch),
            ScalarType::Char | ScalarType::Short | ScalarType::Int | ScalarType::Long => {
                let v = match value {
                    Value::Float(f) => f.trunc(),
                    other => other.as_f64().ok_or_else(mismatch)?,
                };
                let (min, max) = match self {
                    ScalarType::Char => (i8::MIN as f64, i8::MAX as f64),
                    ScalarType::Short => (i16::MIN as f64, i16::MAX as f64),
                    ScalarType::Int => (i32::MIN as f64, i32::MAX as f64),
                    _ => (i64::MIN as f64, i64::MAX as f64),
                };
                if let Value::UInt(u) = value {
                    if *u > i64::MAX as u64 || (*u as f64) > max {
                        return Err(self.out_of_range(value));
                    }
                    return Ok(Value::Int(*u as i64));
                }
                // i64::MAX rounds up to 2^63 as a float
                let too_big = match value {
                    Value::Float(_) if self == ScalarType::Long => v >= max,
                    _ => v > max,
                };
                if v < min || too_big {
                    return Err(self.out_of_range(value));
                }
                match value {
                    Value::Int(i) => Ok(Value::Int(*i)),
                    _ => Ok(Value::Int(v as i64)),
                }
            }
            ScalarType::UChar | ScalarType::UShort | ScalarType::UInt | ScalarType::ULong => {
                let max = match self {
                    ScalarType::UChar => u8::MAX as u64,
                    ScalarType::UShort => u16::MAX as u64,
                    ScalarType::UInt => u32::MAX as u64,
                    _ => u64::MAX,
                };
                let u = match value {
                    Value::Int(i) if *i < 0 => return Err(TreeError::NegativeUnsigned(*i)),
                    Value::Float(f) if *f < 0.0 => {
                        return Err(TreeError::NegativeUnsigned(f.trunc() as i64))
                    }
                    // u64::MAX rounds up to 2^64 as a float
                    Value::Float(f) if f.trunc() >= u64::MAX as f64 => {
                        return Err(self.out_of_range(value))
                    }
                    Value::Float(f) => f.trunc() as u64,
                    other => other.as_u64().ok_or_else(mismatch)?,
                };
                if u > max {
                    return Err(self.out_of_range(value));
                }
                Ok(Value::UInt(u))
            }
            ScalarType::Float => {
                let v = value.as_f64().ok_or_else(mismatch)?;
                Ok(Value::Float(v as f32 as f64))
            }
            ScalarType::Double => value.as_f64().map(Value::Float).ok_or_else(mismatch),
        }
    }

    fn out_of_range(self, value: &Value) -> TreeError {
        TreeError::OutOfRange {
            value: value.to_string(),
            type_name: self.type_name(),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Shape of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Scalar(ScalarType),
    Array { elem: ScalarType, length: usize },
    /// Null-terminated character buffer; the last byte is reserved
    Chars { elem: ScalarType, length: usize },
}

#[derive(Debug, Clone)]
enum Slots {
    Values(Vec<Value>),
    Bytes(Vec<u8>),
}

/// A fixed-size typed storage slot for one column of the current row
#[derive(Debug, Clone)]
pub struct TypedCell {
    kind: CellKind,
    slots: Slots,
    default: Value,
    resetable: bool,
}

impl TypedCell {
    /// Create a single-valued cell. Char types get a two byte buffer.
    pub fn scalar(elem: ScalarType) -> Self {
        let default = elem.default_value();
        let slots = if elem.is_char() {
            Slots::Bytes(vec![0; 2])
        } else {
            Slots::Values(vec![default.clone()])
        };
        Self {
            kind: CellKind::Scalar(elem),
            slots,
            default,
            resetable: true,
        }
    }

    /// Create a fixed-length array cell.
    ///
    /// Character arrays need room for the null terminator: length 1 is
    /// rejected and length 2 degrades to a scalar char.
    pub fn array(elem: ScalarType, length: usize) -> Result<Self> {
        if elem.is_char() {
            return match length {
                0 | 1 => Err(TreeError::InvalidLength {
                    name: format!("{}[{}]", elem.code(), length),
                    length,
                }),
                2 => Ok(Self::scalar(elem)),
                _ => Ok(Self {
                    kind: CellKind::Chars { elem, length },
                    slots: Slots::Bytes(vec![0; length]),
                    default: Value::Text(String::new()),
                    resetable: true,
                }),
            };
        }
        let default = elem.default_value();
        Ok(Self {
            kind: CellKind::Array { elem, length },
            slots: Slots::Values(vec![default.clone(); length]),
            default,
            resetable: true,
        })
    }

    /// Set the default value and initialize the cell with it.
    ///
    /// Scalar chars take a number or a one character string; character
    /// buffers take a string that leaves room for the terminator.
    pub fn with_default(mut self, default: impl Into<Value>) -> Result<Self> {
        let default = default.into();
        self.default = match self.kind {
            CellKind::Scalar(elem) if elem.is_char() => {
                byte_value(elem, scalar_char_byte(elem, &default)?)
            }
            CellKind::Scalar(elem) | CellKind::Array { elem, .. } => elem.convert(&default)?,
            CellKind::Chars { elem, length } => {
                let bytes = chars_bytes(elem, length, &default)?;
                Value::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
        };
        let resetable = self.resetable;
        self.resetable = true;
        self.reset();
        self.resetable = resetable;
        Ok(self)
    }

    /// Cells that are not resetable keep their value across `reset` calls
    pub fn with_resetable(mut self, resetable: bool) -> Self {
        self.resetable = resetable;
        self
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self.kind {
            CellKind::Scalar(elem)
            | CellKind::Array { elem, .. }
            | CellKind::Chars { elem, .. } => elem,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, CellKind::Scalar(_))
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn is_resetable(&self) -> bool {
        self.resetable
    }

    /// Number of stored elements (1 for scalars)
    pub fn len(&self) -> usize {
        match self.kind {
            CellKind::Scalar(_) => 1,
            CellKind::Array { length, .. } | CellKind::Chars { length, .. } => length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Type specification as accepted by the registry, e.g. `F` or `I[4]`
    pub fn type_spec(&self) -> String {
        match self.kind {
            CellKind::Scalar(elem) => elem.code().to_string(),
            CellKind::Array { elem, length } | CellKind::Chars { elem, length } => {
                format!("{}[{}]", elem.code(), length)
            }
        }
    }

    pub fn reset(&mut self) {
        if !self.resetable {
            return;
        }
        match &mut self.slots {
            Slots::Values(values) => values.iter_mut().for_each(|v| *v = self.default.clone()),
            Slots::Bytes(bytes) => fill_bytes(bytes, &self.default),
        }
    }

    /// Current value: unwrapped for scalars, `Array` for arrays and `Text`
    /// for character buffers. Scalar chars read back as numbers.
    pub fn value(&self) -> Value {
        match (&self.kind, &self.slots) {
            (CellKind::Scalar(elem), Slots::Bytes(bytes)) => byte_value(*elem, bytes[0]),
            (CellKind::Scalar(_), Slots::Values(values)) => values[0].clone(),
            (_, Slots::Values(values)) => Value::Array(values.clone()),
            (_, Slots::Bytes(bytes)) => {
                let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
                Value::Text(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
        }
    }

    /// Element of an array cell
    pub fn get(&self, index: usize) -> Option<Value> {
        match &self.slots {
            Slots::Values(values) => values.get(index).cloned(),
            Slots::Bytes(bytes) => bytes
                .get(index)
                .map(|b| byte_value(self.scalar_type(), *b)),
        }
    }

    pub fn set(&mut self, value: &Value) -> Result<()> {
        match self.kind {
            CellKind::Scalar(elem) if elem.is_char() => {
                let byte = scalar_char_byte(elem, value)?;
                if let Slots::Bytes(bytes) = &mut self.slots {
                    bytes[0] = byte;
                }
                Ok(())
            }
            CellKind::Scalar(elem) => {
                let converted = elem.convert(value)?;
                if let Slots::Values(values) = &mut self.slots {
                    values[0] = converted;
                }
                Ok(())
            }
            CellKind::Array { elem, length } => {
                let items = value.as_array().ok_or_else(|| TreeError::TypeMismatch {
                    expected: "array",
                    found: value.describe(),
                })?;
                if items.len() > length {
                    return Err(TreeError::IndexOutOfRange {
                        name: self.type_spec(),
                        index: items.len() - 1,
                        size: length,
                    });
                }
                let converted = items
                    .iter()
                    .map(|item| elem.convert(item))
                    .collect::<Result<Vec<_>>>()?;
                if let Slots::Values(values) = &mut self.slots {
                    let count = converted.len();
                    for (slot, v) in values.iter_mut().zip(converted) {
                        *slot = v;
                    }
                    for slot in values.iter_mut().skip(count) {
                        *slot = self.default.clone();
                    }
                }
                Ok(())
            }
            CellKind::Chars { elem, length } => {
                let incoming = chars_bytes(elem, length, value)?;
                if let Slots::Bytes(bytes) = &mut self.slots {
                    bytes[..incoming.len()].copy_from_slice(&incoming);
                    bytes[incoming.len()..].iter_mut().for_each(|b| *b = 0);
                }
                Ok(())
            }
        }
    }

    /// Assign one element of an array cell
    pub fn set_at(&mut self, index: usize, value: &Value) -> Result<()> {
        let size = self.len();
        if index >= size || self.is_scalar() {
            return Err(TreeError::IndexOutOfRange {
                name: self.type_spec(),
                index,
                size,
            });
        }
        match (self.kind, &mut self.slots) {
            (CellKind::Chars { elem, length }, Slots::Bytes(bytes)) => {
                // the terminator slot stays untouched
                if index == length - 1 {
                    return Err(TreeError::StringTooLong {
                        length: index + 1,
                        capacity: length,
                    });
                }
                bytes[index] = char_byte(elem, value)?;
            }
            (CellKind::Array { elem, .. }, Slots::Values(values)) => {
                values[index] = elem.convert(value)?;
            }
            _ => unreachable!("array cells always use matching slots"),
        }
        Ok(())
    }

    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        compare_values(&self.value(), other)
    }
}

fn byte_value(elem: ScalarType, b: u8) -> Value {
    match elem {
        ScalarType::Char => Value::Int(b as i8 as i64),
        _ => Value::UInt(b as u64),
    }
}

/// Byte stored by a scalar char: a number in range or a string of at most
/// one byte
fn scalar_char_byte(elem: ScalarType, value: &Value) -> Result<u8> {
    match value {
        Value::Text(s) if s.len() <= 1 => Ok(s.bytes().next().unwrap_or(0)),
        Value::Text(s) => Err(TreeError::StringTooLong {
            length: s.len(),
            capacity: 2,
        }),
        other => char_byte(elem, other),
    }
}

/// Content bytes of a character buffer, without the terminator
fn chars_bytes(elem: ScalarType, length: usize, value: &Value) -> Result<Vec<u8>> {
    let incoming: Vec<u8> = match value {
        Value::Text(s) => s.as_bytes().to_vec(),
        Value::Array(items) => items
            .iter()
            .map(|item| char_byte(elem, item))
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(TreeError::TypeMismatch {
                expected: elem.type_name(),
                found: other.describe(),
            })
        }
    };
    if incoming.len() >= length {
        return Err(TreeError::StringTooLong {
            length: incoming.len(),
            capacity: length,
        });
    }
    Ok(incoming)
}

/// Write a byte-backed default: a char code or a buffer's text, null padded
fn fill_bytes(bytes: &mut [u8], default: &Value) {
    bytes.iter_mut().for_each(|b| *b = 0);
    match default {
        Value::Text(s) => {
            let n = s.len().min(bytes.len().saturating_sub(1));
            bytes[..n].copy_from_slice(&s.as_bytes()[..n]);
        }
        Value::Int(i) => bytes[0] = *i as i8 as u8,
        Value::UInt(u) => bytes[0] = *u as u8,
        _ => {}
    }
}

fn char_byte(elem: ScalarType, value: &Value) -> Result<u8> {
    match elem.convert(value)? {
        Value::Int(i) => Ok(i as i8 as u8),
        Value::UInt(u) => Ok(u as u8),
        other => Err(TreeError::TypeMismatch {
            expected: elem.type_name(),
            found: other.describe(),
        }),
    }
}

impl PartialEq<Value> for TypedCell {
    fn eq(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl fmt::Display for TypedCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CellKind::Scalar(elem) => write!(f, "{}({})", elem.code(), self.value()),
            _ => write!(f, "{}{}", self.scalar_type().code(), self.value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_restores_default() {
        for elem in ScalarType::ALL {
            let mut cell = TypedCell::scalar(elem);
            assert_eq!(cell.value(), *cell.default_value(), "{elem}");
            cell.set(&Value::Int(1)).unwrap();
            assert_ne!(cell.value(), *cell.default_value(), "{elem}");
            cell.reset();
            assert_eq!(cell.value(), *cell.default_value(), "{elem}");
        }
    }

    #[test]
    fn test_scalar_char_reads_back_as_number() {
        let mut cell = TypedCell::scalar(ScalarType::Char);
        cell.set(&Value::from("A")).unwrap();
        assert_eq!(cell.value(), Value::Int(65));
        cell.set(&Value::Int(-2)).unwrap();
        assert_eq!(cell.value(), Value::Int(-2));

        let mut cell = TypedCell::scalar(ScalarType::UChar).with_default("x").unwrap();
        assert_eq!(*cell.default_value(), Value::UInt(120));
        cell.set(&Value::UInt(200)).unwrap();
        assert_eq!(cell.value(), Value::UInt(200));
        cell.reset();
        assert_eq!(cell.value(), Value::UInt(120));

        assert!(TypedCell::scalar(ScalarType::Char).with_default(300).is_err());
        assert!(TypedCell::scalar(ScalarType::Char).with_default("ab").is_err());
    }

    #[test]
    fn test_char_buffer_default() {
        let mut cell = TypedCell::array(ScalarType::Char, 6)
            .unwrap()
            .with_default("none")
            .unwrap();
        assert_eq!(cell.value(), Value::from("none"));
        cell.set(&Value::from("ab")).unwrap();
        cell.reset();
        assert_eq!(cell.value(), *cell.default_value());
        assert!(TypedCell::array(ScalarType::Char, 4)
            .unwrap()
            .with_default("four")
            .is_err());
    }

    #[test]
    fn test_integers_reject_non_finite_floats() {
        for elem in ScalarType::ALL.into_iter().filter(|e| e.is_integral()) {
            let mut cell = TypedCell::scalar(elem);
            for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
                assert!(
                    matches!(cell.set(&Value::Float(f)), Err(TreeError::OutOfRange { .. })),
                    "{elem} {f}"
                );
            }
        }
        let mut cell = TypedCell::scalar(ScalarType::ULong);
        assert!(matches!(
            cell.set(&Value::Float(18_446_744_073_709_551_616.0)),
            Err(TreeError::OutOfRange { .. })
        ));
        cell.set(&Value::Float(1.0e19)).unwrap();
        assert_eq!(cell.value(), Value::UInt(10_000_000_000_000_000_000));

        let mut cell = TypedCell::scalar(ScalarType::Long);
        assert!(matches!(
            cell.set(&Value::Float(9_223_372_036_854_775_808.0)),
            Err(TreeError::OutOfRange { .. })
        ));
        cell.set(&Value::Int(i64::MAX)).unwrap();
        assert_eq!(cell.value(), Value::Int(i64::MAX));
    }

    #[test]
    fn test_custom_default() {
        let mut cell = TypedCell::scalar(ScalarType::Int).with_default(-999).unwrap();
        assert_eq!(cell.value(), Value::Int(-999));
        cell.set(&Value::Int(4)).unwrap();
        cell.reset();
        assert_eq!(cell.value(), Value::Int(-999));
    }

    #[test]
    fn test_not_resetable_keeps_value() {
        let mut cell = TypedCell::scalar(ScalarType::ULong).with_resetable(false);
        cell.set(&Value::UInt(77)).unwrap();
        cell.reset();
        assert_eq!(cell.value(), Value::UInt(77));
    }

    #[test]
    fn test_unsigned_rejects_negative() {
        for elem in [
            ScalarType::UShort,
            ScalarType::UInt,
            ScalarType::ULong,
            ScalarType::UChar,
        ] {
            let mut cell = TypedCell::scalar(elem);
            assert!(matches!(
                cell.set(&Value::Int(-1)),
                Err(TreeError::NegativeUnsigned(-1))
            ));
            cell.set(&Value::Int(0)).unwrap();
            cell.set(&Value::Int(12)).unwrap();
        }
        let mut cell = TypedCell::scalar(ScalarType::UInt);
        cell.set(&Value::Int(12)).unwrap();
        assert_eq!(cell.value(), Value::UInt(12));
    }

    #[test]
    fn test_width_overflow() {
        let mut cell = TypedCell::scalar(ScalarType::Short);
        assert!(matches!(
            cell.set(&Value::Int(40_000)),
            Err(TreeError::OutOfRange { .. })
        ));
        cell.set(&Value::Float(-3.7)).unwrap();
        assert_eq!(cell.value(), Value::Int(-3));
    }

    #[test]
    fn test_float_precision() {
        let mut cell = TypedCell::scalar(ScalarType::Float);
        cell.set(&Value::Float(0.1)).unwrap();
        assert_eq!(cell.value(), Value::Float(0.1f32 as f64));
    }

    #[test]
    fn test_char_array_bounds() {
        let mut cell = TypedCell::array(ScalarType::Char, 5).unwrap();
        assert!(matches!(
            cell.set(&Value::from("abcde")),
            Err(TreeError::StringTooLong { length: 5, capacity: 5 })
        ));
        cell.set(&Value::from("abcd")).unwrap();
        cell.set(&Value::from("ab")).unwrap();
        assert_eq!(cell.value(), Value::from("ab"));
        assert_eq!(cell.get(2), Some(Value::Int(0)));
        assert_eq!(cell.get(4), Some(Value::Int(0)));
    }

    #[test]
    fn test_char_array_lengths() {
        assert!(matches!(
            TypedCell::array(ScalarType::Char, 1),
            Err(TreeError::InvalidLength { .. })
        ));
        let cell = TypedCell::array(ScalarType::UChar, 2).unwrap();
        assert!(cell.is_scalar());
        assert_eq!(cell.type_spec(), "UC");
    }

    #[test]
    fn test_array_set_pads_with_default() {
        let mut cell = TypedCell::array(ScalarType::Int, 4)
            .unwrap()
            .with_default(-1)
            .unwrap();
        cell.set(&Value::from(vec![1, 2])).unwrap();
        assert_eq!(cell.value(), Value::from(vec![1, 2, -1, -1]));
        assert!(cell.set(&Value::from(vec![1, 2, 3, 4, 5])).is_err());
        cell.set_at(3, &Value::Int(9)).unwrap();
        assert_eq!(cell.get(3), Some(Value::Int(9)));
        assert!(cell.set_at(4, &Value::Int(9)).is_err());
    }

    #[test]
    fn test_comparison() {
        let mut cell = TypedCell::scalar(ScalarType::Double);
        cell.set(&Value::Float(2.5)).unwrap();
        assert!(cell == Value::Float(2.5));
        assert_eq!(cell.compare(&Value::Int(3)), Some(Ordering::Less));
        assert_eq!(cell.to_string(), "D(2.5)");
    }
}
