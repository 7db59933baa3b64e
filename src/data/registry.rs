//! Static lookup from type names to cell constructors.
//!
//! Every scalar type answers to its short code (`F`), its long leaf name
//! (`Float_t`) and its plain name (`Float`). Array types use the same names
//! followed by `[]`, or `[N]` inside a full type specification.

use regex::Regex;
use std::sync::OnceLock;

use crate::data::cell::{ScalarType, TypedCell};
use crate::error::Result;

fn array_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<type>[^\[]+)\[(?P<length>\d+)\]$").expect("valid array pattern")
    })
}

fn plain_name(elem: ScalarType) -> &'static str {
    match elem {
        ScalarType::Bool => "Bool",
        ScalarType::Char => "Char",
        ScalarType::UChar => "UChar",
        ScalarType::Short => "Short",
        ScalarType::UShort => "UShort",
        ScalarType::Int => "Int",
        ScalarType::UInt => "UInt",
        ScalarType::Long => "Long",
        ScalarType::ULong => "ULong",
        ScalarType::Float => "Float",
        ScalarType::Double => "Double",
    }
}

/// Resolve a scalar type name
pub fn lookup(name: &str) -> Option<ScalarType> {
    ScalarType::ALL
        .into_iter()
        .find(|elem| name == elem.code() || name == elem.type_name() || name == plain_name(*elem))
}

/// Resolve an array type name such as `F[]`, `Float_t[]` or `FloatArray`
pub fn lookup_array(name: &str) -> Option<ScalarType> {
    if let Some(base) = name.strip_suffix("[]") {
        return lookup(base);
    }
    name.strip_suffix("Array").and_then(|base| {
        ScalarType::ALL
            .into_iter()
            .find(|elem| base == plain_name(*elem))
    })
}

/// Split a type specification into its element type and optional length.
///
/// `F` gives `(Float, None)`, `Int_t[4]` gives `(Int, Some(4))`.
pub fn parse_type_spec(spec: &str) -> Option<(ScalarType, Option<usize>)> {
    if let Some(caps) = array_pattern().captures(spec) {
        let elem = lookup(&caps["type"])?;
        let length = caps["length"].parse().ok()?;
        return Some((elem, Some(length)));
    }
    lookup(spec).map(|elem| (elem, None))
}

/// Create a scalar cell, or `None` for an unknown name
pub fn create(type_name: &str) -> Option<TypedCell> {
    lookup(type_name).map(TypedCell::scalar)
}

/// Create an array cell, or `None` for an unknown name.
///
/// Fails for character arrays too short to hold the null terminator.
pub fn create_array(type_name: &str, length: usize) -> Result<Option<TypedCell>> {
    let elem = match lookup_array(type_name).or_else(|| lookup(type_name)) {
        Some(elem) => elem,
        None => return Ok(None),
    };
    TypedCell::array(elem, length).map(Some)
}

/// Create a cell from a full type specification such as `D` or `C[16]`
pub fn create_from_spec(spec: &str) -> Result<Option<TypedCell>> {
    match parse_type_spec(spec) {
        Some((elem, Some(length))) => TypedCell::array(elem, length).map(Some),
        Some((elem, None)) => Ok(Some(TypedCell::scalar(elem))),
        None => Ok(None),
    }
}
