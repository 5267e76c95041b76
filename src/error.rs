use thiserror::Error;

/// Failure modes of formula parsing, adduct resolution and the numeric entry points.
///
/// `Format` and `UnknownEntity` signal bad input text, `Validation` signals an
/// out-of-range numeric parameter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChemistryError {
    #[error("malformed formula or adduct notation: {0}")]
    Format(String),
    #[error("unknown element or isotope symbol: {0}")]
    UnknownEntity(String),
    #[error("invalid parameter: {0}")]
    Validation(String),
}
