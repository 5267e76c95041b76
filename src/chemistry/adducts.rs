use bincode::{Decode, Encode};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chemistry::elements::ElementTable;
use crate::error::ChemistryError;

/// A resolved ionizing adduct: mass delta against the neutral molecule, net
/// charge and display name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct AdductSpec {
    pub mass_delta: f64,
    pub charge: i32,
    pub name: String,
}

impl AdductSpec {
    /// the "no adduct" case: neutral molecule, no mass change
    pub fn neutral() -> Self {
        AdductSpec { mass_delta: 0.0, charge: 0, name: "M".to_string() }
    }
}

/// An omitted digit run counts as 1; a present one must fit the count type.
fn parse_count(digits: &str) -> Result<i32, ChemistryError> {
    if digits.is_empty() {
        return Ok(1);
    }
    digits
        .parse::<i32>()
        .map_err(|_| ChemistryError::Format(format!("count '{}' is out of range", digits)))
}

/// Resolve an adduct notation string into an [AdductSpec].
///
/// Supported grammar: empty string (neutral), a pure charge token such as
/// "+", "-2" (radical ion, no mass change), or
/// `<atom-count?><element><sign><charge-count?>` where the sign controls both
/// whether the atoms are added or removed and the polarity of the charge.
/// Atom count and charge count are independent, so "2H+" (two protons, net
/// charge +1) differs from "2H+2" (two protons, net charge +2).
///
/// Arguments:
///
/// * `adduct` - the adduct notation to resolve.
/// * `table` - element and isotope reference table.
///
/// Returns:
///
/// * `Result<AdductSpec, ChemistryError>` - the resolved adduct.
///
/// # Example
///
/// ```
/// use mzformula::chemistry::adducts::resolve_adduct;
/// use mzformula::chemistry::elements::ElementTable;
///
/// let table = ElementTable::natural();
/// let proton = resolve_adduct("H+", &table).unwrap();
/// assert_eq!(proton.charge, 1);
/// assert_eq!(proton.name, "M+H");
/// assert_eq!((proton.mass_delta * 1e5).round() / 1e5, 1.00783);
/// ```
pub fn resolve_adduct(adduct: &str, table: &ElementTable) -> Result<AdductSpec, ChemistryError> {
    if adduct.is_empty() {
        return Ok(AdductSpec::neutral());
    }

    let radical = Regex::new(r"^([+-])(\d*)$").unwrap();
    if let Some(caps) = radical.captures(adduct) {
        let magnitude = parse_count(caps.get(2).unwrap().as_str())?;
        let charge = match caps.get(1).unwrap().as_str() {
            "+" => magnitude,
            _ => -magnitude,
        };
        return Ok(AdductSpec { mass_delta: 0.0, charge, name: "M".to_string() });
    }

    let pattern = Regex::new(r"^(\d*)([A-Z][a-z]*)([+-])(\d*)$").unwrap();
    let caps = pattern.captures(adduct).ok_or_else(|| {
        ChemistryError::Format(format!("unparsable adduct notation '{}'", adduct))
    })?;

    let atom_count = parse_count(caps.get(1).unwrap().as_str())?;
    let element = caps.get(2).unwrap().as_str();
    let sign = if caps.get(3).unwrap().as_str() == "+" { 1 } else { -1 };
    let charge_count = parse_count(caps.get(4).unwrap().as_str())?;

    let element_mass = table
        .monoisotopic_mass(element)
        .ok_or_else(|| ChemistryError::UnknownEntity(element.to_string()))?;

    let count_label = if atom_count == 1 { String::new() } else { atom_count.to_string() };
    let name = format!("M{}{}{}", if sign > 0 { "+" } else { "-" }, count_label, element);

    Ok(AdductSpec {
        mass_delta: sign as f64 * atom_count as f64 * element_mass,
        charge: sign * charge_count,
        name,
    })
}

/// calculate the m/z of an ion
///
/// Arguments:
///
/// * `neutral_mass` - monoisotopic mass of the neutral molecule
/// * `adduct` - resolved adduct carrying mass delta and charge
/// * `electron_mass` - electron mass from the reference table
///
/// Returns:
///
/// * `mz` - mass-over-charge of the ion, or the ion mass for charge 0
///
/// # Examples
///
/// ```
/// use mzformula::chemistry::adducts::{calculate_mz, resolve_adduct};
/// use mzformula::chemistry::constants::MASS_ELECTRON;
/// use mzformula::chemistry::elements::ElementTable;
///
/// let table = ElementTable::natural();
/// let proton = resolve_adduct("H+", &table).unwrap();
/// let mz = calculate_mz(1000.0, &proton, MASS_ELECTRON);
/// assert_eq!((mz * 1e6).round() / 1e6, 1001.007276);
/// ```
pub fn calculate_mz(neutral_mass: f64, adduct: &AdductSpec, electron_mass: f64) -> f64 {
    let ion_mass = neutral_mass + adduct.mass_delta - adduct.charge as f64 * electron_mass;
    if adduct.charge == 0 {
        ion_mass
    } else {
        ion_mass / adduct.charge.abs() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ElementTable {
        ElementTable::natural()
    }

    #[test]
    fn test_neutral_adduct() {
        let spec = resolve_adduct("", &table()).unwrap();
        assert_eq!(spec, AdductSpec::neutral());
        assert_eq!(spec.charge, 0);
        assert_eq!(spec.mass_delta, 0.0);
    }

    #[test]
    fn test_radical_ions() {
        let t = table();
        assert_eq!(resolve_adduct("+", &t).unwrap().charge, 1);
        assert_eq!(resolve_adduct("-", &t).unwrap().charge, -1);
        assert_eq!(resolve_adduct("+2", &t).unwrap().charge, 2);
        assert_eq!(resolve_adduct("-3", &t).unwrap().charge, -3);
        assert_eq!(resolve_adduct("+2", &t).unwrap().mass_delta, 0.0);
        assert_eq!(resolve_adduct("+", &t).unwrap().name, "M");
    }

    #[test]
    fn test_proton_gain_and_loss() {
        let t = table();
        let gain = resolve_adduct("H+", &t).unwrap();
        assert!((gain.mass_delta - 1.00782503223).abs() < 1e-9);
        assert_eq!(gain.charge, 1);
        assert_eq!(gain.name, "M+H");

        let loss = resolve_adduct("H-", &t).unwrap();
        assert!((loss.mass_delta + 1.00782503223).abs() < 1e-9);
        assert_eq!(loss.charge, -1);
        assert_eq!(loss.name, "M-H");
    }

    #[test]
    fn test_atom_count_independent_of_charge_count() {
        let t = table();
        let doubly = resolve_adduct("2H+2", &t).unwrap();
        assert!((doubly.mass_delta - 2.0 * 1.00782503223).abs() < 1e-9);
        assert_eq!(doubly.charge, 2);
        assert_eq!(doubly.name, "M+2H");

        let singly = resolve_adduct("2H+", &t).unwrap();
        assert!((singly.mass_delta - doubly.mass_delta).abs() < 1e-12);
        assert_eq!(singly.charge, 1);
    }

    #[test]
    fn test_sodium_adduct() {
        let spec = resolve_adduct("Na+", &table()).unwrap();
        assert!((spec.mass_delta - 22.9897692820).abs() < 1e-9);
        assert_eq!(spec.name, "M+Na");
    }

    #[test]
    fn test_calculate_mz() {
        let t = table();
        let neutral = resolve_adduct("", &t).unwrap();
        assert_eq!(calculate_mz(100.0, &neutral, 0.00054857990946), 100.0);

        let doubly = resolve_adduct("2H+2", &t).unwrap();
        let mz = calculate_mz(100.0, &doubly, 0.00054857990946);
        let expected = (100.0 + 2.0 * 1.00782503223 - 2.0 * 0.00054857990946) / 2.0;
        assert!((mz - expected).abs() < 1e-12);

        let deprotonated = resolve_adduct("H-", &t).unwrap();
        let negative = calculate_mz(100.0, &deprotonated, 0.00054857990946);
        assert!((negative - (100.0 - 1.00782503223 + 0.00054857990946)).abs() < 1e-12);
    }

    #[test]
    fn test_oversized_counts_raise_format() {
        let t = table();
        assert!(matches!(resolve_adduct("9999999999H+", &t), Err(ChemistryError::Format(_))));
        assert!(matches!(resolve_adduct("H+9999999999", &t), Err(ChemistryError::Format(_))));
        assert!(matches!(resolve_adduct("+9999999999", &t), Err(ChemistryError::Format(_))));
    }

    #[test]
    fn test_malformed_adducts() {
        let t = table();
        assert!(matches!(resolve_adduct("H", &t), Err(ChemistryError::Format(_))));
        assert!(matches!(resolve_adduct("+H", &t), Err(ChemistryError::Format(_))));
        assert!(matches!(resolve_adduct("H++", &t), Err(ChemistryError::Format(_))));
        assert!(matches!(resolve_adduct("Qq+", &t), Err(ChemistryError::UnknownEntity(_))));
    }
}
