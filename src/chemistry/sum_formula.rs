use std::collections::HashMap;

use itertools::Itertools;
use regex::Regex;

use crate::algorithm::isotope::generate_isotope_distribution;
use crate::chemistry::adducts::AdductSpec;
use crate::chemistry::elements::ElementTable;
use crate::error::ChemistryError;

/// Atom key (element symbol or specific-isotope label) to count.
pub type Composition = HashMap<String, i32>;

/// Parse a chemical formula into a map of atom keys and their counts.
///
/// Round-bracket groups with trailing multipliers are expanded, square-bracket
/// isotope tokens ("[13C]2") accumulate under their isotope label, and the
/// deuterium shorthand "D" resolves to "2H".
///
/// Arguments:
///
/// * `formula` - the chemical formula to parse.
/// * `table` - element and isotope reference table.
///
/// Returns:
///
/// * `Result<Composition, ChemistryError>` - a map of atom keys and their counts.
///
/// # Example
///
/// ```
/// use mzformula::chemistry::elements::ElementTable;
/// use mzformula::chemistry::sum_formula::parse_formula;
///
/// let table = ElementTable::natural();
/// let elements = parse_formula("(CH3)2CO", &table).unwrap();
/// assert_eq!(elements.get("C"), Some(&3));
/// assert_eq!(elements.get("H"), Some(&6));
/// assert_eq!(elements.get("O"), Some(&1));
///
/// let labeled = parse_formula("[13C]C2H6O", &table).unwrap();
/// assert_eq!(labeled.get("13C"), Some(&1));
/// assert_eq!(labeled.get("C"), Some(&2));
/// ```
pub fn parse_formula(formula: &str, table: &ElementTable) -> Result<Composition, ChemistryError> {
    if formula.is_empty() {
        return Err(ChemistryError::Format("empty formula".to_string()));
    }
    let allowed = Regex::new(r"^[A-Za-z0-9()\[\]]+$").unwrap();
    if !allowed.is_match(formula) {
        return Err(ChemistryError::Format(format!(
            "disallowed characters in '{}'",
            formula
        )));
    }

    let expanded = expand_groups(formula)?;
    let (remainder, mut composition) = extract_isotope_tokens(&expanded, table)?;
    tokenize_elements(&remainder, table, &mut composition)?;
    Ok(composition)
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

/// Expand round-bracket groups innermost-first until none remain.
///
/// A digit run directly after the closing bracket multiplies the group; a
/// missing or zero multiplier counts as 1.
fn expand_groups(formula: &str) -> Result<String, ChemistryError> {
    let group = Regex::new(r"\(([^()]*)\)(\d*)").unwrap();
    let mut text = formula.to_string();

    while let Some(caps) = group.captures(&text) {
        let full = caps.get(0).unwrap();
        let content = caps.get(1).unwrap().as_str();
        let multiplier = parse_count(caps.get(2).unwrap().as_str())?.max(1) as usize;

        let mut next = String::with_capacity(text.len() + content.len() * multiplier);
        next.push_str(&text[..full.start()]);
        for _ in 0..multiplier {
            next.push_str(content);
        }
        next.push_str(&text[full.end()..]);
        text = next;
    }

    if text.contains('(') || text.contains(')') {
        return Err(ChemistryError::Format(format!(
            "unbalanced parentheses in '{}'",
            formula
        )));
    }
    Ok(text)
}

/// Pull "[<label>]<count?>" isotope tokens out of the string, accumulating
/// their counts, and return the remaining text.
fn extract_isotope_tokens(
    text: &str,
    table: &ElementTable,
) -> Result<(String, Composition), ChemistryError> {
    let token = Regex::new(r"\[(\d+[A-Z][a-z]*)\](\d*)").unwrap();
    let mut composition = Composition::new();

    for caps in token.captures_iter(text) {
        let label = caps.get(1).unwrap().as_str();
        let count = parse_count(caps.get(2).unwrap().as_str())?;
        if table.isotope_mass(label).is_none() {
            return Err(ChemistryError::UnknownEntity(label.to_string()));
        }
        *composition.entry(label.to_string()).or_insert(0) += count;
    }

    let remainder = token.replace_all(text, "").to_string();
    if remainder.contains('[') || remainder.contains(']') {
        return Err(ChemistryError::Format(format!(
            "unbalanced isotope brackets in '{}'",
            text
        )));
    }
    Ok((remainder, composition))
}

/// Tokenize the bracket-free remainder into element symbols with optional
/// counts, verifying that every character is consumed.
fn tokenize_elements(
    text: &str,
    table: &ElementTable,
    composition: &mut Composition,
) -> Result<(), ChemistryError> {
    let token = Regex::new(r"([A-Z][a-z]*)(\d*)").unwrap();
    let mut consumed = 0;

    for caps in token.captures_iter(text) {
        let full = caps.get(0).unwrap();
        if full.start() != consumed {
            return Err(ChemistryError::Format(format!(
                "unparsable fragment '{}'",
                &text[consumed..full.start()]
            )));
        }
        consumed = full.end();

        let symbol = caps.get(1).unwrap().as_str();
        let count = parse_count(caps.get(2).unwrap().as_str())?;

        // deuterium shorthand resolves to the heavy hydrogen isotope
        let key = if symbol == "D" {
            if table.isotope_mass("2H").is_none() {
                return Err(ChemistryError::UnknownEntity("D".to_string()));
            }
            "2H".to_string()
        } else {
            if !table.contains(symbol) {
                return Err(ChemistryError::UnknownEntity(symbol.to_string()));
            }
            symbol.to_string()
        };
        *composition.entry(key).or_insert(0) += count;
    }

    if consumed != text.len() {
        return Err(ChemistryError::Format(format!(
            "unparsable fragment '{}'",
            &text[consumed..]
        )));
    }
    Ok(())
}

/// Monoisotopic mass of a composition: most abundant isotope per element,
/// exact isotope mass for specific-isotope keys. The electron pseudo-element
/// "e" is skipped.
pub fn monoisotopic_mass_of(
    composition: &Composition,
    table: &ElementTable,
) -> Result<f64, ChemistryError> {
    let mut mass = 0.0;
    for (key, &count) in composition.iter().sorted() {
        if key == "e" || count == 0 {
            continue;
        }
        mass += table.atom_monoisotopic_mass(key)? * count as f64;
    }
    Ok(mass)
}

/// Render a composition in Hill order: carbon first, hydrogen second, all
/// remaining keys alphabetical; fully alphabetical when no carbon is present.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use mzformula::chemistry::sum_formula::composition_to_hill;
///
/// let composition = HashMap::from([
///     ("O".to_string(), 1),
///     ("C".to_string(), 3),
///     ("H".to_string(), 6),
/// ]);
/// assert_eq!(composition_to_hill(&composition), "C3H6O");
/// ```
pub fn composition_to_hill(composition: &Composition) -> String {
    let has_carbon = composition.get("C").copied().unwrap_or(0) > 0;

    let mut ordered: Vec<&str> = Vec::new();
    if has_carbon {
        ordered.push("C");
        if composition.get("H").copied().unwrap_or(0) > 0 {
            ordered.push("H");
        }
    }
    let rest = composition
        .keys()
        .map(|k| k.as_str())
        .filter(|&k| composition[k] > 0)
        .filter(|&k| !has_carbon || (k != "C" && k != "H"))
        .sorted();
    ordered.extend(rest);

    let mut formula = String::new();
    for key in ordered {
        let count = composition[key];
        if key.starts_with(|c: char| c.is_ascii_digit()) {
            formula.push_str(&format!("[{}]", key));
        } else {
            formula.push_str(key);
        }
        if count != 1 {
            formula.push_str(&count.to_string());
        }
    }
    formula
}

/// A chemical sum formula together with its parsed composition.
pub struct SumFormula {
    pub formula: String,
    pub elements: Composition,
}

impl SumFormula {
    pub fn new(formula: &str, table: &ElementTable) -> Result<Self, ChemistryError> {
        let elements = parse_formula(formula, table)?;
        Ok(SumFormula { formula: formula.to_string(), elements })
    }

    /// Calculate the monoisotopic mass of the chemical formula.
    ///
    /// # Example
    ///
    /// ```
    /// use mzformula::chemistry::elements::ElementTable;
    /// use mzformula::chemistry::sum_formula::SumFormula;
    ///
    /// let table = ElementTable::natural();
    /// let sum_formula = SumFormula::new("H2O", &table).unwrap();
    /// let mass = sum_formula.monoisotopic_mass(&table).unwrap();
    /// assert!((mass - 18.01056468403).abs() < 1e-9);
    /// ```
    pub fn monoisotopic_mass(&self, table: &ElementTable) -> Result<f64, ChemistryError> {
        monoisotopic_mass_of(&self.elements, table)
    }

    /// Generate the neutral isotope distribution of the chemical formula.
    pub fn isotope_distribution(
        &self,
        abundance_cutoff: f64,
        resolution: f64,
        table: &ElementTable,
    ) -> Result<Vec<(f64, f64)>, ChemistryError> {
        generate_isotope_distribution(
            &self.elements,
            abundance_cutoff,
            resolution,
            &AdductSpec::neutral(),
            table,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ElementTable {
        ElementTable::natural()
    }

    #[test]
    fn test_parenthetical_equivalence() {
        let t = table();
        let a = parse_formula("(CH3)2CO", &t).unwrap();
        let b = parse_formula("C3H6O", &t).unwrap();
        assert_eq!(a, b);

        let mass_a = monoisotopic_mass_of(&a, &t).unwrap();
        let mass_b = monoisotopic_mass_of(&b, &t).unwrap();
        assert!((mass_a - mass_b).abs() < 1e-6);
    }

    #[test]
    fn test_nested_groups() {
        let t = table();
        let parsed = parse_formula("((CH3)2N)2", &t).unwrap();
        assert_eq!(parsed.get("C"), Some(&4));
        assert_eq!(parsed.get("H"), Some(&12));
        assert_eq!(parsed.get("N"), Some(&2));
    }

    #[test]
    fn test_zero_or_missing_group_multiplier_defaults_to_one() {
        let t = table();
        let missing = parse_formula("(CH3)CO", &t).unwrap();
        let zero = parse_formula("(CH3)0CO", &t).unwrap();
        assert_eq!(missing.get("C"), Some(&2));
        assert_eq!(missing, zero);
    }

    #[test]
    fn test_isotope_tokens_and_deuterium_shorthand() {
        let t = table();
        let parsed = parse_formula("[13C]2C4H10", &t).unwrap();
        assert_eq!(parsed.get("13C"), Some(&2));
        assert_eq!(parsed.get("C"), Some(&4));

        let heavy_water = parse_formula("D2O", &t).unwrap();
        assert_eq!(heavy_water.get("2H"), Some(&2));
        assert_eq!(heavy_water.get("O"), Some(&1));
        assert_eq!(heavy_water, parse_formula("[2H]2O", &t).unwrap());
    }

    #[test]
    fn test_malformed_formulas() {
        let t = table();
        assert!(matches!(parse_formula("", &t), Err(ChemistryError::Format(_))));
        assert!(matches!(parse_formula("C3H6(", &t), Err(ChemistryError::Format(_))));
        assert!(matches!(parse_formula("C3H6@", &t), Err(ChemistryError::Format(_))));
        assert!(matches!(parse_formula("3CH6", &t), Err(ChemistryError::Format(_))));
        assert!(matches!(parse_formula("[13C", &t), Err(ChemistryError::Format(_))));
    }

    #[test]
    fn test_oversized_counts_raise_format() {
        let t = table();
        assert!(matches!(parse_formula("C9999999999", &t), Err(ChemistryError::Format(_))));
        assert!(matches!(parse_formula("(CH3)9999999999", &t), Err(ChemistryError::Format(_))));
        assert!(matches!(parse_formula("[13C]9999999999", &t), Err(ChemistryError::Format(_))));
    }

    #[test]
    fn test_unknown_entities() {
        let t = table();
        assert!(matches!(parse_formula("CXy3", &t), Err(ChemistryError::UnknownEntity(_))));
        assert!(matches!(parse_formula("[5C]O2", &t), Err(ChemistryError::UnknownEntity(_))));
    }

    #[test]
    fn test_hill_order_without_carbon_is_alphabetical() {
        let composition = Composition::from([
            ("O".to_string(), 1),
            ("H".to_string(), 2),
        ]);
        assert_eq!(composition_to_hill(&composition), "H2O");

        let no_hydrogen = Composition::from([
            ("Cl".to_string(), 1),
            ("Na".to_string(), 1),
        ]);
        assert_eq!(composition_to_hill(&no_hydrogen), "ClNa");
    }

    #[test]
    fn test_isotope_substitution_raises_mass() {
        let t = table();
        let light = SumFormula::new("C", &t).unwrap().monoisotopic_mass(&t).unwrap();
        let heavy = SumFormula::new("[13C]", &t).unwrap().monoisotopic_mass(&t).unwrap();
        assert!((heavy - light - 1.0034).abs() < 1e-4);

        let h = SumFormula::new("H", &t).unwrap().monoisotopic_mass(&t).unwrap();
        let d = SumFormula::new("[2H]", &t).unwrap().monoisotopic_mass(&t).unwrap();
        assert!((d - h - 1.0063).abs() < 1e-4);
    }
}
