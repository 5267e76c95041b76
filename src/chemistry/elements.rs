use std::collections::HashMap;

use serde::Deserialize;

use crate::chemistry::constants::MASS_ELECTRON;
use crate::error::ChemistryError;

/// isotope masses of the elements, ordered by mass ascending
pub fn atoms_isotopic_weights() -> HashMap<&'static str, Vec<f64>> {
    let mut map = HashMap::new();
    map.insert("H", vec![1.00782503223, 2.01410177812]);
    map.insert("He", vec![3.0160293201, 4.00260325413]);
    map.insert("Li", vec![6.0151228874, 7.0160034366]);
    map.insert("Be", vec![9.012183065]);
    map.insert("B", vec![10.01293695, 11.00930536]);
    map.insert("C", vec![12.0000000, 13.00335483507]);
    map.insert("N", vec![14.00307400443, 15.00010889888]);
    map.insert("O", vec![15.99491461957, 16.99913175650, 17.99915961286]);
    map.insert("F", vec![18.99840316273]);
    map.insert("Na", vec![22.9897692820]);
    map.insert("Mg", vec![23.985041697, 24.985836976, 25.982592968]);
    map.insert("Al", vec![26.98153853]);
    map.insert("Si", vec![27.97692653465, 28.97649466490, 29.973770136]);
    map.insert("P", vec![30.97376199842]);
    map.insert("S", vec![31.9720711744, 32.9714589098, 33.967867004, 35.96708071]);
    map.insert("Cl", vec![34.968852682, 36.965902602]);
    map.insert("K", vec![38.9637064864, 39.963998166, 40.9618252579]);
    map.insert("Ca", vec![39.962590863, 41.95861783, 42.95876644, 43.95548156, 45.9536890, 47.95252276]);
    map.insert("Fe", vec![53.93960899, 55.93493633, 56.93539284, 57.93327443]);
    map.insert("Cu", vec![62.92959772, 64.92778970]);
    map.insert("Zn", vec![63.92914201, 65.92603381, 66.92712775, 67.92484455, 69.9253192]);
    map.insert("Se", vec![73.922475934, 75.919213704, 76.919914154, 77.91730928, 79.9165218, 81.9166995]);
    map.insert("Br", vec![78.9183376, 80.9162897]);
    map.insert("I", vec![126.9044719]);
    map
}

/// natural abundances of the isotopes, same ordering as [atoms_isotopic_weights]
pub fn isotopic_abundance() -> HashMap<&'static str, Vec<f64>> {
    let mut map = HashMap::new();
    map.insert("H", vec![0.999885, 0.000115]);
    map.insert("He", vec![0.00000134, 0.99999866]);
    map.insert("Li", vec![0.0759, 0.9241]);
    map.insert("Be", vec![1.0]);
    map.insert("B", vec![0.199, 0.801]);
    map.insert("C", vec![0.9893, 0.0107]);
    map.insert("N", vec![0.99636, 0.00364]);
    map.insert("O", vec![0.99757, 0.00038, 0.00205]);
    map.insert("F", vec![1.0]);
    map.insert("Na", vec![1.0]);
    map.insert("Mg", vec![0.7899, 0.1000, 0.1101]);
    map.insert("Al", vec![1.0]);
    map.insert("Si", vec![0.92223, 0.04685, 0.03092]);
    map.insert("P", vec![1.0]);
    map.insert("S", vec![0.9499, 0.0075, 0.0425, 0.0001]);
    map.insert("Cl", vec![0.7576, 0.2424]);
    map.insert("K", vec![0.932581, 0.000117, 0.067302]);
    map.insert("Ca", vec![0.96941, 0.00647, 0.00135, 0.02086, 0.00004, 0.00187]);
    map.insert("Fe", vec![0.05845, 0.91754, 0.02119, 0.00282]);
    map.insert("Cu", vec![0.6915, 0.3085]);
    map.insert("Zn", vec![0.4917, 0.2773, 0.0404, 0.1845, 0.0061]);
    map.insert("Se", vec![0.0089, 0.0937, 0.0763, 0.2377, 0.4961, 0.0873]);
    map.insert("Br", vec![0.5069, 0.4931]);
    map.insert("I", vec![1.0]);
    map
}

/// Isotopes of a single element: parallel lists of exact masses, natural
/// abundances and isotope symbols ("12C", "13C", ...), masses ascending.
///
/// The serde field names follow the NIST-style reference file layout so the
/// same struct decodes an external table.
#[derive(Clone, Debug, Deserialize)]
pub struct ElementIsotopes {
    #[serde(rename = "Relative Atomic Mass")]
    pub masses: Vec<f64>,
    #[serde(rename = "Isotopic Composition")]
    pub abundances: Vec<f64>,
    #[serde(rename = "Symbol")]
    pub symbols: Vec<String>,
}

impl ElementIsotopes {
    /// mass of the most abundant isotope
    pub fn monoisotopic_mass(&self) -> f64 {
        let mut best = 0;
        for (i, &abundance) in self.abundances.iter().enumerate() {
            if abundance > self.abundances[best] {
                best = i;
            }
        }
        self.masses[best]
    }

    /// the (mass, abundance) pairs of the natural isotope pattern
    pub fn distribution(&self) -> Vec<(f64, f64)> {
        self.masses.iter().zip(self.abundances.iter()).map(|(&m, &a)| (m, a)).collect()
    }
}

/// Read-only element and isotope reference table.
///
/// Constructed once and passed by reference into every operation, so no code
/// in this crate depends on hidden global state.
#[derive(Clone, Debug)]
pub struct ElementTable {
    elements: HashMap<String, ElementIsotopes>,
    electron_mass: f64,
}

impl ElementTable {
    /// Build the table from the embedded natural-abundance data.
    ///
    /// # Examples
    ///
    /// ```
    /// use mzformula::chemistry::elements::ElementTable;
    ///
    /// let table = ElementTable::natural();
    /// assert!(table.contains("C"));
    /// assert_eq!(table.monoisotopic_mass("C"), Some(12.0));
    /// ```
    pub fn natural() -> Self {
        let weights = atoms_isotopic_weights();
        let abundances = isotopic_abundance();
        let mut elements = HashMap::new();

        for (symbol, masses) in weights {
            let abundance = abundances[symbol].clone();
            let symbols = masses
                .iter()
                .map(|&m| format!("{}{}", m.round() as i64, symbol))
                .collect();
            elements.insert(
                symbol.to_string(),
                ElementIsotopes { masses, abundances: abundance, symbols },
            );
        }

        ElementTable { elements, electron_mass: MASS_ELECTRON }
    }

    /// Decode a table from a NIST-style JSON document.
    ///
    /// The document maps element symbols to records with parallel
    /// "Relative Atomic Mass", "Isotopic Composition" and "Symbol" lists; the
    /// special "e" entry supplies the electron mass as a single-element list.
    pub fn from_json_str(data: &str) -> Result<Self, ChemistryError> {
        let mut elements: HashMap<String, ElementIsotopes> =
            serde_json::from_str(data).map_err(|e| ChemistryError::Format(e.to_string()))?;

        let electron_mass = match elements.remove("e") {
            Some(entry) if !entry.masses.is_empty() => entry.masses[0],
            _ => return Err(ChemistryError::UnknownEntity("e".to_string())),
        };

        for (symbol, entry) in &elements {
            if entry.masses.len() != entry.abundances.len()
                || entry.masses.len() != entry.symbols.len()
            {
                return Err(ChemistryError::Format(format!(
                    "isotope lists for {} have mismatched lengths",
                    symbol
                )));
            }
        }

        Ok(ElementTable { elements, electron_mass })
    }

    pub fn electron_mass(&self) -> f64 {
        self.electron_mass
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.elements.contains_key(symbol)
    }

    pub fn isotopes(&self, symbol: &str) -> Option<&ElementIsotopes> {
        self.elements.get(symbol)
    }

    /// mass of the most abundant isotope of an element
    pub fn monoisotopic_mass(&self, symbol: &str) -> Option<f64> {
        self.elements.get(symbol).map(|e| e.monoisotopic_mass())
    }

    /// Resolve a specific-isotope label like "13C" or "2H" to its exact mass.
    ///
    /// The label must name a known isotope of a known element, spelled the way
    /// the reference table spells it.
    pub fn isotope_mass(&self, label: &str) -> Option<f64> {
        let split = label.find(|c: char| c.is_ascii_alphabetic())?;
        let element = &label[split..];
        let entry = self.elements.get(element)?;
        entry
            .symbols
            .iter()
            .position(|s| s == label)
            .map(|i| entry.masses[i])
    }

    /// Resolve an atom key from a parsed composition into the per-atom
    /// isotope distribution used by the convolution engine.
    ///
    /// A plain element symbol yields the full natural pattern; a
    /// specific-isotope label yields a single synthetic isotope of
    /// abundance 1.0.
    pub fn atom_distribution(&self, key: &str) -> Result<Vec<(f64, f64)>, ChemistryError> {
        if let Some(entry) = self.elements.get(key) {
            return Ok(entry.distribution());
        }
        if let Some(mass) = self.isotope_mass(key) {
            return Ok(vec![(mass, 1.0)]);
        }
        Err(ChemistryError::UnknownEntity(key.to_string()))
    }

    /// Monoisotopic mass of an atom key: most abundant isotope for a plain
    /// element, the exact isotope mass for a specific-isotope label.
    pub fn atom_monoisotopic_mass(&self, key: &str) -> Result<f64, ChemistryError> {
        if let Some(mass) = self.monoisotopic_mass(key) {
            return Ok(mass);
        }
        if let Some(mass) = self.isotope_mass(key) {
            return Ok(mass);
        }
        Err(ChemistryError::UnknownEntity(key.to_string()))
    }
}
