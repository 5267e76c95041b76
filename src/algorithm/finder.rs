use std::collections::HashMap;

use bincode::{Decode, Encode};
use itertools::Itertools;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::chemistry::adducts::{calculate_mz, resolve_adduct, AdductSpec};
use crate::chemistry::elements::ElementTable;
use crate::chemistry::sum_formula::{composition_to_hill, Composition};
use crate::error::ChemistryError;

/// A formula candidate matching an observed m/z.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct CandidateFormula {
    /// formula string in Hill order
    pub formula: String,
    /// display name of the adduct the candidate was ionized with
    pub adduct: String,
    pub charge: i32,
    pub mz: f64,
    /// deviation from the searched m/z in parts per million
    pub ppm: f64,
}

/// One element of the search pool with its monoisotopic mass and count bound.
struct PoolElement {
    symbol: String,
    mass: f64,
    max_count: i32,
}

/// Enumerate molecular formulas whose ionized mass matches an observed m/z.
///
/// Every element of the pool is assigned a count from zero up to
/// `min(pool bound, target_mz / element mass)` by depth-first enumeration.
/// Completed assignments pass through elemental-composition plausibility
/// filters (hydrogen saturation, heteroatom ratios, halogen bound, double
/// bond equivalents, nitrogen rule) before their m/z is compared against the
/// target.
///
/// Arguments:
///
/// * `target_mz` - the observed mass-to-charge ratio
/// * `tolerance_ppm` - maximum allowed deviation, defaults to 100 ppm
/// * `atom_pool` - maximum atom count per element, defaults to C:20 H:100 O:10 N:10
/// * `adduct` - adduct notation the measured ion is assumed to carry
/// * `table` - element and isotope reference table
///
/// Returns:
///
/// * `Result<Vec<CandidateFormula>, ChemistryError>` - candidates sorted by ascending |ppm|
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use mzformula::algorithm::finder::find_formula;
/// use mzformula::chemistry::elements::ElementTable;
///
/// let table = ElementTable::natural();
/// let pool = HashMap::from([
///     ("C".to_string(), 5),
///     ("H".to_string(), 10),
///     ("O".to_string(), 3),
/// ]);
/// let candidates = find_formula(58.041865, Some(10.0), Some(pool), "", &table).unwrap();
/// assert_eq!(candidates[0].formula, "C3H6O");
/// ```
pub fn find_formula(
    target_mz: f64,
    tolerance_ppm: Option<f64>,
    atom_pool: Option<HashMap<String, i32>>,
    adduct: &str,
    table: &ElementTable,
) -> Result<Vec<CandidateFormula>, ChemistryError> {
    let tolerance_ppm = tolerance_ppm.unwrap_or(100.0);
    let atom_pool = atom_pool.unwrap_or_else(default_atom_pool);

    let adduct_spec = resolve_adduct(adduct, table)?;

    let mut elements: Vec<PoolElement> = Vec::with_capacity(atom_pool.len());
    for (symbol, &pool_max) in atom_pool.iter().sorted() {
        let mass = table
            .monoisotopic_mass(symbol)
            .ok_or_else(|| ChemistryError::UnknownEntity(symbol.to_string()))?;
        // no single element may exceed the target mass on its own
        let mass_bound = (target_mz / mass).floor() as i32;
        elements.push(PoolElement {
            symbol: symbol.to_string(),
            mass,
            max_count: pool_max.min(mass_bound).max(0),
        });
    }

    let mut candidates = Vec::new();
    let mut counts = vec![0; elements.len()];
    enumerate(
        &elements,
        0,
        &mut counts,
        target_mz,
        tolerance_ppm,
        &adduct_spec,
        table,
        &mut candidates,
    );

    candidates.sort_by(|a, b| a.ppm.abs().partial_cmp(&b.ppm.abs()).unwrap());
    Ok(candidates)
}

/// the default small-organic-molecule search pool
pub fn default_atom_pool() -> HashMap<String, i32> {
    HashMap::from([
        ("C".to_string(), 20),
        ("H".to_string(), 100),
        ("O".to_string(), 10),
        ("N".to_string(), 10),
    ])
}

#[allow(clippy::too_many_arguments)]
fn enumerate(
    elements: &[PoolElement],
    index: usize,
    counts: &mut Vec<i32>,
    target_mz: f64,
    tolerance_ppm: f64,
    adduct: &AdductSpec,
    table: &ElementTable,
    candidates: &mut Vec<CandidateFormula>,
) {
    if index == elements.len() {
        if let Some(candidate) = score_leaf(elements, counts, target_mz, tolerance_ppm, adduct, table)
        {
            candidates.push(candidate);
        }
        return;
    }

    for count in 0..=elements[index].max_count {
        counts[index] = count;
        enumerate(
            elements,
            index + 1,
            counts,
            target_mz,
            tolerance_ppm,
            adduct,
            table,
            candidates,
        );
    }
    counts[index] = 0;
}

fn score_leaf(
    elements: &[PoolElement],
    counts: &[i32],
    target_mz: f64,
    tolerance_ppm: f64,
    adduct: &AdductSpec,
    table: &ElementTable,
) -> Option<CandidateFormula> {
    if counts.iter().all(|&c| c == 0) {
        return None;
    }
    if !passes_chemistry_filters(elements, counts) {
        return None;
    }

    let neutral_mass: f64 = elements
        .iter()
        .zip(counts.iter())
        .map(|(e, &c)| e.mass * c as f64)
        .sum();

    let mz = calculate_mz(neutral_mass, adduct, table.electron_mass());
    let ppm = (target_mz - mz) / mz * 1e6;

    if ppm.abs() > tolerance_ppm {
        return None;
    }

    let composition: Composition = elements
        .iter()
        .zip(counts.iter())
        .filter(|(_, &c)| c > 0)
        .map(|(e, &c)| (e.symbol.clone(), c))
        .collect();

    Some(CandidateFormula {
        formula: composition_to_hill(&composition),
        adduct: adduct.name.clone(),
        charge: adduct.charge,
        mz,
        ppm,
    })
}

/// Conjunctive elemental-composition plausibility rules for organic-like
/// compounds. Hydrogen-free formulas are deliberately legal, so there is no
/// lower bound on the H:C ratio.
fn passes_chemistry_filters(elements: &[PoolElement], counts: &[i32]) -> bool {
    let count_of = |symbol: &str| -> i32 {
        elements
            .iter()
            .position(|e| e.symbol == symbol)
            .map(|i| counts[i])
            .unwrap_or(0)
    };

    let c = count_of("C");
    let h = count_of("H");
    let n = count_of("N");

    // hydrogen saturation bound
    if h > 2 * c + 2 + n {
        return false;
    }

    // heteroatom-to-carbon ratio bounds only apply to carbon-bearing formulas
    if c > 0 {
        if count_of("O") > 3 * c || n > 4 * c || count_of("S") > c || count_of("P") > 2 * c {
            return false;
        }
        let halogens = count_of("F") + count_of("Cl") + count_of("Br") + count_of("I");
        if halogens > 2 * c {
            return false;
        }
    }

    // double bond equivalents must be non-negative
    if 2 * c + 2 + n < h {
        return false;
    }

    // nitrogen rule: nominal neutral mass parity must match nitrogen parity
    let nominal: i64 = elements
        .iter()
        .zip(counts.iter())
        .map(|(e, &cnt)| e.mass * cnt as f64)
        .sum::<f64>()
        .round() as i64;
    if nominal % 2 != n as i64 % 2 {
        return false;
    }

    true
}

/// search many observed m/z values on a thread pool
///
/// Each target is an independent search; the pool only fans them out.
pub fn find_formulas(
    target_mzs: &[f64],
    tolerance_ppm: Option<f64>,
    atom_pool: Option<HashMap<String, i32>>,
    adduct: &str,
    num_threads: usize,
    table: &ElementTable,
) -> Result<Vec<Vec<CandidateFormula>>, ChemistryError> {
    let thread_pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| ChemistryError::Validation(e.to_string()))?;

    thread_pool.install(|| {
        target_mzs
            .par_iter()
            .map(|&mz| find_formula(mz, tolerance_ppm, atom_pool.clone(), adduct, table))
            .collect()
    })
}
