// chemistry module
pub mod chemistry {
    pub mod adducts;
    pub mod constants;
    pub mod elements;
    pub mod sum_formula;
}

// algorithm module
pub mod algorithm {
    pub mod finder;
    pub mod isotope;
}

pub mod error;
