pub mod gain;
pub mod interp;
pub mod stretch;
