pub mod dual_order;
pub mod mtf;
pub mod routing;
pub mod sizing;
pub mod symbols;
