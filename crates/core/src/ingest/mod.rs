pub mod alpha_vantage;
pub mod analysis;
pub mod fmp;
pub mod provider;
pub mod yahoo;
