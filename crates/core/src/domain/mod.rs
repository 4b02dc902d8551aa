pub mod channel;
pub mod contract;
pub mod fault;
pub mod stock;
pub mod video;
