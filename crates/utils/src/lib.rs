pub mod logging;
pub mod single_flight;
pub mod version;
