pub mod wompi;

pub use wompi::{WompiGateway, WompiSettings};
