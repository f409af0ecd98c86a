pub mod kinetic;
pub mod poloidal_flux;
