//! Frequency-domain front end: spectrum production and peak picking.

pub mod peaks;
pub mod spectrum;

pub trait Reconfigurable<Cfg> {
    fn update_config(&mut self, config: Cfg);
}
