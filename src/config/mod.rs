//! Settings data model, defaults, and the hot-reloadable handle.

pub mod defaults;
mod handle;
mod settings;

pub use handle::{load, save, ConfigEvent, SettingsHandle};
pub use settings::{BrokerConfig, FeatureConfig, GeoLocation, Settings};
