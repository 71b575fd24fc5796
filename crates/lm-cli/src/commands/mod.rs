pub mod config_ops;
pub mod consolidate_ops;
pub mod grant_ops;
pub mod load_ops;
pub mod location_ops;
pub mod override_ops;
