pub mod access;
pub mod consolidator;
pub mod dict;
pub mod error;
pub mod fsutil;
pub mod location;
pub mod model;
pub mod override_store;
pub mod prefs;
pub mod settings;
pub mod variant;
