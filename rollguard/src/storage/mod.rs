//! Deploy path layout, settings and deployment metadata

pub mod layout;
pub mod metadata;
pub mod settings;
