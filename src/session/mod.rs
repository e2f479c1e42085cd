pub mod client_registry;

pub use client_registry::{ClientRegistry, PassAdmission, RegistryStats};
