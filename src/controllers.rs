pub mod downloads;
pub mod files;
pub mod metadata;
pub mod profiles;
