//! On-disk credential persistence.
//!
//! One JSON file per user holds the whole [`CredentialSet`]; it is only ever
//! replaced as a whole. The directory is created owner-only and the file is
//! owner read/write only.
//!
//! [`CredentialSet`]: mailbridge_oauth::CredentialSet

mod store;

pub use store::{
    CREDENTIALS_FILE, CredentialStore, STORE_DIR, StoreError, StoreResult, default_location,
};
