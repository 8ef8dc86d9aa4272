//! SIGIL Core — domain models, storage traits, and the error taxonomy
//! shared across the authentication service.

pub mod error;
pub mod models;
pub mod repository;

pub use error::{Error, ErrorBody, ErrorCode, Result};
pub use models::device::Device;
pub use models::login::LoginHistory;
pub use models::message::{Message, MessageTemplate};
pub use models::token::{Claims, TfaOption, TokenState};
pub use models::user::{DeliveryMethod, IdentityKind, PasswordMode, User};
pub use repository::{
    DeviceRepository, IdentityField, KeyValueStore, LoginHistoryRepository, MessagingService,
    RepositoryManager, UserRepository,
};
