//! External service integrations.

pub mod services {
    pub use crate::services::*;
}

pub mod email_client {
    pub use crate::email_client::*;
}

pub mod webhook_models {
    pub use crate::webhook_models::*;
}
