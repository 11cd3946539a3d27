// Domain-layer modules and shared errors/models
pub mod addons {
    pub use crate::addons::*;
}

pub mod reconcile {
    pub use crate::reconcile::*;
}

pub mod reading {
    pub use crate::reading::*;
}

pub mod horoscope {
    pub use crate::horoscope::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
