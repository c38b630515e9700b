pub mod dose_event;
pub mod medication;
pub mod settings;
pub mod user;

pub use dose_event::*;
pub use medication::*;
pub use settings::*;
pub use user::*;
