pub mod clock;
pub mod locks;
pub mod password;
pub mod token;
pub mod validation;

pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use locks::KeyedLocks;
pub use password::{hash_password, verify_password, Password, PasswordHashString};
pub use token::generate_token;
pub use validation::ValidatedJson;
