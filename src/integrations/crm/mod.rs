pub mod dynamics365;
pub mod klaviyo;

pub use dynamics365::Dynamics365;
pub use klaviyo::Klaviyo;
