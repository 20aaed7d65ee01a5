pub mod form;
pub mod form_integration;
pub mod integration;
pub mod integration_job;
pub mod integration_log;
pub mod oauth_token;
pub mod payment;
pub mod submission;

pub use form::{Form, FormSettings};
pub use form_integration::{FieldMappings, FormIntegration};
pub use integration::Integration;
pub use integration_job::IntegrationJob;
pub use integration_log::IntegrationLog;
pub use oauth_token::OauthToken;
pub use payment::{AuthenticationState, Payment, PaymentStatus};
pub use submission::{Submission, SubmissionStatus};
