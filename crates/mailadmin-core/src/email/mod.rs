//! Email records as exchanged with the backend.

mod model;

pub use model::{
    AccountId, Attachment, Email, EmailAddress, InlineImage, Paginated, Pagination, StatusPatch,
};
