pub mod api;
pub mod credential;
pub mod error;
pub mod feed;
pub mod pagination;
pub mod sse;
pub mod stream;

#[cfg(test)]
mod testing;

pub use api::{HttpTaskApi, SubmitAck, SubmitRequest, TaskApi};
pub use credential::{SessionClaims, SessionCredential, ACCESS_TOKEN_COOKIE};
pub use error::ClientError;
pub use feed::{TaskFeed, TaskFeedOptions};
pub use pagination::{LoadOutcome, PaginationController, PaginationState};
pub use stream::{ConnectionStatus, EventStreamClient, Subscription};
