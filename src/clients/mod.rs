pub mod read_client;

pub use read_client::{OperationStatus, PollResponse, ReadApi, ReadClient, SubmitResponse};
