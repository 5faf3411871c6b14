mod handler;
mod model;

pub use handler::{get_poll, vote};
pub use model::{GetPollRequest, Poll, PollOption, VoteOutcome, VoteRequest};
