//! Multiplexed `graphql-ws` subscription client (H).

mod client;
pub mod protocol;

pub use client::{GraphQLWsDataSource, SubscribeOptions, WebSocketGraphQLSubscriptionClient};
